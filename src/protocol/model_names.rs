//! Named-model catalog enumeration.
//!
//! The mount stores up to 50 named pointing models. This link enumerates
//! every slot with `:modelnamI#` and publishes the ordered name list.
//! Load/save/delete of a named model are single commands with a
//! confirmation reply and go through the command link.

use super::link::MountLink;
use super::{CommandTemplate, ProtocolError};
use crate::config::defaults::MODEL_NAME_SLOTS;
use crate::data::SharedMountData;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Command to load a stored model by name. Confirmation reply `1`.
pub fn load_command(name: &str) -> String {
    format!(":modelld0{}#", name)
}

/// Command to save the active model under a name. Confirmation reply `1`.
pub fn save_command(name: &str) -> String {
    format!(":modelsv0{}#", name)
}

/// Command to delete a stored model by name. Confirmation reply `1`.
pub fn delete_command(name: &str) -> String {
    format!(":modeldel0{}#", name)
}

/// The catalog-enumeration protocol engine.
pub struct ModelNameLink {
    link: MountLink,
    data: SharedMountData,
}

impl ModelNameLink {
    pub fn new(link: MountLink, data: SharedMountData) -> Self {
        Self { link, data }
    }

    /// Enumerate all 50 slots and publish the non-empty names in slot
    /// order.
    pub async fn read_names(&mut self) -> Result<(), ProtocolError> {
        self.link.ensure_connected().await?;

        let mut template = CommandTemplate::new();
        for i in 1..=MODEL_NAME_SLOTS {
            template.push(&format!(":modelnam{}#", i));
        }

        let fields = self.link.exchange(&template).await?;
        if fields.len() != MODEL_NAME_SLOTS {
            return Err(ProtocolError::Parse(format!(
                "name enumeration expects {} fields, got {}",
                MODEL_NAME_SLOTS,
                fields.len()
            )));
        }

        let names: Vec<String> = fields
            .iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();

        debug!(count = names.len(), "Model name catalog read");
        {
            let mut data = self.data.write().await;
            data.model_name_count = names.len();
            data.model_names = names;
        }
        Ok(())
    }

    /// Worker loop: enumerate on every trigger until cancellation.
    pub async fn run(mut self, mut trigger: mpsc::Receiver<()>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                request = trigger.recv() => {
                    if request.is_none() {
                        break;
                    }
                    if let Err(e) = self.read_names().await {
                        warn!(error = %e, "Model name enumeration failed");
                    }
                }
            }
        }
        self.link.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_commands() {
        assert_eq!(load_command("winter"), ":modelld0winter#");
        assert_eq!(save_command("winter"), ":modelsv0winter#");
        assert_eq!(delete_command("old"), ":modeldel0old#");
    }
}

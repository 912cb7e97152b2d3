//! Once-poll: identity and site readout.
//!
//! Runs on first connect and again after every reconnection. Reads the
//! firmware identity strings, the site coordinates (applying the
//! east-longitude sign inversion), and clears any half-open alignment
//! upload with an empty `:newalig#` / `:endalig#` pair.

use super::firmware::Firmware;
use super::link::MountLink;
use super::poll::{PollCadence, Poller};
use super::{CommandTemplate, ProtocolError};
use crate::data::{invert_longitude_sign, SharedMountData};
use async_trait::async_trait;

/// The once-per-connection link.
pub struct OncePoller {
    data: SharedMountData,
}

impl OncePoller {
    pub fn new(data: SharedMountData) -> Self {
        Self { data }
    }

    fn template() -> CommandTemplate {
        let mut t = CommandTemplate::new();
        t.push_blind(":U2#")
            .push(":Gev#")
            .push(":Gg#")
            .push(":Gt#")
            .push(":GVD#")
            .push(":GVN#")
            .push(":GVP#")
            .push(":GVT#")
            .push(":GVZ#")
            .push(":newalig#")
            .push(":endalig#");
        t
    }

    async fn apply(&self, fields: &[String]) {
        let height: f64 = fields[0].trim().parse().unwrap_or(0.0);
        // The wire counts east longitudes negative; MountData stores the
        // user-facing convention (east positive).
        let longitude = invert_longitude_sign(fields[1].trim());
        let latitude = fields[2].trim().to_string();
        let firmware = Firmware::parse(&fields[4]);

        let mut data = self.data.write().await;
        data.set_site(latitude, longitude, height);
        data.fw_date = fields[3].trim().to_string();
        data.fw_number = fields[4].trim().to_string();
        data.fw = firmware.value();
        data.product_name = fields[5].trim().to_string();
        data.fw_time = fields[6].trim().to_string();
        data.hardware_version = fields[7].trim().to_string();

        tracing::info!(
            firmware = %firmware,
            product = %data.product_name,
            hardware = %data.hardware_version,
            "Mount identity read"
        );
    }
}

#[async_trait]
impl Poller for OncePoller {
    fn name(&self) -> &'static str {
        "once"
    }

    fn cadence(&self) -> PollCadence {
        PollCadence::OnConnect
    }

    async fn cycle(&mut self, link: &mut MountLink) -> Result<(), ProtocolError> {
        let template = Self::template();
        let fields = link.exchange(&template).await?;
        if fields.len() != template.expected() {
            return Err(ProtocolError::Parse(format!(
                "once poll expects {} fields, got {}",
                template.expected(),
                fields.len()
            )));
        }
        self.apply(&fields).await;
        Ok(())
    }
}

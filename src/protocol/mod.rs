//! 10micron LX200-derived wire protocol.
//!
//! Commands are ASCII, terminated by `\r`; replies arrive as one or more
//! `#`-terminated fields concatenated without padding. Several commands can
//! be concatenated into one template — the caller knows how many reply
//! fields the template produces and the reader accumulates until exactly
//! that many `#` bytes arrived.
//!
//! Traffic is partitioned across long-lived sockets, one per link, each
//! with its own cadence: command, fast poll, medium poll, slow poll,
//! once-poll, model-read, model-write, model-names.

pub mod command;
pub mod fast;
pub mod firmware;
pub mod link;
pub mod medium;
pub mod model_names;
pub mod model_read;
pub mod model_write;
pub mod once;
pub mod poll;
pub mod slow;

pub use command::{CommandLink, CommandRequest};
pub use firmware::Firmware;
pub use link::{ConnectionState, LinkError, MountLink};
pub use poll::{PollWorker, Poller};

use thiserror::Error;

/// Errors surfaced by protocol sub-engines above the raw link layer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Mount rejected command: {0}")]
    Rejected(String),

    #[error("Firmware {found} too old for {operation} (requires {required})")]
    FirmwareUnsupported {
        operation: &'static str,
        required: u32,
        found: u32,
    },

    #[error("Malformed reply: {0}")]
    Parse(String),
}

// ============================================================================
// Command templates
// ============================================================================

/// A batch of concatenated commands plus the number of `#`-terminated reply
/// fields the batch produces. Commands that reply nothing (`:U2#`,
/// `:SRPRS…#`) add to the text but not to the expected count.
#[derive(Debug, Clone, Default)]
pub struct CommandTemplate {
    text: String,
    expected: usize,
}

impl CommandTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command that produces no reply.
    pub fn push_blind(&mut self, cmd: &str) -> &mut Self {
        self.text.push_str(cmd);
        self
    }

    /// Append a command that produces one `#`-terminated reply field.
    pub fn push(&mut self, cmd: &str) -> &mut Self {
        self.text.push_str(cmd);
        self.expected += 1;
        self
    }

    /// Full command text for the wire (without the trailing `\r`).
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of reply fields to accumulate.
    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Split an accumulated reply buffer into its `#`-terminated fields,
/// stripping the terminators.
pub fn split_fields(raw: &str) -> Vec<String> {
    let mut fields: Vec<String> = raw.split('#').map(str::to_string).collect();
    // split leaves one empty trailing element when the buffer ends in '#'
    if fields.last().is_some_and(|f| f.is_empty()) {
        fields.pop();
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_counts_only_replying_commands() {
        let mut t = CommandTemplate::new();
        t.push_blind(":U2#").push(":GS#").push(":Ginfo#");
        assert_eq!(t.text(), ":U2#:GS#:Ginfo#");
        assert_eq!(t.expected(), 2);
    }

    #[test]
    fn test_split_fields() {
        assert_eq!(split_fields("V#V#003#"), vec!["V", "V", "003"]);
        assert_eq!(split_fields(""), Vec::<String>::new());
        // an empty field between terminators is preserved
        assert_eq!(split_fields("a##b#"), vec!["a", "", "b"]);
    }
}

//! Process-wide event bus.
//!
//! Links and the build pipeline publish [`MountEvent`]s over a tokio
//! broadcast channel; the dispatcher, UI adapter, and tests subscribe.
//! Lagging subscribers drop old events rather than block publishers.

use crate::types::MountStatus;
use tokio::sync::broadcast;

/// Capacity of the broadcast ring. Sized so a UI that repaints at a few Hz
/// never lags under the combined polling cadences.
const EVENT_BUS_CAPACITY: usize = 256;

/// Severity of a user-facing message event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Warning,
    Error,
}

/// Events published by the mount links and the build pipeline.
#[derive(Debug, Clone)]
pub enum MountEvent {
    /// A link's TCP connection changed state. `link` is the link name.
    Connection { link: &'static str, connected: bool },
    /// The fast poll observed the slewing flag fall from 1 to 0.
    SlewFinished,
    /// The mount entered an alert status (stopped / unknown / error).
    /// Emitted at most once per entry to that state.
    Alert(MountStatus),
    /// A user-facing message (red/yellow/plain line in the UI adapter).
    Message {
        severity: MessageSeverity,
        text: String,
    },
    /// A full alignment model was parsed and committed to MountData.
    ModelRead,
    /// The named-model catalog changed on the mount; the name link should
    /// re-enumerate the slots.
    ModelNamesChanged,
    /// The mount-side alignment star count changed; the read link should
    /// re-download the model.
    AlignmentStarsChanged(usize),
    /// Build pipeline progress after each solved point.
    BuildProgress {
        solved: usize,
        total: usize,
        elapsed_s: f64,
        eta_s: f64,
        finish_at: chrono::DateTime<chrono::Utc>,
    },
    /// The build pipeline delivered its last point.
    BuildFinished,
}

/// Cloneable publish/subscribe handle around one broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MountEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { sender }
    }

    /// Publish an event. Fine to call with no subscribers.
    pub fn publish(&self, event: MountEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe from this point forward.
    pub fn subscribe(&self) -> broadcast::Receiver<MountEvent> {
        self.sender.subscribe()
    }

    /// Convenience wrapper for user-facing messages.
    pub fn message(&self, severity: MessageSeverity, text: impl Into<String>) {
        self.publish(MountEvent::Message {
            severity,
            text: text.into(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

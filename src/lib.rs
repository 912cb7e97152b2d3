//! mountctl — mount control core for 10micron GM-series mounts.
//!
//! Talks the LX200-derived command protocol over TCP, keeps a consistent
//! picture of mount state, and drives the model-build pipeline that
//! constructs and programs the mount's pointing-correction model from
//! plate-solved sky images.
//!
//! ## Architecture
//!
//! - **Protocol links**: traffic is partitioned across long-lived sockets
//!   (command, fast/medium/slow/once polls, model read/write/names), each
//!   on its own cadence and tolerant of reconnection.
//! - **MountData**: one shared snapshot of mount state behind a
//!   reader-writer lock; each field has exactly one writing link.
//! - **Dispatcher**: typed command queue plus the high-level operations
//!   (shutdown, flip, sync, target-RMS optimize, retrofit, …).
//! - **Build pipeline**: three cooperating stages (slew → image → solve)
//!   with bounded queues, overlap of download and next slew, progress
//!   reporting, and cooperative cancel.

pub mod analyse;
pub mod build;
pub mod config;
pub mod data;
pub mod devices;
pub mod dispatcher;
pub mod events;
pub mod points;
pub mod protocol;
pub mod sim;
pub mod transform;
pub mod types;

// Re-export configuration
pub use config::MountConfig;

// Re-export commonly used types
pub use data::{MountData, SharedMountData};
pub use events::{EventBus, MessageSeverity, MountEvent};
pub use types::{
    AlignmentModel, BuildBatch, ModelingPoint, MountStatus, Pierside, RefractionMode,
};

// Re-export the orchestration layer
pub use build::{BuildPipeline, BuildSettings, SlewController};
pub use dispatcher::{DispatcherHandle, MountCommand, MountDispatcher};

// Re-export protocol essentials
pub use protocol::{Firmware, ProtocolError};

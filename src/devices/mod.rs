//! External collaborator seams.
//!
//! The core coordinates an imager, a plate solver, a dome, and an
//! environment sensor but implements none of them. Each is a trait with
//! the narrow contract the core requires; the host application plugs real
//! drivers in, the tests plug in the stubs from [`stubs`].

pub mod stubs;

use crate::types::ModelingPoint;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::oneshot;

/// Collaborator errors seen by the core.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Device not connected")]
    NotConnected,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Device failure: {0}")]
    Failed(String),
}

// ============================================================================
// Imager
// ============================================================================

/// Event handles for one exposure in flight.
///
/// `integrated` resolves when the sensor finished integrating — the mount
/// may start the next slew while the download runs. `saved` resolves when
/// the FITS file is on disk, carrying its path.
pub struct Exposure {
    pub integrated: oneshot::Receiver<()>,
    pub saved: oneshot::Receiver<PathBuf>,
}

/// Camera collaborator. Honors [`cancel`](Imager::cancel) by dropping the
/// event senders, which surfaces as a closed channel to the waiter.
#[async_trait]
pub trait Imager: Send + Sync + 'static {
    /// Begin one exposure for the given build point.
    async fn expose(&self, point: &ModelingPoint) -> Result<Exposure, DeviceError>;

    /// Abort any exposure in flight.
    async fn cancel(&self);
}

// ============================================================================
// Astrometry
// ============================================================================

/// A successful plate solve in J2000.
#[derive(Debug, Clone, Copy)]
pub struct SolveResult {
    pub ra_j2000: f64,
    pub dec_j2000: f64,
    /// Image scale (arcsec/pixel).
    pub scale: f64,
    /// Position angle (degrees).
    pub angle: f64,
}

/// Plate-solver collaborator. A failed solve returns `Err(Failed(msg))`
/// and the message lands on the point record.
#[async_trait]
pub trait Astrometry: Send + Sync + 'static {
    async fn solve(&self, point: &ModelingPoint) -> Result<SolveResult, DeviceError>;

    /// Abort any solve in flight.
    async fn cancel(&self);
}

// ============================================================================
// Dome
// ============================================================================

/// Dome collaborator: accepts azimuth slews and reports motion state.
#[async_trait]
pub trait Dome: Send + Sync + 'static {
    async fn slew_azimuth(&self, az_deg: f64) -> Result<(), DeviceError>;
    async fn is_slewing(&self) -> bool;
    async fn is_connected(&self) -> bool;
}

// ============================================================================
// Environment
// ============================================================================

/// Environment sensor: moving-average or instantaneous temperature and
/// pressure for the refraction pushes.
#[async_trait]
pub trait Environment: Send + Sync + 'static {
    /// `(temperature_c, pressure_hpa)`, or `None` while no data exists.
    async fn conditions(&self) -> Option<(f64, f64)>;
}

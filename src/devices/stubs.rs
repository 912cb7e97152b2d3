//! In-process collaborator stubs.
//!
//! Deterministic implementations of the device traits for the simulator
//! binary and the integration tests: an imager that "exposes" on a timer,
//! a solver that returns the commanded position plus a fixed offset, a
//! dome that finishes its slew after a delay, and a constant-conditions
//! environment.

use super::{Astrometry, DeviceError, Dome, Environment, Exposure, Imager, SolveResult};
use crate::types::ModelingPoint;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

// ============================================================================
// Imager
// ============================================================================

/// Imager stub: integration and download complete on fixed timers.
pub struct StubImager {
    pub integration: Duration,
    pub download: Duration,
    cancelled: Arc<AtomicBool>,
}

impl StubImager {
    pub fn new(integration: Duration, download: Duration) -> Self {
        Self {
            integration,
            download,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Effectively instant exposures, for tests that only exercise flow.
    pub fn instant() -> Self {
        Self::new(Duration::from_millis(5), Duration::from_millis(5))
    }
}

#[async_trait]
impl Imager for StubImager {
    async fn expose(&self, point: &ModelingPoint) -> Result<Exposure, DeviceError> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(DeviceError::Cancelled);
        }

        let (integrated_tx, integrated) = oneshot::channel();
        let (saved_tx, saved) = oneshot::channel();

        let path = point.directory.join(&point.file);
        let integration = self.integration;
        let download = self.download;
        let cancelled = self.cancelled.clone();

        tokio::spawn(async move {
            tokio::time::sleep(integration).await;
            if cancelled.load(Ordering::Relaxed) {
                return; // dropping the senders signals the abort
            }
            let _ = integrated_tx.send(());
            tokio::time::sleep(download).await;
            if cancelled.load(Ordering::Relaxed) {
                return;
            }
            let _ = saved_tx.send(path);
        });

        Ok(Exposure { integrated, saved })
    }

    async fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

// ============================================================================
// Astrometry
// ============================================================================

/// Solver stub: returns the point's nominal J2000 position shifted by a
/// fixed offset, so the pipeline computes a known model error.
pub struct StubAstrometry {
    /// Offset added to the nominal position (arcsec).
    pub ra_offset_arcsec: f64,
    pub dec_offset_arcsec: f64,
    pub solve_time: Duration,
    cancelled: Arc<AtomicBool>,
}

impl StubAstrometry {
    pub fn new(ra_offset_arcsec: f64, dec_offset_arcsec: f64) -> Self {
        Self {
            ra_offset_arcsec,
            dec_offset_arcsec,
            solve_time: Duration::from_millis(5),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Astrometry for StubAstrometry {
    async fn solve(&self, point: &ModelingPoint) -> Result<SolveResult, DeviceError> {
        tokio::time::sleep(self.solve_time).await;
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(DeviceError::Cancelled);
        }
        Ok(SolveResult {
            ra_j2000: point.ra_j2000 + self.ra_offset_arcsec / 3600.0,
            dec_j2000: point.dec_j2000 + self.dec_offset_arcsec / 3600.0,
            scale: 1.4,
            angle: 0.0,
        })
    }

    async fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

/// Solver stub that always fails, for error-path tests.
pub struct FailingAstrometry;

#[async_trait]
impl Astrometry for FailingAstrometry {
    async fn solve(&self, _point: &ModelingPoint) -> Result<SolveResult, DeviceError> {
        Err(DeviceError::Failed("no stars found".to_string()))
    }

    async fn cancel(&self) {}
}

// ============================================================================
// Dome
// ============================================================================

/// Dome stub: a slew completes after a fixed delay.
pub struct StubDome {
    pub slew_time: Duration,
    slewing: Arc<AtomicBool>,
    connected: bool,
}

impl StubDome {
    pub fn new(slew_time: Duration) -> Self {
        Self {
            slew_time,
            slewing: Arc::new(AtomicBool::new(false)),
            connected: true,
        }
    }
}

#[async_trait]
impl Dome for StubDome {
    async fn slew_azimuth(&self, _az_deg: f64) -> Result<(), DeviceError> {
        if !self.connected {
            return Err(DeviceError::NotConnected);
        }
        self.slewing.store(true, Ordering::Relaxed);
        let slewing = self.slewing.clone();
        let slew_time = self.slew_time;
        tokio::spawn(async move {
            tokio::time::sleep(slew_time).await;
            slewing.store(false, Ordering::Relaxed);
        });
        Ok(())
    }

    async fn is_slewing(&self) -> bool {
        self.slewing.load(Ordering::Relaxed)
    }

    async fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Fixed-conditions environment sensor.
pub struct StubEnvironment {
    pub temperature_c: f64,
    pub pressure_hpa: f64,
}

impl StubEnvironment {
    pub fn new(temperature_c: f64, pressure_hpa: f64) -> Self {
        Self {
            temperature_c,
            pressure_hpa,
        }
    }
}

#[async_trait]
impl Environment for StubEnvironment {
    async fn conditions(&self) -> Option<(f64, f64)> {
        Some((self.temperature_c, self.pressure_hpa))
    }
}

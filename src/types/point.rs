//! Per-point record flowing through the build pipeline.

use super::Pierside;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One model point as it travels slew → image → solve.
///
/// The record is moved between pipeline stages; each stage owns it while
/// processing and enriches it before handing it on. Solved fields are
/// `None` until the solve stage completes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelingPoint {
    /// Zero-based position in the build sequence.
    pub index: usize,
    /// Target azimuth (degrees).
    pub azimuth: f64,
    /// Target altitude (degrees).
    pub altitude: f64,
    /// Seconds to let the mount settle after the slew.
    pub settling_time_s: f64,
    /// Total points in this run (for progress display).
    pub number_points: usize,
    /// Whether a dome collaborator participates in the slew.
    pub dome_is_connected: bool,
    /// Keep the FITS image after a successful solve.
    pub keep_images: bool,
    /// Working directory for this run.
    pub directory: PathBuf,
    /// Image file name (without directory).
    pub file: String,
    /// Full image path, set by the imager once the file is written.
    pub image_path: Option<PathBuf>,

    /// LST at exposure, sexagesimal.
    pub local_sidereal_time: String,
    /// LST at exposure, decimal hours.
    pub local_sidereal_time_float: f64,
    /// Mount-reported pointing at exposure.
    pub ra_j_now: f64,
    pub dec_j_now: f64,
    pub ra_j2000: f64,
    pub dec_j2000: f64,
    pub pierside: Pierside,
    /// Refraction parameters at exposure, as delivered by the mount.
    pub refraction_temperature: String,
    pub refraction_pressure: String,

    /// Plate-solved position (J2000), filled by the astrometry collaborator.
    pub ra_j2000_solved: Option<f64>,
    pub dec_j2000_solved: Option<f64>,
    /// Solved position precessed to the current epoch.
    pub ra_j_now_solved: Option<f64>,
    pub dec_j_now_solved: Option<f64>,

    /// Per-axis pointing errors (arcsec).
    pub ra_error: Option<f64>,
    pub dec_error: Option<f64>,
    /// Total pointing error (arcsec).
    pub model_error: Option<f64>,
    /// Solver failure message, if the point did not solve.
    pub message: Option<String>,

    /// Mount-computed errors retrofitted onto the batch after the model
    /// upload: the mount's own per-point error, decomposed along its
    /// error angle.
    pub model_error_optimized: Option<f64>,
    pub ra_error_optimized: Option<f64>,
    pub dec_error_optimized: Option<f64>,
}

impl ModelingPoint {
    /// True once the solve stage filled every field the model upload needs.
    pub fn is_solved(&self) -> bool {
        self.ra_j_now_solved.is_some() && self.dec_j_now_solved.is_some()
    }
}

/// The collected result batch of a build run, in solve-completion order.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BuildBatch {
    pub points: Vec<ModelingPoint>,
}

impl BuildBatch {
    pub fn new(points: Vec<ModelingPoint>) -> Self {
        Self { points }
    }

    /// Points that produced a usable solve.
    pub fn solved(&self) -> impl Iterator<Item = &ModelingPoint> {
        self.points.iter().filter(|p| p.is_solved())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

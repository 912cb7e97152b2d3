//! Post-build analysis data.
//!
//! Persists the per-point result vectors of a build run as dict-of-lists
//! JSON (one file per run, the name encoding date-time and run type), and
//! loads two formats back: the native JSON and a TheSkyX plain-text model
//! export. A winsorization helper prepares the vectors for plotting.

use crate::types::{BuildBatch, Pierside};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Analysis-file errors.
#[derive(Debug, Error)]
pub enum AnalyseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error on line {line}: {text:?}")]
    Parse { line: usize, text: String },
}

/// Per-point result vectors of one build run, dict-of-lists style: every
/// vector has the same length and index `i` describes the same point.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AnalysisData {
    pub index: Vec<usize>,
    pub azimuth: Vec<f64>,
    pub altitude: Vec<f64>,
    pub local_sidereal_time: Vec<String>,
    pub local_sidereal_time_float: Vec<f64>,
    pub ra_j_now: Vec<f64>,
    pub dec_j_now: Vec<f64>,
    pub ra_j2000: Vec<f64>,
    pub dec_j2000: Vec<f64>,
    pub ra_j_now_solved: Vec<f64>,
    pub dec_j_now_solved: Vec<f64>,
    pub ra_j2000_solved: Vec<f64>,
    pub dec_j2000_solved: Vec<f64>,
    pub pierside: Vec<String>,
    pub ra_error: Vec<f64>,
    pub dec_error: Vec<f64>,
    pub model_error: Vec<f64>,
}

impl AnalysisData {
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Collect the solved points of a build batch into result vectors.
    pub fn from_batch(batch: &BuildBatch) -> Self {
        let mut data = Self::default();
        for point in batch.solved() {
            data.index.push(point.index);
            data.azimuth.push(point.azimuth);
            data.altitude.push(point.altitude);
            data.local_sidereal_time
                .push(point.local_sidereal_time.clone());
            data.local_sidereal_time_float
                .push(point.local_sidereal_time_float);
            data.ra_j_now.push(point.ra_j_now);
            data.dec_j_now.push(point.dec_j_now);
            data.ra_j2000.push(point.ra_j2000);
            data.dec_j2000.push(point.dec_j2000);
            data.ra_j_now_solved.push(point.ra_j_now_solved.unwrap_or(0.0));
            data.dec_j_now_solved
                .push(point.dec_j_now_solved.unwrap_or(0.0));
            data.ra_j2000_solved.push(point.ra_j2000_solved.unwrap_or(0.0));
            data.dec_j2000_solved
                .push(point.dec_j2000_solved.unwrap_or(0.0));
            data.pierside.push(point.pierside.to_wire().to_string());
            data.ra_error.push(point.ra_error.unwrap_or(0.0));
            data.dec_error.push(point.dec_error.unwrap_or(0.0));
            data.model_error.push(point.model_error.unwrap_or(0.0));
        }
        data
    }

    /// File name for a run: date-time plus the run type,
    /// e.g. `2026-08-06-21-04-55_build.json`.
    pub fn file_name(at: &DateTime<Utc>, run_type: &str) -> String {
        format!("{}_{}.json", at.format("%Y-%m-%d-%H-%M-%S"), run_type)
    }

    /// Save as dict-of-lists JSON; returns the written path.
    pub fn save(
        &self,
        directory: &Path,
        at: &DateTime<Utc>,
        run_type: &str,
    ) -> Result<PathBuf, AnalyseError> {
        std::fs::create_dir_all(directory)?;
        let path = directory.join(Self::file_name(at, run_type));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    /// Load an analysis file: native JSON, or a TheSkyX export detected
    /// by its leading `!TheSkyX` bytes.
    pub fn load(path: &Path) -> Result<Self, AnalyseError> {
        let text = std::fs::read_to_string(path)?;
        if text.trim_start().starts_with("!TheSkyX") {
            return Self::from_theskyx(&text);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Import a TheSkyX model export.
    ///
    /// Data lines carry `ra, dec, ra_solved, dec_solved, lst` (RA/LST in
    /// hours, Dec in degrees, J2000). Everything else — JNow coordinates,
    /// az/alt, pierside, per-point errors — is derived here.
    pub fn from_theskyx(text: &str) -> Result<Self, AnalyseError> {
        let now = Utc::now();
        let mut data = Self::default();

        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('!') || line.starts_with('#') {
                continue;
            }
            let err = || AnalyseError::Parse {
                line: i + 1,
                text: line.to_string(),
            };
            let values: Vec<f64> = line
                .split(',')
                .map(|v| v.trim().parse::<f64>())
                .collect::<Result<_, _>>()
                .map_err(|_| err())?;
            if values.len() != 5 {
                return Err(err());
            }
            let (ra, dec, ra_solved, dec_solved, lst) =
                (values[0], values[1], values[2], values[3], values[4]);

            let (ra_now, dec_now) = crate::transform::j2000_to_jnow(ra, dec, &now);
            let (ra_now_solved, dec_now_solved) =
                crate::transform::j2000_to_jnow(ra_solved, dec_solved, &now);

            // Site latitude is unknown in a TheSkyX export; the hour-angle
            // geometry still yields a usable az/alt picture at mid
            // latitudes for plotting purposes.
            let ha = (lst - ra_now).rem_euclid(24.0);
            let (az, alt) = crate::transform::topocentric_to_az_alt(ha, dec_now, 45.0);
            let pierside = if az <= 180.0 {
                Pierside::East
            } else {
                Pierside::West
            };

            let ra_error = (ra_solved - ra) * 3600.0;
            let dec_error = (dec_solved - dec) * 3600.0;

            data.index.push(data.index.len());
            data.azimuth.push(az);
            data.altitude.push(alt);
            data.local_sidereal_time
                .push(crate::transform::decimal_to_degree(lst, false, true, ':'));
            data.local_sidereal_time_float.push(lst);
            data.ra_j_now.push(ra_now);
            data.dec_j_now.push(dec_now);
            data.ra_j2000.push(ra);
            data.dec_j2000.push(dec);
            data.ra_j_now_solved.push(ra_now_solved);
            data.dec_j_now_solved.push(dec_now_solved);
            data.ra_j2000_solved.push(ra_solved);
            data.dec_j2000_solved.push(dec_solved);
            data.pierside.push(pierside.to_wire().to_string());
            data.ra_error.push(ra_error);
            data.dec_error.push(dec_error);
            data.model_error
                .push((ra_error * ra_error + dec_error * dec_error).sqrt());
        }

        Ok(data)
    }

    /// Plot preparation: winsorize the per-axis errors to the given
    /// scales so a single outlier cannot flatten the plot.
    pub fn prepare_data(&self, scale_ra: f64, scale_dec: f64) -> Self {
        let mut out = self.clone();
        out.ra_error = winsorize(&self.ra_error, scale_ra);
        out.dec_error = winsorize(&self.dec_error, scale_dec);
        out
    }
}

/// Clamp every value into `[-limit, limit]`.
pub fn winsorize(values: &[f64], limit: f64) -> Vec<f64> {
    let limit = limit.abs();
    values.iter().map(|v| v.clamp(-limit, limit)).collect()
}

//! Alignment-model types downloaded from the mount.

use serde::{Deserialize, Serialize};

/// The mount's pointing-correction model as read back over the wire:
/// parallel per-point arrays plus the aggregate statistics from `:getain#`.
///
/// All five arrays always have identical length; [`AlignmentModel::commit`]
/// is the only way links install a parsed batch, which enforces this.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AlignmentModel {
    /// Number of points in the model.
    pub number: usize,
    /// Alignment star count as reported by `:getalst#`.
    pub number_alignment_stars: usize,

    /// Per-point arrays, all of length `number`.
    pub index: Vec<usize>,
    pub azimuth: Vec<f64>,
    pub altitude: Vec<f64>,
    /// Per-point RMS error (arcsec).
    pub error: Vec<f64>,
    /// Per-point error direction (degrees).
    pub error_angle: Vec<f64>,

    /// Aggregate statistics (firmware ≥ 21500, zero otherwise).
    pub rms: f64,
    pub polar_error: f64,
    pub pos_angle: f64,
    pub ortho_error: f64,
    pub error_azimuth: f64,
    pub error_altitude: f64,
    pub azimuth_knobs: f64,
    pub altitude_knobs: f64,
    pub terms: f64,
}

/// One parsed `:getalpX#` reply, already converted to topocentric az/alt.
#[derive(Debug, Clone, Copy)]
pub struct AlignPoint {
    pub azimuth: f64,
    pub altitude: f64,
    pub error: f64,
    pub error_angle: f64,
}

/// The `:getain#` 9-tuple. A literal `E` in any field parses to zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelStats {
    pub error_azimuth: f64,
    pub error_altitude: f64,
    pub polar_error: f64,
    pub pos_angle: f64,
    pub ortho_error: f64,
    pub azimuth_knobs: f64,
    pub altitude_knobs: f64,
    pub terms: f64,
    pub rms: f64,
}

impl AlignmentModel {
    /// Replace the whole model with a freshly parsed batch.
    ///
    /// Keeps the five parallel arrays in lockstep: `number` is derived from
    /// the batch length, never taken from the wire separately.
    pub fn commit(&mut self, points: Vec<AlignPoint>, star_count: usize, stats: ModelStats) {
        self.number = points.len();
        self.number_alignment_stars = star_count;

        self.index = (0..points.len()).collect();
        self.azimuth = points.iter().map(|p| p.azimuth).collect();
        self.altitude = points.iter().map(|p| p.altitude).collect();
        self.error = points.iter().map(|p| p.error).collect();
        self.error_angle = points.iter().map(|p| p.error_angle).collect();

        self.error_azimuth = stats.error_azimuth;
        self.error_altitude = stats.error_altitude;
        self.polar_error = stats.polar_error;
        self.pos_angle = stats.pos_angle;
        self.ortho_error = stats.ortho_error;
        self.azimuth_knobs = stats.azimuth_knobs;
        self.altitude_knobs = stats.altitude_knobs;
        self.terms = stats.terms;
        self.rms = stats.rms;
    }

    /// Index of the point with the largest error, if the model is non-empty.
    pub fn worst_point(&self) -> Option<usize> {
        self.error
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
    }

    /// Checks that every per-point array has length `number`.
    pub fn is_consistent(&self) -> bool {
        self.index.len() == self.number
            && self.azimuth.len() == self.number
            && self.altitude.len() == self.number
            && self.error.len() == self.number
            && self.error_angle.len() == self.number
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(error: f64) -> AlignPoint {
        AlignPoint {
            azimuth: 120.0,
            altitude: 45.0,
            error,
            error_angle: 30.0,
        }
    }

    #[test]
    fn test_commit_keeps_arrays_parallel() {
        let mut model = AlignmentModel::default();
        model.commit(
            vec![point(4.0), point(2.1), point(9.3)],
            3,
            ModelStats::default(),
        );
        assert_eq!(model.number, 3);
        assert!(model.is_consistent());
        assert_eq!(model.index, vec![0, 1, 2]);
    }

    #[test]
    fn test_worst_point() {
        let mut model = AlignmentModel::default();
        model.commit(
            vec![point(4.0), point(2.1), point(9.3), point(1.2), point(3.0)],
            5,
            ModelStats::default(),
        );
        assert_eq!(model.worst_point(), Some(2));
    }

    #[test]
    fn test_worst_point_empty() {
        let model = AlignmentModel::default();
        assert_eq!(model.worst_point(), None);
    }
}

//! Model-point set and horizon mask.
//!
//! Holds the (az, alt) targets a build run slews through, the horizon
//! polyline used to clip them, and the generators for the predefined
//! grids. Three textual point-file schemas are supported: the native
//! `MW-3:aaa.aa:ee.ee` format, the legacy `az:alt[:type]` format, and an
//! externally produced `GRID … az alt` export.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Point-file errors.
#[derive(Debug, Error)]
pub enum PointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unrecognized point file format")]
    UnknownFormat,

    #[error("Parse error on line {line}: {text:?}")]
    Parse { line: usize, text: String },
}

/// Which subset a legacy type tag assigns a point to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointKind {
    /// Coarse first-pass point (legacy type 1).
    Initial,
    /// Full-model point (legacy type 2, and everything untagged).
    Full,
}

/// The point set driving a model build.
#[derive(Debug, Clone, Default)]
pub struct ModelPoints {
    /// Build targets in slew order, (azimuth°, altitude°).
    model_points: Vec<(f64, f64)>,
    /// Coarse initial-alignment targets.
    initial_points: Vec<(f64, f64)>,
    /// Horizon mask polyline, ordered by azimuth.
    horizon_points: Vec<(f64, f64)>,
    /// Celestial equator trace for the site, for the UI overlay.
    celestial_equator: Vec<(f64, f64)>,
}

impl ModelPoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.model_points
    }

    pub fn initial_points(&self) -> &[(f64, f64)] {
        &self.initial_points
    }

    pub fn horizon(&self) -> &[(f64, f64)] {
        &self.horizon_points
    }

    pub fn celestial_equator(&self) -> &[(f64, f64)] {
        &self.celestial_equator
    }

    pub fn set_points(&mut self, points: Vec<(f64, f64)>) {
        self.model_points = points;
    }

    pub fn clear(&mut self) {
        self.model_points.clear();
        self.initial_points.clear();
    }

    // ========================================================================
    // File I/O
    // ========================================================================

    /// Load a point file, auto-detecting the schema from its content.
    pub fn load_points(&mut self, path: &Path) -> Result<(), PointError> {
        let text = std::fs::read_to_string(path)?;
        let (full, initial) = parse_point_file(&text)?;
        self.model_points = full;
        self.initial_points = initial;
        Ok(())
    }

    /// Save the build points in the native `MW-3` schema.
    pub fn save_points(&self, path: &Path) -> Result<(), PointError> {
        let mut out = String::new();
        for (az, alt) in &self.model_points {
            out.push_str(&format_mw3_line(*az, *alt));
            out.push('\n');
        }
        std::fs::write(path, out)?;
        Ok(())
    }

    /// Load a horizon mask file (`az:alt` pairs, or space-separated), then
    /// raise every mask node to at least `altitude_floor`.
    pub fn load_horizon(&mut self, path: &Path, altitude_floor: f64) -> Result<(), PointError> {
        let text = std::fs::read_to_string(path)?;
        let mut mask = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (az, alt) = if line.contains(':') {
                let mut parts = line.splitn(2, ':');
                (
                    parts.next().unwrap_or(""),
                    parts.next().unwrap_or(""),
                )
            } else {
                let mut parts = line.split_whitespace();
                (
                    parts.next().unwrap_or(""),
                    parts.next().unwrap_or(""),
                )
            };
            let az: f64 = az.trim().parse().map_err(|_| PointError::Parse {
                line: i + 1,
                text: line.to_string(),
            })?;
            let alt: f64 = alt.trim().parse().map_err(|_| PointError::Parse {
                line: i + 1,
                text: line.to_string(),
            })?;
            mask.push((az, alt.max(altitude_floor)));
        }
        mask.sort_by(|a, b| a.0.total_cmp(&b.0));
        self.horizon_points = mask;
        Ok(())
    }

    /// Replace the mask with a flat line at the given altitude.
    pub fn set_horizon_floor(&mut self, altitude_floor: f64) {
        self.horizon_points = vec![(0.0, altitude_floor), (360.0, altitude_floor)];
    }

    /// Direct mask replacement, used by the UI editor.
    pub fn set_horizon(&mut self, mut mask: Vec<(f64, f64)>) {
        mask.sort_by(|a, b| a.0.total_cmp(&b.0));
        self.horizon_points = mask;
    }

    // ========================================================================
    // Horizon clipping
    // ========================================================================

    /// Mask altitude at an azimuth: linear interpolation between the two
    /// neighbouring polyline nodes. Outside the polyline's azimuth span
    /// the nearest node extends flat.
    pub fn horizon_altitude_at(&self, az: f64) -> f64 {
        interpolate_polyline(&self.horizon_points, az)
    }

    /// True when a point clears the mask (strictly above it).
    pub fn is_above_horizon(&self, az: f64, alt: f64) -> bool {
        alt > self.horizon_altitude_at(az)
    }

    /// Remove every build point not strictly above the mask.
    pub fn delete_below_horizon_line(&mut self) {
        let mask = self.horizon_points.clone();
        self.model_points
            .retain(|(az, alt)| *alt > interpolate_polyline(&mask, *az));
    }

    // ========================================================================
    // Build-order sorting
    // ========================================================================

    /// Sort into the deterministic build order: west side of the meridian
    /// (az ≥ 180) first, then east, each side ordered by altitude. Keeps
    /// pier flips to the single west→east transition.
    pub fn sort_points(&mut self) {
        let (mut west, mut east): (Vec<_>, Vec<_>) = self
            .model_points
            .drain(..)
            .partition(|(az, _)| *az >= 180.0);
        west.sort_by(|a, b| a.1.total_cmp(&b.1));
        east.sort_by(|a, b| a.1.total_cmp(&b.1));
        west.extend(east);
        self.model_points = west;
    }

    // ========================================================================
    // Generators
    // ========================================================================

    /// Low-density declination-band grid.
    pub fn generate_grid_min(&mut self, lat_deg: f64) {
        self.model_points = dec_band_grid(lat_deg, &[-15.0, 0.0, 15.0, 30.0, 45.0, 60.0, 75.0], 5);
    }

    /// Normal-density declination-band grid.
    pub fn generate_grid_norm(&mut self, lat_deg: f64) {
        self.model_points = dec_band_grid(
            lat_deg,
            &[-15.0, -5.0, 5.0, 15.0, 25.0, 40.0, 55.0, 70.0, 85.0],
            7,
        );
    }

    /// Maximum-density declination-band grid.
    pub fn generate_grid_max(&mut self, lat_deg: f64) {
        self.model_points = dec_band_grid(
            lat_deg,
            &[
                -15.0, -7.5, 0.0, 7.5, 15.0, 22.5, 30.0, 37.5, 45.0, 52.5, 60.0, 67.5, 75.0, 82.5,
            ],
            9,
        );
    }

    /// Trace of a target's path across the sky: the point set follows the
    /// current pointing through the next hours of hour angle.
    pub fn generate_dso_track(
        &mut self,
        ra_j_now: f64,
        dec_j_now: f64,
        lst_hours: f64,
        lat_deg: f64,
        count: usize,
        duration_hours: f64,
    ) {
        let mut points = Vec::with_capacity(count);
        for i in 0..count {
            let future_lst = lst_hours + duration_hours * i as f64 / count.max(1) as f64;
            let ha = (future_lst - ra_j_now).rem_euclid(24.0);
            let (az, alt) = crate::transform::topocentric_to_az_alt(ha, dec_j_now, lat_deg);
            points.push((round2(az), round2(alt)));
        }
        self.model_points = points;
    }

    /// Rectangular az/alt raster between altitude bounds, walked in
    /// boustrophedon order so adjacent points stay adjacent on the sky.
    pub fn generate_rect_grid(&mut self, rows: usize, columns: usize, alt_min: f64, alt_max: f64) {
        let mut points = Vec::with_capacity(rows * columns);
        if rows == 0 || columns == 0 {
            self.model_points = points;
            return;
        }
        let alt_step = if rows > 1 {
            (alt_max - alt_min) / (rows - 1) as f64
        } else {
            0.0
        };
        let az_step = 360.0 / columns as f64;

        for row in 0..rows {
            let alt = alt_min + alt_step * row as f64;
            let mut column_indices: Vec<usize> = (0..columns).collect();
            if row % 2 == 1 {
                column_indices.reverse();
            }
            for col in column_indices {
                let az = az_step * (col as f64 + 0.5);
                points.push((round2(az), round2(alt)));
            }
        }
        self.model_points = points;
    }

    /// Evenly spaced initial points at a fixed altitude.
    pub fn generate_initial_points(&mut self, count: usize, altitude: f64) {
        let mut points = Vec::with_capacity(count);
        if count == 0 {
            self.initial_points = points;
            return;
        }
        let az_step = 360.0 / count as f64;
        for i in 0..count {
            points.push((round2(az_step * (i as f64 + 0.5)), round2(altitude)));
        }
        self.initial_points = points;
    }

    /// Recompute the celestial-equator overlay trace for a site latitude.
    pub fn update_celestial_equator(&mut self, lat_deg: f64) {
        let mut trace = Vec::new();
        let mut ha = -6.0;
        while ha <= 6.0 {
            let (az, alt) = crate::transform::topocentric_to_az_alt(ha, 0.0, lat_deg);
            if alt > 0.0 {
                trace.push((round2(az), round2(alt)));
            }
            ha += 0.5;
        }
        self.celestial_equator = trace;
    }
}

/// Two-decimal rounding used by every generator, matching the native file
/// schema's resolution.
fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Declination-band grid: for each declination, walk the hour-angle range
/// in snake order, keeping points above the 0° horizon.
fn dec_band_grid(lat_deg: f64, decs: &[f64], steps_per_band: usize) -> Vec<(f64, f64)> {
    let mut points = Vec::new();
    for (band, dec) in decs.iter().enumerate() {
        let mut row = Vec::new();
        for i in 0..steps_per_band {
            // HA from -4h to +4h across the band
            let ha = -4.0 + 8.0 * i as f64 / (steps_per_band - 1).max(1) as f64;
            let (az, alt) = crate::transform::topocentric_to_az_alt(ha, *dec, lat_deg);
            if alt > 0.0 {
                row.push((round2(az), round2(alt)));
            }
        }
        if band % 2 == 1 {
            row.reverse();
        }
        points.extend(row);
    }
    points
}

/// Linear interpolation over an azimuth-ordered polyline; flat beyond the
/// span. An empty mask clips nothing (altitude -inf would admit all, but
/// zero keeps semantics simple: no mask, no clipping handled by caller).
fn interpolate_polyline(mask: &[(f64, f64)], az: f64) -> f64 {
    if mask.is_empty() {
        return f64::NEG_INFINITY;
    }
    if az <= mask[0].0 {
        return mask[0].1;
    }
    if let Some(last) = mask.last() {
        if az >= last.0 {
            return last.1;
        }
    }
    for pair in mask.windows(2) {
        let (az0, alt0) = pair[0];
        let (az1, alt1) = pair[1];
        if az >= az0 && az <= az1 {
            if (az1 - az0).abs() < f64::EPSILON {
                return alt0.max(alt1);
            }
            let t = (az - az0) / (az1 - az0);
            return alt0 + t * (alt1 - alt0);
        }
    }
    0.0
}

// ============================================================================
// File schemas
// ============================================================================

fn format_mw3_line(az: f64, alt: f64) -> String {
    format!("MW-3:{:06.2}:{:05.2}", az, alt)
}

/// Parse any of the three point-file schemas, returning `(full, initial)`
/// subsets. Untagged points count as full-model points.
pub fn parse_point_file(text: &str) -> Result<(Vec<(f64, f64)>, Vec<(f64, f64)>), PointError> {
    let first = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'));
    let Some(first) = first else {
        return Ok((Vec::new(), Vec::new()));
    };

    if first.starts_with("MW-3:") {
        parse_mw3(text)
    } else if first.starts_with("GRID") {
        parse_grid(text)
    } else if first.contains(':') {
        parse_legacy(text)
    } else {
        Err(PointError::UnknownFormat)
    }
}

fn parse_mw3(text: &str) -> Result<(Vec<(f64, f64)>, Vec<(f64, f64)>), PointError> {
    let mut full = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let err = || PointError::Parse {
            line: i + 1,
            text: line.to_string(),
        };
        let rest = line.strip_prefix("MW-3:").ok_or_else(err)?;
        let mut parts = rest.splitn(2, ':');
        let az: f64 = parts
            .next()
            .and_then(|p| p.trim().parse().ok())
            .ok_or_else(err)?;
        let alt: f64 = parts
            .next()
            .and_then(|p| p.trim().parse().ok())
            .ok_or_else(err)?;
        full.push((az, alt));
    }
    Ok((full, Vec::new()))
}

fn parse_legacy(text: &str) -> Result<(Vec<(f64, f64)>, Vec<(f64, f64)>), PointError> {
    let mut full = Vec::new();
    let mut initial = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let err = || PointError::Parse {
            line: i + 1,
            text: line.to_string(),
        };
        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() != 2 && parts.len() != 3 {
            return Err(err());
        }
        let az: f64 = parts[0].trim().parse().map_err(|_| err())?;
        let alt: f64 = parts[1].trim().parse().map_err(|_| err())?;
        let kind = match parts.get(2).map(|t| t.trim()) {
            Some("1") => PointKind::Initial,
            _ => PointKind::Full,
        };
        match kind {
            PointKind::Initial => initial.push((az, alt)),
            PointKind::Full => full.push((az, alt)),
        }
    }
    Ok((full, initial))
}

/// External `GRID … az alt` export: the last two whitespace tokens of each
/// `GRID` line are azimuth and altitude.
fn parse_grid(text: &str) -> Result<(Vec<(f64, f64)>, Vec<(f64, f64)>), PointError> {
    // Allowed once per process would be nicer, but point files are tiny.
    let re = Regex::new(r"^GRID\s.*\s(\d+(?:\.\d+)?)\s+(-?\d+(?:\.\d+)?)\s*$")
        .map_err(|_| PointError::UnknownFormat)?;
    let mut full = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || !line.starts_with("GRID") {
            continue;
        }
        let caps = re.captures(line).ok_or_else(|| PointError::Parse {
            line: i + 1,
            text: line.to_string(),
        })?;
        let az: f64 = caps[1].parse().map_err(|_| PointError::Parse {
            line: i + 1,
            text: line.to_string(),
        })?;
        let alt: f64 = caps[2].parse().map_err(|_| PointError::Parse {
            line: i + 1,
            text: line.to_string(),
        })?;
        full.push((az, alt));
    }
    Ok((full, Vec::new()))
}

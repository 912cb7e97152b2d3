//! Shared mount state.
//!
//! One process-wide [`MountData`] struct behind a single reader-writer lock.
//! Writers are the link parsers (each field has exactly one responsible
//! link); readers are the dispatcher, the build pipeline, and the UI
//! adapter. Callers copy a [`snapshot`](MountData::snapshot) out instead of
//! holding the lock across I/O.

use crate::config::defaults::DEFAULT_MOUNT_PORT;
use crate::types::{AlignmentModel, MountStatus, Pierside};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Process-wide handle to the shared mount state.
pub type SharedMountData = Arc<RwLock<MountData>>;

/// Snapshot of everything the mount reports, plus the parsed alignment
/// model. Mutated only by the responsible links, except during an IP
/// reconfiguration which pauses every link first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountData {
    // ---- Identity ----
    pub mount_ip: String,
    pub mount_port: u16,
    pub mount_mac: String,
    /// Firmware encoded as major·10000 + minor·100 + patch.
    /// 0 means "unknown; treat as pre-21500".
    pub fw: u32,
    pub fw_date: String,
    pub fw_number: String,
    pub product_name: String,
    pub fw_time: String,
    pub hardware_version: String,

    // ---- Site ----
    /// Sexagesimal, as shown to the user (east longitude positive here,
    /// negative on the wire — see [`invert_longitude_sign`]).
    pub site_latitude: String,
    pub site_longitude: String,
    /// Meters above sea level.
    pub site_height: f64,
    /// Decimal degrees, derived whenever the strings are set.
    pub site_latitude_deg: f64,
    pub site_longitude_deg: f64,

    // ---- Time ----
    pub julian_date: String,
    pub local_sidereal_time: String,

    // ---- Pointing ----
    pub ra_j_now: f64,
    pub dec_j_now: f64,
    pub ra_j2000: f64,
    pub dec_j2000: f64,
    pub az: f64,
    pub alt: f64,
    pub pierside: Pierside,
    pub status: MountStatus,
    pub slewing: bool,

    // ---- Environment at the mount ----
    pub refraction_temperature: String,
    pub refraction_pressure: String,
    /// Refraction correction switch on the mount (`:GREF#`).
    pub refraction_on: bool,
    pub telescope_temp_dec: String,

    // ---- Rates and switches ----
    pub slew_rate: f64,
    pub tracking_rate: f64,
    pub unattended_flip: bool,
    pub dual_axis_tracking: bool,
    pub horizon_limit_high: f64,
    pub horizon_limit_low: f64,
    /// UTC data validity flag and expiration date (firmware ≥ 21500).
    pub utc_data_valid: bool,
    pub utc_data_expiration: String,

    // ---- Limits ----
    /// Degrees past the meridian tracking may continue.
    pub meridian_limit_guide: f64,
    /// Degrees past the meridian a slew may target.
    pub meridian_limit_slew: f64,
    /// Minutes until the meridian flip.
    pub time_to_flip: f64,
    /// Minutes until the meridian itself (derived from the guide limit).
    pub time_to_meridian: f64,

    // ---- Alignment model ----
    pub model: AlignmentModel,
    /// True while a model download is in flight; flips back only after the
    /// full parsed batch is committed under the write lock.
    pub model_loading: bool,
    /// Named-model catalog (≤ 50 entries).
    pub model_names: Vec<String>,
    /// Count of names present on the mount, from `:modelcnt#`.
    pub model_name_count: usize,

    // ---- Polar-alignment aid ----
    /// Bright alignment stars as (name, az, alt), refreshed by the slow poll.
    pub alignment_star_positions: Vec<(String, f64, f64)>,
}

impl Default for MountData {
    fn default() -> Self {
        Self {
            mount_ip: String::new(),
            mount_port: DEFAULT_MOUNT_PORT,
            mount_mac: String::new(),
            fw: 0,
            fw_date: String::new(),
            fw_number: String::new(),
            product_name: String::new(),
            fw_time: String::new(),
            hardware_version: String::new(),
            site_latitude: String::new(),
            site_longitude: String::new(),
            site_height: 0.0,
            site_latitude_deg: 0.0,
            site_longitude_deg: 0.0,
            julian_date: String::new(),
            local_sidereal_time: String::new(),
            ra_j_now: 0.0,
            dec_j_now: 0.0,
            ra_j2000: 0.0,
            dec_j2000: 0.0,
            az: 0.0,
            alt: 0.0,
            pierside: Pierside::default(),
            status: MountStatus::default(),
            slewing: false,
            refraction_temperature: String::new(),
            refraction_pressure: String::new(),
            refraction_on: false,
            telescope_temp_dec: String::new(),
            slew_rate: 0.0,
            tracking_rate: 0.0,
            unattended_flip: false,
            dual_axis_tracking: false,
            horizon_limit_high: 0.0,
            horizon_limit_low: 0.0,
            utc_data_valid: false,
            utc_data_expiration: String::new(),
            meridian_limit_guide: 0.0,
            meridian_limit_slew: 0.0,
            time_to_flip: 0.0,
            time_to_meridian: 0.0,
            model: AlignmentModel::default(),
            model_loading: false,
            model_names: Vec::new(),
            model_name_count: 0,
            alignment_star_positions: Vec::new(),
        }
    }
}

impl MountData {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            mount_ip: host.to_string(),
            mount_port: port,
            ..Self::default()
        }
    }

    /// Wrap in the process-wide shared handle.
    pub fn into_shared(self) -> SharedMountData {
        Arc::new(RwLock::new(self))
    }

    /// Copy the whole state out. Preferred over holding the read lock
    /// across anything slower than a field access.
    pub fn snapshot(&self) -> MountData {
        self.clone()
    }

    /// Install site coordinates from their user-facing sexagesimal forms,
    /// keeping the derived decimal fields in sync.
    pub fn set_site(&mut self, latitude: String, longitude: String, height: f64) {
        self.site_latitude_deg = crate::transform::deg_string_to_decimal(&latitude, ':');
        self.site_longitude_deg = crate::transform::deg_string_to_decimal(&longitude, ':');
        self.site_latitude = latitude;
        self.site_longitude = longitude;
        self.site_height = height;
    }

    /// Site longitude in the wire convention (east negative), for commands
    /// that send it back to the mount.
    pub fn site_longitude_wire(&self) -> String {
        invert_longitude_sign(&self.site_longitude)
    }

    /// True when firmware supports `:getain#` / `:GDUTV#`.
    pub fn fw_has_getain(&self) -> bool {
        self.fw >= crate::config::defaults::FW_GETAIN
    }
}

/// Flip the sign convention of a sexagesimal longitude string.
///
/// The 10micron wire format counts east longitudes negative; MountData
/// stores the user-facing convention (east positive). The same flip is
/// applied in both directions and must be preserved exactly.
pub fn invert_longitude_sign(longitude: &str) -> String {
    if let Some(rest) = longitude.strip_prefix('-') {
        format!("+{}", rest)
    } else if let Some(rest) = longitude.strip_prefix('+') {
        format!("-{}", rest)
    } else if longitude.is_empty() {
        String::new()
    } else {
        format!("-{}", longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longitude_sign_inversion() {
        // An east site arrives with a leading '-' on the wire
        assert_eq!(invert_longitude_sign("-011:42:17.3"), "+011:42:17.3");
        assert_eq!(invert_longitude_sign("+011:42:17.3"), "-011:42:17.3");
        // Unsigned strings count as west (positive) and gain a '-'
        assert_eq!(invert_longitude_sign("011:42:17.3"), "-011:42:17.3");
        assert_eq!(invert_longitude_sign(""), "");
    }

    #[test]
    fn test_inversion_is_involutive() {
        let wire = "-011:42:17.3";
        let stored = invert_longitude_sign(wire);
        assert_eq!(invert_longitude_sign(&stored), wire);
    }

    #[test]
    fn test_set_site_derives_decimals() {
        let mut data = MountData::default();
        data.set_site("+48:07:00".into(), "+011:42:17.3".into(), 580.0);
        assert!((data.site_latitude_deg - 48.116_666).abs() < 1e-4);
        assert!((data.site_longitude_deg - 11.704_805).abs() < 1e-4);
        assert_eq!(data.site_longitude_wire(), "-011:42:17.3");
    }

    #[test]
    fn test_fw_gate() {
        let mut data = MountData::default();
        assert!(!data.fw_has_getain());
        data.fw = 21_500;
        assert!(data.fw_has_getain());
        data.fw = 21_499;
        assert!(!data.fw_has_getain());
    }
}

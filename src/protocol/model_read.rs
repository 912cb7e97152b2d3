//! Alignment-model download.
//!
//! Pulls the mount's pointing model: `:getalst#` plus one `:getalpX#` per
//! point, and on firmware ≥ 21500 the `:getain#` aggregate statistics.
//! The parsed batch commits to MountData in one write-lock section;
//! `model_loading` stays true for exactly that window.

use super::firmware::Firmware;
use super::link::MountLink;
use super::{CommandTemplate, ProtocolError};
use crate::data::SharedMountData;
use crate::events::{EventBus, MountEvent};
use crate::types::{AlignPoint, ModelStats};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Synthetic `:getain#` reply used when the firmware has no such command:
/// every field unavailable.
const GETAIN_UNAVAILABLE: &str = "E,E,E,E,E,E,E,E,E";

/// Parse a numeric field where the literal `E` means "unavailable" and is
/// stored as zero.
fn field_or_zero(s: &str) -> f64 {
    let t = s.trim();
    if t == "E" {
        return 0.0;
    }
    t.parse().unwrap_or(0.0)
}

/// Parse one `:getalpX#` reply:
/// `HA,DEC_with_asterisks_for_colons,ErrorRMS,ErrorAngle`.
///
/// Needs the current LST (to turn the stored hour angle into RA) and the
/// site latitude (for the topocentric conversion).
pub fn parse_align_point(
    field: &str,
    lst_hours: f64,
    lat_deg: f64,
) -> Result<(AlignPoint, f64, f64), ProtocolError> {
    let parts: Vec<&str> = field.trim().split(',').collect();
    if parts.len() != 4 {
        return Err(ProtocolError::Parse(format!(
            "getalp expects 4 comma fields, got {}: {:?}",
            parts.len(),
            field
        )));
    }

    let ha_hours = crate::transform::deg_string_to_decimal(parts[0], ':');
    let dec_text = parts[1].replace('*', ":");
    let dec_deg = crate::transform::deg_string_to_decimal(&dec_text, ':');
    let error = field_or_zero(parts[2]);
    let error_angle = field_or_zero(parts[3]);

    let ra_j_now = (lst_hours - ha_hours).rem_euclid(24.0);
    let (azimuth, altitude) = crate::transform::topocentric_to_az_alt(ha_hours, dec_deg, lat_deg);

    Ok((
        AlignPoint {
            azimuth,
            altitude,
            error,
            error_angle,
        },
        ra_j_now,
        dec_deg,
    ))
}

/// Parse the `:getain#` 9-tuple into the aggregate model statistics.
pub fn parse_getain(field: &str) -> Result<ModelStats, ProtocolError> {
    let parts: Vec<&str> = field.trim().split(',').collect();
    if parts.len() != 9 {
        return Err(ProtocolError::Parse(format!(
            "getain expects 9 comma fields, got {}: {:?}",
            parts.len(),
            field
        )));
    }
    Ok(ModelStats {
        error_azimuth: field_or_zero(parts[0]),
        error_altitude: field_or_zero(parts[1]),
        polar_error: field_or_zero(parts[2]),
        pos_angle: field_or_zero(parts[3]),
        ortho_error: field_or_zero(parts[4]),
        azimuth_knobs: field_or_zero(parts[5]),
        altitude_knobs: field_or_zero(parts[6]),
        terms: field_or_zero(parts[7]),
        rms: field_or_zero(parts[8]),
    })
}

/// The model-download protocol engine.
pub struct ModelReadLink {
    link: MountLink,
    data: SharedMountData,
    events: EventBus,
}

impl ModelReadLink {
    pub fn new(link: MountLink, data: SharedMountData, events: EventBus) -> Self {
        Self { link, data, events }
    }

    /// Download the whole model and commit it to MountData.
    ///
    /// `model_loading` flips true before the first byte goes out and back
    /// to false only after the batch committed (or on failure).
    pub async fn read_model(&mut self) -> Result<(), ProtocolError> {
        let (firmware, lst_hours, lat_deg) = {
            let mut data = self.data.write().await;
            data.model_loading = true;
            (
                Firmware(data.fw),
                crate::transform::deg_string_to_decimal(&data.local_sidereal_time, ':'),
                data.site_latitude_deg,
            )
        };

        let result = self.read_model_inner(firmware, lst_hours, lat_deg).await;

        if result.is_err() {
            // Leave the previous model intact; just release the loading flag
            self.data.write().await.model_loading = false;
        }
        result
    }

    async fn read_model_inner(
        &mut self,
        firmware: Firmware,
        lst_hours: f64,
        lat_deg: f64,
    ) -> Result<(), ProtocolError> {
        self.link.ensure_connected().await?;

        // Fresh star count first: a delete may have shrunk the model since
        // the last medium poll, and over-asking answers `E`.
        let mut count_template = CommandTemplate::new();
        count_template.push(":getalst#");
        let count_fields = self.link.exchange(&count_template).await?;
        let point_count: usize = count_fields
            .first()
            .and_then(|f| f.trim().parse().ok())
            .unwrap_or(0);

        let mut template = CommandTemplate::new();
        for i in 1..=point_count {
            template.push(&format!(":getalp{}#", i));
        }
        if firmware.has_getain() && point_count > 0 {
            template.push(":getain#");
        }

        let fields = if template.is_empty() {
            Vec::new()
        } else {
            self.link.exchange(&template).await?
        };
        if fields.len() != template.expected() {
            return Err(ProtocolError::Parse(format!(
                "model read expects {} fields, got {}",
                template.expected(),
                fields.len()
            )));
        }

        let mut points = Vec::with_capacity(point_count);
        for field in &fields[..point_count] {
            let (point, _ra, _dec) = parse_align_point(field, lst_hours, lat_deg)?;
            points.push(point);
        }

        let stats = if firmware.has_getain() && point_count > 0 {
            parse_getain(&fields[point_count])?
        } else {
            parse_getain(GETAIN_UNAVAILABLE)?
        };

        let committed = points.len();
        {
            let mut data = self.data.write().await;
            data.model.commit(points, committed, stats);
            debug_assert!(data.model.is_consistent());
            data.model_loading = false;
        }

        debug!(points = committed, rms = stats.rms, "Alignment model committed");
        self.events.publish(MountEvent::ModelRead);
        Ok(())
    }

    /// Worker loop: download on every trigger until cancellation.
    pub async fn run(mut self, mut trigger: mpsc::Receiver<()>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                request = trigger.recv() => {
                    if request.is_none() {
                        break;
                    }
                    if let Err(e) = self.read_model().await {
                        warn!(error = %e, "Model download failed");
                    }
                }
            }
        }
        self.link.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_align_point() {
        // HA 1h east of the meridian, dec with '*' separators
        let (point, ra, dec) =
            parse_align_point("01:00:00.0,+45*30:00.0,0012.5,+090.0", 13.0, 48.0).expect("parse");
        assert!((ra - 12.0).abs() < 1e-9);
        assert!((dec - 45.5).abs() < 1e-9);
        assert!((point.error - 12.5).abs() < 1e-9);
        assert!((point.error_angle - 90.0).abs() < 1e-9);
        assert!((0.0..360.0).contains(&point.azimuth));
        assert!(point.altitude > 0.0);
    }

    #[test]
    fn test_parse_align_point_rejects_wrong_arity() {
        assert!(parse_align_point("01:00:00,+45*30:00", 0.0, 48.0).is_err());
    }

    #[test]
    fn test_parse_getain() {
        let stats =
            parse_getain("0012.3,-0005.1,0003.2,045.0,0001.0,2.5,-1.5,18,0006.8").expect("parse");
        assert!((stats.error_azimuth - 12.3).abs() < 1e-9);
        assert!((stats.error_altitude + 5.1).abs() < 1e-9);
        assert!((stats.polar_error - 3.2).abs() < 1e-9);
        assert!((stats.terms - 18.0).abs() < 1e-9);
        assert!((stats.rms - 6.8).abs() < 1e-9);
    }

    #[test]
    fn test_parse_getain_unavailable_fields() {
        // Every 'E' stores as zero
        let stats = parse_getain(GETAIN_UNAVAILABLE).expect("parse");
        assert_eq!(stats.rms, 0.0);
        assert_eq!(stats.polar_error, 0.0);
        assert_eq!(stats.terms, 0.0);
    }

    #[test]
    fn test_parse_getain_mixed() {
        let stats = parse_getain("E,E,0003.2,E,E,E,E,E,0006.8").expect("parse");
        assert_eq!(stats.error_azimuth, 0.0);
        assert!((stats.polar_error - 3.2).abs() < 1e-9);
        assert!((stats.rms - 6.8).abs() < 1e-9);
    }
}

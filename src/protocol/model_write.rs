//! Alignment-model upload.
//!
//! Programs a batch of solved build points into the mount:
//!
//! ```text
//! :newalig#
//! :newalpt<RaJNow>,<DecJNow>,<Pierside>,<RaJNowSolved>,<DecJNowSolved>,<LST>#   (×N)
//! :endalig#
//! :getalst#
//! ```
//!
//! One `V` for `newalig`, one single-character reply per point (`E` on
//! reject), a final `V` for `endalig`, and the fresh star count — N+3
//! reply fields total. Firmware older than 2.8.15 refuses the sequence,
//! so the link refuses first.

use super::firmware::Firmware;
use super::link::MountLink;
use super::{CommandTemplate, ProtocolError};
use crate::config::defaults::FW_MODEL_UPLOAD;
use crate::data::SharedMountData;
use crate::transform::decimal_to_degree;
use crate::types::Pierside;
use tracing::{debug, warn};

/// One point of an upload batch, already reduced to the wire quantities.
#[derive(Debug, Clone, Copy)]
pub struct ProgramPoint {
    pub ra_j_now: f64,
    pub dec_j_now: f64,
    pub pierside: Pierside,
    pub ra_j_now_solved: f64,
    pub dec_j_now_solved: f64,
    /// LST at exposure, decimal hours.
    pub lst_hours: f64,
}

impl ProgramPoint {
    /// The `:newalpt…#` command for this point. All five coordinate
    /// fields go out in fixed-width sexagesimal.
    pub fn to_command(&self) -> String {
        format!(
            ":newalpt{},{},{},{},{},{}#",
            decimal_to_degree(self.ra_j_now, false, true, ':'),
            decimal_to_degree(self.dec_j_now, true, false, ':'),
            self.pierside.to_wire(),
            decimal_to_degree(self.ra_j_now_solved, false, true, ':'),
            decimal_to_degree(self.dec_j_now_solved, true, false, ':'),
            decimal_to_degree(self.lst_hours, false, true, ':'),
        )
    }
}

/// Outcome of a completed upload.
#[derive(Debug, Clone)]
pub struct ProgramOutcome {
    /// `:endalig#` confirmed the model.
    pub success: bool,
    /// Fresh `:getalst#` count after the upload.
    pub star_count: usize,
    /// Zero-based indices of points the mount rejected with `E`.
    pub rejected: Vec<usize>,
}

/// The model-upload protocol engine.
pub struct ModelWriteLink {
    link: MountLink,
    data: SharedMountData,
}

impl ModelWriteLink {
    pub fn new(link: MountLink, data: SharedMountData) -> Self {
        Self { link, data }
    }

    /// Upload a batch and return the outcome.
    ///
    /// Refuses on firmware < 2.8.15 and on an empty batch; MountData is
    /// left untouched in both cases.
    pub async fn program_model(
        &mut self,
        points: &[ProgramPoint],
    ) -> Result<ProgramOutcome, ProtocolError> {
        let firmware = Firmware(self.data.read().await.fw);
        if !firmware.supports_model_upload() {
            return Err(ProtocolError::FirmwareUnsupported {
                operation: "model upload",
                required: FW_MODEL_UPLOAD,
                found: firmware.value(),
            });
        }
        if points.is_empty() {
            return Err(ProtocolError::Rejected("empty model batch".to_string()));
        }

        self.link.ensure_connected().await?;

        let mut template = CommandTemplate::new();
        template.push(":newalig#");
        for point in points {
            template.push(&point.to_command());
        }
        template.push(":endalig#");
        template.push(":getalst#");

        debug!(points = points.len(), "Uploading alignment model");
        let fields = self.link.exchange(&template).await?;
        // N+3: newalig + N×newalpt + endalig + getalst
        if fields.len() != points.len() + 3 {
            return Err(ProtocolError::Parse(format!(
                "model upload expects {} fields, got {}",
                points.len() + 3,
                fields.len()
            )));
        }

        if fields[0].trim() != "V" {
            return Err(ProtocolError::Rejected(
                "mount refused :newalig#".to_string(),
            ));
        }

        let rejected: Vec<usize> = fields[1..=points.len()]
            .iter()
            .enumerate()
            .filter(|(_, reply)| reply.trim() != "V")
            .map(|(i, _)| i)
            .collect();
        if !rejected.is_empty() {
            warn!(rejected = ?rejected, "Mount rejected alignment points");
        }

        let success = fields[points.len() + 1].trim() == "V";
        let star_count: usize = fields[points.len() + 2].trim().parse().unwrap_or(0);

        if success {
            self.data.write().await.model.number_alignment_stars = star_count;
        }

        Ok(ProgramOutcome {
            success,
            star_count,
            rejected,
        })
    }

    pub fn link_mut(&mut self) -> &mut MountLink {
        &mut self.link
    }

    pub async fn shutdown(&mut self) {
        self.link.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_point_command_format() {
        let point = ProgramPoint {
            ra_j_now: 12.5,
            dec_j_now: -5.25,
            pierside: Pierside::West,
            ra_j_now_solved: 12.501,
            dec_j_now_solved: -5.26,
            lst_hours: 14.0,
        };
        let cmd = point.to_command();
        assert!(cmd.starts_with(":newalpt12:30:00.0,-05:15:00,W,"));
        assert!(cmd.ends_with(",14:00:00.0#"));
        // six comma-separated payload fields
        let payload = cmd.trim_start_matches(":newalpt").trim_end_matches('#');
        assert_eq!(payload.split(',').count(), 6);
    }
}

//! Fast pointing poll (750 ms).
//!
//! `:U2#:GS#:Ginfo#` — sets high precision, reads LST, then the composite
//! pointing snapshot. The parser drives the slew-finished edge detection
//! and the one-shot alert on entering a stopped/unknown/error status.

use super::link::MountLink;
use super::poll::{PollCadence, Poller};
use super::{CommandTemplate, ProtocolError};
use crate::config::defaults::{FAST_PERIOD_MS, GINFO_MIN_LEN};
use crate::data::SharedMountData;
use crate::events::{EventBus, MessageSeverity, MountEvent};
use crate::types::{MountStatus, Pierside};
use async_trait::async_trait;
use std::time::Duration;

/// Decoded `:Ginfo#` reply.
#[derive(Debug, Clone, PartialEq)]
pub struct GinfoReply {
    /// Right ascension, JNow, decimal hours.
    pub ra_hours: f64,
    /// Declination, JNow, decimal degrees.
    pub dec_deg: f64,
    pub pierside: Pierside,
    pub az: f64,
    pub alt: f64,
    pub julian_date: String,
    pub status: MountStatus,
    pub slewing: bool,
}

/// Parse the composite `Ginfo` field:
/// `RA,DEC,PierSide,Az,Alt,JulianDate,Status,SlewFlag`.
pub fn parse_ginfo(field: &str) -> Result<GinfoReply, ProtocolError> {
    let parts: Vec<&str> = field.trim().split(',').collect();
    if parts.len() != 8 {
        return Err(ProtocolError::Parse(format!(
            "Ginfo expects 8 comma fields, got {}: {:?}",
            parts.len(),
            field
        )));
    }

    let num = |s: &str, name: &str| -> Result<f64, ProtocolError> {
        s.trim()
            .parse()
            .map_err(|_| ProtocolError::Parse(format!("Ginfo {} field: {:?}", name, s)))
    };

    let status_code: u8 = parts[6]
        .trim()
        .parse()
        .map_err(|_| ProtocolError::Parse(format!("Ginfo status field: {:?}", parts[6])))?;

    Ok(GinfoReply {
        ra_hours: num(parts[0], "RA")?,
        dec_deg: num(parts[1], "Dec")?,
        pierside: Pierside::from_wire(parts[2])
            .ok_or_else(|| ProtocolError::Parse(format!("Ginfo pierside: {:?}", parts[2])))?,
        az: num(parts[3], "Az")?,
        alt: num(parts[4], "Alt")?,
        julian_date: parts[5].trim().to_string(),
        status: MountStatus::from_code(status_code),
        slewing: parts[7].trim() == "1",
    })
}

/// The fast polling link.
pub struct FastPoller {
    data: SharedMountData,
    events: EventBus,
    last_slewing: Option<bool>,
    last_status: Option<MountStatus>,
}

impl FastPoller {
    pub fn new(data: SharedMountData, events: EventBus) -> Self {
        Self {
            data,
            events,
            last_slewing: None,
            last_status: None,
        }
    }

    fn template() -> CommandTemplate {
        let mut t = CommandTemplate::new();
        t.push_blind(":U2#").push(":GS#").push(":Ginfo#");
        t
    }

    async fn apply(&mut self, lst: String, ginfo: GinfoReply) {
        let now = chrono::Utc::now();
        let (ra_j2000, dec_j2000) =
            crate::transform::jnow_to_j2000(ginfo.ra_hours, ginfo.dec_deg, &now);

        {
            let mut data = self.data.write().await;
            data.local_sidereal_time = lst;
            data.ra_j_now = ginfo.ra_hours;
            data.dec_j_now = ginfo.dec_deg;
            data.ra_j2000 = ra_j2000;
            data.dec_j2000 = dec_j2000;
            data.pierside = ginfo.pierside;
            data.az = ginfo.az;
            data.alt = ginfo.alt;
            data.julian_date = ginfo.julian_date.clone();
            data.status = ginfo.status;
            data.slewing = ginfo.slewing;
        }

        // Falling edge of the slewing flag
        if self.last_slewing == Some(true) && !ginfo.slewing {
            self.events.publish(MountEvent::SlewFinished);
        }
        self.last_slewing = Some(ginfo.slewing);

        // Alert states fire once per entry
        if ginfo.status.is_alert() && self.last_status != Some(ginfo.status) {
            self.events.publish(MountEvent::Alert(ginfo.status));
            self.events.message(
                MessageSeverity::Warning,
                format!("Mount status: {}", ginfo.status),
            );
        }
        self.last_status = Some(ginfo.status);
    }
}

#[async_trait]
impl Poller for FastPoller {
    fn name(&self) -> &'static str {
        "fast"
    }

    fn cadence(&self) -> PollCadence {
        PollCadence::Periodic(Duration::from_millis(FAST_PERIOD_MS))
    }

    async fn cycle(&mut self, link: &mut MountLink) -> Result<(), ProtocolError> {
        let fields = link.exchange(&Self::template()).await?;
        if fields.len() != 2 {
            return Err(ProtocolError::Parse(format!(
                "fast poll expects 2 fields, got {}",
                fields.len()
            )));
        }
        // A complete snapshot (LST + Ginfo) is never shorter than this;
        // less means a truncated reply slipped through the framing.
        if fields[0].len() + fields[1].len() + 2 < GINFO_MIN_LEN {
            return Err(ProtocolError::Parse(format!(
                "fast poll reply too short: {} + {}",
                fields[0], fields[1]
            )));
        }
        let ginfo = parse_ginfo(&fields[1])?;
        self.apply(fields[0].clone(), ginfo).await;
        Ok(())
    }
}

//! Medium status poll (3 s).
//!
//! Reads slew rate, meridian limits, refraction parameters, tracking
//! switches, horizon limits, the model-name count and the alignment-star
//! count. Publishes change events that make the model links refresh, and
//! optionally pushes fresh refraction T/P to the mount according to the
//! configured policy.

use super::link::MountLink;
use super::poll::{PollCadence, Poller};
use super::{CommandTemplate, ProtocolError};
use crate::config::defaults::{
    MEDIUM_PERIOD_MS, REFRACTION_PRESSURE_MAX, REFRACTION_PRESSURE_MIN, REFRACTION_TEMP_MAX,
    REFRACTION_TEMP_MIN,
};
use crate::data::SharedMountData;
use crate::devices::Environment;
use crate::events::{EventBus, MountEvent};
use crate::types::RefractionMode;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Number of reply fields without the firmware-gated `:GDUTV#`.
const BASE_FIELDS: usize = 15;

/// The medium polling link.
pub struct MediumPoller {
    data: SharedMountData,
    events: EventBus,
    environment: Option<Arc<dyn Environment>>,
}

impl MediumPoller {
    pub fn new(
        data: SharedMountData,
        events: EventBus,
        environment: Option<Arc<dyn Environment>>,
    ) -> Self {
        Self {
            data,
            events,
            environment,
        }
    }

    fn template(with_dutv: bool) -> CommandTemplate {
        let mut t = CommandTemplate::new();
        t.push(":GMs#")
            .push(":Gmte#")
            .push(":Glmt#")
            .push(":Glms#")
            .push(":GRTMP#")
            .push(":GRPRS#")
            .push(":GT#")
            .push(":GTMP1#")
            .push(":GREF#")
            .push(":Guaf#")
            .push(":Gdat#")
            .push(":Gh#")
            .push(":Go#")
            .push(":modelcnt#")
            .push(":getalst#");
        if with_dutv {
            t.push(":GDUTV#");
        }
        t
    }

    /// Push refraction parameters to the mount when the policy and the
    /// validated ranges allow it.
    async fn maybe_push_refraction(&self, link: &mut MountLink) -> Result<(), ProtocolError> {
        let Some(environment) = self.environment.as_ref() else {
            return Ok(());
        };

        let mode = crate::config::get().refraction.mode;
        let tracking = self.data.read().await.status.is_tracking();
        let push = match mode {
            RefractionMode::Continuous => true,
            RefractionMode::NotTracking => !tracking,
            RefractionMode::None => false,
        };
        if !push {
            return Ok(());
        }

        let Some((temperature, pressure)) = environment.conditions().await else {
            return Ok(());
        };

        if !(REFRACTION_PRESSURE_MIN..=REFRACTION_PRESSURE_MAX).contains(&pressure) {
            tracing::warn!(pressure, "Refraction pressure outside valid range — skipped");
            return Ok(());
        }
        if temperature <= REFRACTION_TEMP_MIN || temperature >= REFRACTION_TEMP_MAX {
            tracing::warn!(temperature, "Refraction temperature outside valid range — skipped");
            return Ok(());
        }

        link.send_blind(&format!(":SRPRS{:04.1}#", pressure)).await?;
        link.send_blind(&format!(":SRTMP{:+04.1}#", temperature))
            .await?;
        tracing::debug!(temperature, pressure, "Refraction parameters pushed");
        Ok(())
    }

    async fn apply(&self, fields: &[String], with_dutv: bool) {
        let float = |s: &str| -> Option<f64> { s.trim().parse().ok() };
        let flag = |s: &str| -> bool { s.trim() == "1" };

        let name_count: Option<usize> = fields[13].trim().parse().ok();
        let star_count: Option<usize> = fields[14].trim().parse().ok();

        let (names_changed, stars_changed) = {
            let mut data = self.data.write().await;

            if let Some(v) = float(&fields[0]) {
                data.slew_rate = v;
            }
            if let Some(v) = float(&fields[1]) {
                data.time_to_flip = v;
            }
            if let Some(v) = float(&fields[2]) {
                data.meridian_limit_guide = v;
            }
            if let Some(v) = float(&fields[3]) {
                data.meridian_limit_slew = v;
            }
            // Minutes to the meridian itself: the flip countdown minus the
            // tracked degrees past it, converted to sidereal minutes.
            data.time_to_meridian =
                data.time_to_flip - data.meridian_limit_guide / 360.0 * 24.0 * 60.0;

            data.refraction_temperature = fields[4].trim().to_string();
            data.refraction_pressure = fields[5].trim().to_string();
            if let Some(v) = float(&fields[6]) {
                data.tracking_rate = v;
            }
            data.telescope_temp_dec = fields[7].trim().to_string();
            data.refraction_on = flag(&fields[8]);
            data.unattended_flip = flag(&fields[9]);
            data.dual_axis_tracking = flag(&fields[10]);
            if let Some(v) = float(&fields[11]) {
                data.horizon_limit_high = v;
            }
            if let Some(v) = float(&fields[12]) {
                data.horizon_limit_low = v;
            }

            let names_changed = match name_count {
                Some(count) if count != data.model_name_count => {
                    data.model_name_count = count;
                    true
                }
                _ => false,
            };
            let stars_changed = match star_count {
                Some(count) if count != data.model.number_alignment_stars => {
                    data.model.number_alignment_stars = count;
                    true
                }
                _ => false,
            };

            if with_dutv {
                if let Some(dutv) = fields.get(BASE_FIELDS) {
                    let mut parts = dutv.splitn(2, ',');
                    data.utc_data_valid = parts.next().map(str::trim) == Some("V");
                    data.utc_data_expiration =
                        parts.next().map(str::trim).unwrap_or("").to_string();
                }
            }

            (names_changed, stars_changed)
        };

        if names_changed {
            self.events.publish(MountEvent::ModelNamesChanged);
        }
        if stars_changed {
            if let Some(count) = star_count {
                self.events.publish(MountEvent::AlignmentStarsChanged(count));
            }
        }
    }
}

#[async_trait]
impl Poller for MediumPoller {
    fn name(&self) -> &'static str {
        "medium"
    }

    fn cadence(&self) -> PollCadence {
        PollCadence::Periodic(Duration::from_millis(MEDIUM_PERIOD_MS))
    }

    async fn cycle(&mut self, link: &mut MountLink) -> Result<(), ProtocolError> {
        self.maybe_push_refraction(link).await?;

        let with_dutv = self.data.read().await.fw_has_getain();
        let template = Self::template(with_dutv);
        let fields = link.exchange(&template).await?;
        if fields.len() != template.expected() {
            return Err(ProtocolError::Parse(format!(
                "medium poll expects {} fields, got {}",
                template.expected(),
                fields.len()
            )));
        }
        self.apply(&fields, with_dutv).await;
        Ok(())
    }
}

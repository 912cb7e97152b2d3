//! Slow settings poll (10 s).
//!
//! Re-reads the mount switches and temperatures that change rarely, and
//! refreshes the topocentric positions of the bright alignment stars used
//! by the polar-alignment aid.

use super::link::MountLink;
use super::poll::{PollCadence, Poller};
use super::{CommandTemplate, ProtocolError};
use crate::config::defaults::SLOW_PERIOD_MS;
use crate::data::SharedMountData;
use async_trait::async_trait;
use std::time::Duration;

/// Bright alignment stars, ICRS J2000 (RA hours, Dec degrees). Arcminute
/// accuracy is plenty for the polar-alignment picker.
pub const ALIGNMENT_STARS: &[(&str, f64, f64)] = &[
    ("Polaris", 2.530, 89.264),
    ("Achernar", 1.629, -57.237),
    ("Hamal", 2.120, 23.462),
    ("Mirfak", 3.405, 49.861),
    ("Aldebaran", 4.599, 16.509),
    ("Rigel", 5.242, -8.202),
    ("Capella", 5.278, 45.998),
    ("Betelgeuse", 5.919, 7.407),
    ("Sirius", 6.752, -16.716),
    ("Castor", 7.577, 31.888),
    ("Procyon", 7.655, 5.225),
    ("Pollux", 7.755, 28.026),
    ("Regulus", 10.139, 11.967),
    ("Dubhe", 11.062, 61.751),
    ("Spica", 13.420, -11.161),
    ("Alkaid", 13.792, 49.313),
    ("Arcturus", 14.261, 19.182),
    ("Kochab", 14.845, 74.156),
    ("Alphecca", 15.578, 26.715),
    ("Antares", 16.490, -26.432),
    ("Etamin", 17.943, 51.489),
    ("Vega", 18.616, 38.784),
    ("Altair", 19.846, 8.868),
    ("Deneb", 20.690, 45.280),
    ("Fomalhaut", 22.961, -29.622),
];

/// The slow polling link.
pub struct SlowPoller {
    data: SharedMountData,
}

impl SlowPoller {
    pub fn new(data: SharedMountData) -> Self {
        Self { data }
    }

    fn template(with_dutv: bool) -> CommandTemplate {
        let mut t = CommandTemplate::new();
        t.push_blind(":U2#")
            .push(":GTMP1#")
            .push(":GREF#")
            .push(":Guaf#")
            .push(":Gdat#")
            .push(":Gh#")
            .push(":Go#");
        if with_dutv {
            t.push(":GDUTV#");
        }
        t
    }

    /// Evaluate each catalog star's current topocentric position for the
    /// site in MountData.
    async fn refresh_alignment_stars(&self) {
        let now = chrono::Utc::now();
        let (lat, lon) = {
            let data = self.data.read().await;
            (data.site_latitude_deg, data.site_longitude_deg)
        };

        let positions: Vec<(String, f64, f64)> = ALIGNMENT_STARS
            .iter()
            .map(|(name, ra_j2000, dec_j2000)| {
                let (ra_now, dec_now) =
                    crate::transform::j2000_to_jnow(*ra_j2000, *dec_j2000, &now);
                let (az, alt) =
                    crate::transform::ra_dec_to_az_alt(ra_now, dec_now, lat, lon, &now);
                ((*name).to_string(), az, alt)
            })
            .collect();

        self.data.write().await.alignment_star_positions = positions;
    }

    async fn apply(&self, fields: &[String], with_dutv: bool) {
        let float = |s: &str| -> Option<f64> { s.trim().parse().ok() };
        let flag = |s: &str| -> bool { s.trim() == "1" };

        let mut data = self.data.write().await;
        data.telescope_temp_dec = fields[0].trim().to_string();
        data.refraction_on = flag(&fields[1]);
        data.unattended_flip = flag(&fields[2]);
        data.dual_axis_tracking = flag(&fields[3]);
        if let Some(v) = float(&fields[4]) {
            data.horizon_limit_high = v;
        }
        if let Some(v) = float(&fields[5]) {
            data.horizon_limit_low = v;
        }
        if with_dutv {
            if let Some(dutv) = fields.get(6) {
                let mut parts = dutv.splitn(2, ',');
                data.utc_data_valid = parts.next().map(str::trim) == Some("V");
                data.utc_data_expiration = parts.next().map(str::trim).unwrap_or("").to_string();
            }
        }
    }
}

#[async_trait]
impl Poller for SlowPoller {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn cadence(&self) -> PollCadence {
        PollCadence::Periodic(Duration::from_millis(SLOW_PERIOD_MS))
    }

    async fn cycle(&mut self, link: &mut MountLink) -> Result<(), ProtocolError> {
        let with_dutv = self.data.read().await.fw_has_getain();
        let template = Self::template(with_dutv);
        let fields = link.exchange(&template).await?;
        if fields.len() != template.expected() {
            return Err(ProtocolError::Parse(format!(
                "slow poll expects {} fields, got {}",
                template.expected(),
                fields.len()
            )));
        }
        self.apply(&fields, with_dutv).await;
        self.refresh_alignment_stars().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MountData;

    #[tokio::test]
    async fn test_apply_switches() {
        let data = MountData::default().into_shared();
        let poller = SlowPoller::new(data.clone());
        let fields: Vec<String> = vec![
            "+011.2".into(),
            "1".into(),
            "1".into(),
            "0".into(),
            "75.0".into(),
            "10.0".into(),
        ];
        poller.apply(&fields, false).await;

        let snapshot = data.read().await.snapshot();
        assert_eq!(snapshot.telescope_temp_dec, "+011.2");
        assert!(snapshot.refraction_on);
        assert!(snapshot.unattended_flip);
        assert!(!snapshot.dual_axis_tracking);
        assert!((snapshot.horizon_limit_high - 75.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_alignment_star_refresh_positions_in_range() {
        let data = MountData::default().into_shared();
        data.write()
            .await
            .set_site("+48:07:00".into(), "+011:42:17".into(), 580.0);

        let poller = SlowPoller::new(data.clone());
        poller.refresh_alignment_stars().await;

        let snapshot = data.read().await.snapshot();
        assert_eq!(snapshot.alignment_star_positions.len(), ALIGNMENT_STARS.len());
        for (name, az, alt) in &snapshot.alignment_star_positions {
            assert!((0.0..360.0).contains(az), "{} az = {}", name, az);
            assert!((-90.0..=90.0).contains(alt), "{} alt = {}", name, alt);
        }
        // Polaris sits within a degree of the pole, so its altitude is
        // always close to the site latitude from mid-northern sites.
        let (_, _, polaris_alt) = snapshot
            .alignment_star_positions
            .iter()
            .find(|(name, _, _)| name == "Polaris")
            .map(|(n, az, alt)| (n.clone(), *az, *alt))
            .expect("Polaris present");
        assert!((polaris_alt - 48.116).abs() < 2.0);
    }
}

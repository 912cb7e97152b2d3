//! Coordinate and angle transformations.
//!
//! Pure, stateless helpers shared by the protocol links and the build
//! pipeline: sexagesimal string codecs, Julian date / sidereal time,
//! equatorial precession between J2000 and the current epoch, and the
//! hour-angle → horizontal conversion.
//!
//! Conventions: right ascension and hour angle in decimal hours,
//! declination / azimuth / altitude / latitude in decimal degrees,
//! longitude in degrees with east positive. Azimuth is measured from
//! north through east, normalized to [0°, 360°).

use chrono::{DateTime, Datelike, Timelike, Utc};

/// Days per Julian century.
const JULIAN_CENTURY: f64 = 36_525.0;

/// JD of the J2000.0 epoch.
const JD_J2000: f64 = 2_451_545.0;

// ============================================================================
// Sexagesimal codecs
// ============================================================================

/// Parse `±HH:MM:SS[.s]` or `±HH:MM` (with a configurable separator) into a
/// signed decimal.
///
/// A `-` anywhere in the string makes the result negative; otherwise the
/// result is positive. Malformed input logs a warning and yields 0.0 — the
/// links treat a zero as "leave the field alone this cycle" rather than
/// abort the whole parse.
pub fn deg_string_to_decimal(text: &str, sep: char) -> f64 {
    let negative = text.contains('-');
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| *c != '+' && *c != '-')
        .collect();

    let parsed = (|| -> Option<f64> {
        let parts: Vec<&str> = cleaned.split(sep).collect();
        match parts.as_slice() {
            [h, m, s] => {
                let h: f64 = h.trim().parse().ok()?;
                let m: f64 = m.trim().parse().ok()?;
                let s: f64 = s.trim().parse().ok()?;
                Some(h + m / 60.0 + s / 3600.0)
            }
            [h, m] => {
                let h: f64 = h.trim().parse().ok()?;
                let m: f64 = m.trim().parse().ok()?;
                Some(h + m / 60.0)
            }
            _ => None,
        }
    })();

    match parsed {
        Some(value) => {
            if negative {
                -value
            } else {
                value
            }
        }
        None => {
            tracing::warn!(input = text, "Malformed sexagesimal string — using 0");
            0.0
        }
    }
}

/// Format a decimal value as `±HH:MM:SS[.s]`.
///
/// Integer components round toward zero; the optional tenths digit rounds
/// to the nearest 0.1 so a parse → format → parse round trip stays within
/// 0.05 arcsec. `with_sign` emits an explicit `+` for non-negative values;
/// negative values always carry their `-`.
pub fn decimal_to_degree(value: f64, with_sign: bool, with_decimal: bool, sep: char) -> String {
    let sign = if value < 0.0 {
        "-"
    } else if with_sign {
        "+"
    } else {
        ""
    };
    let magnitude = value.abs();

    if with_decimal {
        // Work in tenths of seconds so the carry from rounding can never
        // produce a "60.0" seconds field.
        let total_tenths = (magnitude * 36_000.0).round() as u64;
        let degrees = total_tenths / 36_000;
        let minutes = (total_tenths % 36_000) / 600;
        let tenths = total_tenths % 600;
        format!(
            "{}{:02}{}{:02}{}{:02}.{}",
            sign,
            degrees,
            sep,
            minutes,
            sep,
            tenths / 10,
            tenths % 10
        )
    } else {
        let total_seconds = (magnitude * 3_600.0).trunc() as u64;
        let degrees = total_seconds / 3_600;
        let minutes = (total_seconds % 3_600) / 60;
        let seconds = total_seconds % 60;
        format!(
            "{}{:02}{}{:02}{}{:02}",
            sign, degrees, sep, minutes, sep, seconds
        )
    }
}

// ============================================================================
// Time scales
// ============================================================================

/// Julian date of a UTC instant.
pub fn julian_day(utc: &DateTime<Utc>) -> f64 {
    let year = utc.year();
    let month = utc.month();
    let day = utc.day();

    let (y, m) = if month <= 2 {
        (year - 1, month + 12)
    } else {
        (year, month)
    };

    let a = y / 100;
    let b = 2 - a + a / 4;

    let jd = (365.25 * (y as f64 + 4716.0)).floor()
        + (30.6001 * (m as f64 + 1.0)).floor()
        + day as f64
        + b as f64
        - 1524.5;

    let day_fraction = (utc.hour() as f64
        + utc.minute() as f64 / 60.0
        + utc.second() as f64 / 3600.0
        + utc.nanosecond() as f64 / 3.6e12)
        / 24.0;

    jd + day_fraction
}

/// Local sidereal time in decimal hours for an east-positive longitude.
pub fn local_sidereal_time(jd: f64, longitude_deg: f64) -> f64 {
    let t = (jd - JD_J2000) / JULIAN_CENTURY;

    // Greenwich Mean Sidereal Time in degrees
    let gmst = 280.460_618_37 + 360.985_647_366_29 * (jd - JD_J2000) + 0.000_387_933 * t * t
        - t * t * t / 38_710_000.0;

    let lst = (gmst + longitude_deg).rem_euclid(360.0);
    lst / 15.0
}

// ============================================================================
// Precession (J2000 ↔ current epoch)
// ============================================================================

/// IAU 1976 precession angles (ζ, z, θ) in radians for a target JD.
fn precession_angles(jd: f64) -> (f64, f64, f64) {
    let t = (jd - JD_J2000) / JULIAN_CENTURY;
    let arcsec = std::f64::consts::PI / (180.0 * 3600.0);

    let zeta = (2306.2181 * t + 0.30188 * t * t + 0.017_998 * t * t * t) * arcsec;
    let z = (2306.2181 * t + 1.09468 * t * t + 0.018_203 * t * t * t) * arcsec;
    let theta = (2004.3109 * t - 0.42665 * t * t - 0.041_833 * t * t * t) * arcsec;
    (zeta, z, theta)
}

/// Precess J2000 coordinates to the epoch of `utc`.
///
/// RA in hours, Dec in degrees, both directions.
pub fn j2000_to_jnow(ra_hours: f64, dec_deg: f64, utc: &DateTime<Utc>) -> (f64, f64) {
    let (zeta, z, theta) = precession_angles(julian_day(utc));

    let ra0 = ra_hours * 15.0_f64.to_radians();
    let dec0 = dec_deg.to_radians();

    let a = dec0.cos() * (ra0 + zeta).sin();
    let b = theta.cos() * dec0.cos() * (ra0 + zeta).cos() - theta.sin() * dec0.sin();
    let c = theta.sin() * dec0.cos() * (ra0 + zeta).cos() + theta.cos() * dec0.sin();

    let ra = (a.atan2(b) + z).rem_euclid(2.0 * std::f64::consts::PI);
    let dec = c.asin();

    (ra.to_degrees() / 15.0, dec.to_degrees())
}

/// Precess coordinates of the epoch of `utc` back to J2000.
pub fn jnow_to_j2000(ra_hours: f64, dec_deg: f64, utc: &DateTime<Utc>) -> (f64, f64) {
    let (zeta, z, theta) = precession_angles(julian_day(utc));

    let ra1 = ra_hours * 15.0_f64.to_radians();
    let dec1 = dec_deg.to_radians();

    let a = dec1.cos() * (ra1 - z).sin();
    let b = theta.cos() * dec1.cos() * (ra1 - z).cos() + theta.sin() * dec1.sin();
    let c = -theta.sin() * dec1.cos() * (ra1 - z).cos() + theta.cos() * dec1.sin();

    let ra = (a.atan2(b) - zeta).rem_euclid(2.0 * std::f64::consts::PI);
    let dec = c.asin();

    (ra.to_degrees() / 15.0, dec.to_degrees())
}

// ============================================================================
// Horizontal coordinates
// ============================================================================

/// Hour angle + declination → (azimuth, altitude) for a site latitude.
///
/// Azimuth from north through east in [0°, 360°); altitude in [-90°, 90°].
pub fn topocentric_to_az_alt(ha_hours: f64, dec_deg: f64, lat_deg: f64) -> (f64, f64) {
    let ha = (ha_hours * 15.0).to_radians();
    let dec = dec_deg.to_radians();
    let lat = lat_deg.to_radians();

    let sin_alt = lat.sin() * dec.sin() + lat.cos() * dec.cos() * ha.cos();
    let alt = sin_alt.clamp(-1.0, 1.0).asin();

    // Azimuth from south (westward positive), then rotated to the
    // north-through-east convention.
    let az_south = ha.sin().atan2(ha.cos() * lat.sin() - dec.tan() * lat.cos());
    let az = (az_south.to_degrees() + 180.0).rem_euclid(360.0);

    (az, alt.to_degrees())
}

/// RA/Dec of the current epoch → (azimuth, altitude) for a site and instant.
pub fn ra_dec_to_az_alt(
    ra_hours: f64,
    dec_deg: f64,
    lat_deg: f64,
    lon_deg: f64,
    utc: &DateTime<Utc>,
) -> (f64, f64) {
    let lst = local_sidereal_time(julian_day(utc), lon_deg);
    let ha = (lst - ra_hours).rem_euclid(24.0);
    topocentric_to_az_alt(ha, dec_deg, lat_deg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_deg_string_basic() {
        assert!((deg_string_to_decimal("12:30:00", ':') - 12.5).abs() < 1e-9);
        assert!((deg_string_to_decimal("-11:42:17.3", ':') + 11.704_805_6).abs() < 1e-6);
        assert!((deg_string_to_decimal("+05:15", ':') - 5.25).abs() < 1e-9);
    }

    #[test]
    fn test_deg_string_malformed_yields_zero() {
        assert_eq!(deg_string_to_decimal("garbage", ':'), 0.0);
        assert_eq!(deg_string_to_decimal("12:xx:00", ':'), 0.0);
        assert_eq!(deg_string_to_decimal("", ':'), 0.0);
    }

    #[test]
    fn test_decimal_to_degree_formats() {
        assert_eq!(decimal_to_degree(12.5, false, false, ':'), "12:30:00");
        assert_eq!(decimal_to_degree(12.5, true, false, ':'), "+12:30:00");
        assert_eq!(decimal_to_degree(-11.704_805, true, true, ':'), "-11:42:17.3");
        assert_eq!(decimal_to_degree(0.0, true, false, ':'), "+00:00:00");
    }

    #[test]
    fn test_decimal_round_trip_within_tolerance() {
        // Invariant: round trip within 0.05 arcsec for |v| <= 360
        let tolerance_deg = 0.05 / 3600.0;
        for &v in &[0.0, 0.123_456, 41.234_567, -89.999_97, 179.5, 359.999_9, -360.0] {
            let s = decimal_to_degree(v, true, true, ':');
            let back = deg_string_to_decimal(&s, ':');
            assert!(
                (back - v).abs() <= tolerance_deg,
                "{} -> {} -> {}",
                v,
                s,
                back
            );
        }
    }

    #[test]
    fn test_seconds_never_sixty() {
        // 59.96" would carry into the minutes field when rounded
        let s = decimal_to_degree(0.999_989, false, true, ':');
        assert_eq!(s, "01:00:00.0");
    }

    #[test]
    fn test_julian_day_epoch() {
        // J2000 epoch: 2000-01-01 12:00 UT
        let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).single().expect("valid");
        assert!((julian_day(&epoch) - 2_451_545.0).abs() < 1e-6);
    }

    #[test]
    fn test_lst_greenwich_at_epoch() {
        let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).single().expect("valid");
        let lst = local_sidereal_time(julian_day(&epoch), 0.0);
        assert!((lst - 18.697_374_5).abs() < 1e-3, "lst = {}", lst);
    }

    #[test]
    fn test_az_alt_ranges() {
        for ha in [-11.0, -6.0, 0.0, 3.5, 11.9] {
            for dec in [-85.0, -30.0, 0.0, 45.0, 89.0] {
                let (az, alt) = topocentric_to_az_alt(ha, dec, 48.0);
                assert!((0.0..360.0).contains(&az), "az = {}", az);
                assert!((-90.0..=90.0).contains(&alt), "alt = {}", alt);
            }
        }
    }

    #[test]
    fn test_zenith_at_dec_equals_latitude() {
        // dec = site latitude and ha = 0 puts the target in the zenith
        let (_, alt) = topocentric_to_az_alt(0.0, 48.0, 48.0);
        assert!((alt - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_meridian_south_azimuth() {
        // On the meridian below the zenith the target bears due south
        let (az, _) = topocentric_to_az_alt(0.0, 10.0, 48.0);
        assert!((az - 180.0).abs() < 1e-6);
    }

    #[test]
    fn test_precession_identity_at_epoch() {
        let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).single().expect("valid");
        let (ra, dec) = j2000_to_jnow(5.5, 23.0, &epoch);
        assert!((ra - 5.5).abs() < 1e-9);
        assert!((dec - 23.0).abs() < 1e-9);
    }

    #[test]
    fn test_precession_round_trip() {
        let now = Utc.with_ymd_and_hms(2026, 8, 6, 0, 0, 0).single().expect("valid");
        let (ra1, dec1) = j2000_to_jnow(17.543_21, 41.234_567, &now);
        let (ra0, dec0) = jnow_to_j2000(ra1, dec1, &now);
        assert!((ra0 - 17.543_21).abs() < 1e-8);
        assert!((dec0 - 41.234_567).abs() < 1e-8);
    }

    #[test]
    fn test_precession_magnitude_plausible() {
        // General precession is ~50"/yr; a quarter century shifts
        // coordinates by tens of arcseconds, not degrees.
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("valid");
        let (ra, dec) = j2000_to_jnow(3.0, 20.0, &now);
        let d_ra_arcsec = (ra - 3.0).abs() * 15.0 * 3600.0;
        let d_dec_arcsec = (dec - 20.0).abs() * 3600.0;
        assert!(d_ra_arcsec > 10.0 && d_ra_arcsec < 3600.0, "dra = {}", d_ra_arcsec);
        assert!(d_dec_arcsec > 1.0 && d_dec_arcsec < 600.0, "ddec = {}", d_dec_arcsec);
    }
}

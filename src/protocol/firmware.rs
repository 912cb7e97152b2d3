//! Firmware capability gating.
//!
//! Command templates and reply shapes diverge at two firmware revisions.
//! Rather than scattering numeric comparisons through the parsers, links
//! consult a [`Firmware`] value decoded once by the once-poll.

use crate::config::defaults::{FW_GETAIN, FW_MODEL_UPLOAD};
use serde::{Deserialize, Serialize};

/// Mount firmware revision, encoded major·10000 + minor·100 + patch.
///
/// Zero means "unknown"; an unknown firmware behaves as the oldest
/// supported revision so links degrade to the conservative command set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Firmware(pub u32);

impl Firmware {
    /// Parse the `:GVN#` reply, e.g. `"2.15.1"` → 21501. A malformed
    /// string yields the unknown firmware.
    pub fn parse(text: &str) -> Self {
        let mut parts = text.trim().split('.');
        let major: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let minor: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let patch: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        if major == 0 {
            tracing::warn!(input = text, "Unparseable firmware string — treating as unknown");
            return Self(0);
        }
        Self(major * 10_000 + minor * 100 + patch)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn is_known(self) -> bool {
        self.0 != 0
    }

    /// `:getain#` model statistics and `:GDUTV#` UTC validity exist.
    pub fn has_getain(self) -> bool {
        self.0 >= FW_GETAIN
    }

    /// The `:newalig#` upload sequence is accepted.
    pub fn supports_model_upload(self) -> bool {
        self.0 >= FW_MODEL_UPLOAD
    }
}

impl std::fmt::Display for Firmware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 == 0 {
            return write!(f, "unknown");
        }
        write!(
            f,
            "{}.{}.{}",
            self.0 / 10_000,
            (self.0 / 100) % 100,
            self.0 % 100
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_encode() {
        assert_eq!(Firmware::parse("2.15.1").value(), 21_501);
        assert_eq!(Firmware::parse("2.8.15").value(), 20_815);
        assert_eq!(Firmware::parse("3.0.0").value(), 30_000);
        assert_eq!(Firmware::parse("2.15").value(), 21_500);
    }

    #[test]
    fn test_malformed_is_unknown() {
        assert_eq!(Firmware::parse("garbage"), Firmware(0));
        assert_eq!(Firmware::parse(""), Firmware(0));
        assert!(!Firmware::parse("garbage").is_known());
    }

    #[test]
    fn test_gates() {
        assert!(Firmware(21_500).has_getain());
        assert!(!Firmware(21_499).has_getain());
        assert!(Firmware(20_815).supports_model_upload());
        assert!(!Firmware(20_814).supports_model_upload());
        // Unknown firmware behaves as the oldest supported revision
        assert!(!Firmware(0).has_getain());
        assert!(!Firmware(0).supports_model_upload());
    }

    #[test]
    fn test_display() {
        assert_eq!(Firmware(21_501).to_string(), "2.15.1");
        assert_eq!(Firmware(0).to_string(), "unknown");
    }
}

//! Core mount state types: MountStatus, Pierside, RefractionMode

use serde::{Deserialize, Serialize};

// ============================================================================
// Mount Status (Ginfo status field)
// ============================================================================

/// Operational state of the mount, decoded from the `:Ginfo#` status field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
pub enum MountStatus {
    Tracking,
    Stopped,
    SlewingToPark,
    Unparking,
    SlewingToHome,
    Parked,
    Slewing,
    TrackingOff,
    MotorLowTemperature,
    TrackingOutsideLimits,
    FollowingSatellite,
    UserInterventionNeeded,
    #[default]
    Unknown,
    Error,
}

impl MountStatus {
    /// Decode the integer status code from the wire.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => MountStatus::Tracking,
            1 => MountStatus::Stopped,
            2 => MountStatus::SlewingToPark,
            3 => MountStatus::Unparking,
            4 => MountStatus::SlewingToHome,
            5 => MountStatus::Parked,
            6 => MountStatus::Slewing,
            7 => MountStatus::TrackingOff,
            8 => MountStatus::MotorLowTemperature,
            9 => MountStatus::TrackingOutsideLimits,
            10 => MountStatus::FollowingSatellite,
            11 => MountStatus::UserInterventionNeeded,
            99 => MountStatus::Error,
            _ => MountStatus::Unknown,
        }
    }

    /// Wire code for this status.
    pub fn code(&self) -> u8 {
        match self {
            MountStatus::Tracking => 0,
            MountStatus::Stopped => 1,
            MountStatus::SlewingToPark => 2,
            MountStatus::Unparking => 3,
            MountStatus::SlewingToHome => 4,
            MountStatus::Parked => 5,
            MountStatus::Slewing => 6,
            MountStatus::TrackingOff => 7,
            MountStatus::MotorLowTemperature => 8,
            MountStatus::TrackingOutsideLimits => 9,
            MountStatus::FollowingSatellite => 10,
            MountStatus::UserInterventionNeeded => 11,
            MountStatus::Unknown => 98,
            MountStatus::Error => 99,
        }
    }

    /// States that raise a one-shot user alert on entry.
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            MountStatus::Stopped | MountStatus::Unknown | MountStatus::Error
        )
    }

    /// True while the mount tracks the sky (refraction pushes in
    /// `NotTracking` mode are suppressed in this state).
    pub fn is_tracking(&self) -> bool {
        matches!(self, MountStatus::Tracking)
    }
}

impl std::fmt::Display for MountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MountStatus::Tracking => "Tracking",
            MountStatus::Stopped => "Stopped",
            MountStatus::SlewingToPark => "Slewing to park",
            MountStatus::Unparking => "Unparking",
            MountStatus::SlewingToHome => "Slewing to home",
            MountStatus::Parked => "Parked",
            MountStatus::Slewing => "Slewing",
            MountStatus::TrackingOff => "Tracking off",
            MountStatus::MotorLowTemperature => "Motor low temperature",
            MountStatus::TrackingOutsideLimits => "Tracking outside limits",
            MountStatus::FollowingSatellite => "Following satellite",
            MountStatus::UserInterventionNeeded => "User intervention needed",
            MountStatus::Unknown => "Unknown",
            MountStatus::Error => "Error",
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// Pierside
// ============================================================================

/// Side of the meridian the counterweight shaft hangs from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
pub enum Pierside {
    East,
    #[default]
    West,
}

impl Pierside {
    /// Decode the one-letter wire form (`E` / `W`).
    pub fn from_wire(s: &str) -> Option<Self> {
        match s.trim() {
            "E" => Some(Pierside::East),
            "W" => Some(Pierside::West),
            _ => None,
        }
    }

    /// One-letter wire form.
    pub fn to_wire(&self) -> &'static str {
        match self {
            Pierside::East => "E",
            Pierside::West => "W",
        }
    }
}

impl std::fmt::Display for Pierside {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}

// ============================================================================
// Refraction update mode
// ============================================================================

/// When the medium poll cycle pushes fresh refraction T/P to the mount.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefractionMode {
    /// Push a moving-average (T, P) every cycle.
    Continuous,
    /// Push only while the mount is not tracking.
    #[default]
    NotTracking,
    /// Never push.
    None,
}

impl std::fmt::Display for RefractionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefractionMode::Continuous => write!(f, "continuous"),
            RefractionMode::NotTracking => write!(f, "not-tracking"),
            RefractionMode::None => write!(f, "none"),
        }
    }
}

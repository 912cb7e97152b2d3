//! Mount Configuration Module
//!
//! Provides configuration loaded from TOML files for the mount connection,
//! refraction update policy, build defaults, and horizon mask.
//!
//! ## Loading Order
//!
//! 1. `MOUNTCTL_CONFIG` environment variable (path to TOML file)
//! 2. `mountctl.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! // In main():
//! config::init(MountConfig::load());
//!
//! // Anywhere in the codebase:
//! let settle = config::get().build.settling_time_s;
//! ```

mod mount_config;
pub mod defaults;

pub use mount_config::*;

use std::sync::OnceLock;

/// Global mount configuration, initialized once at startup.
static MOUNT_CONFIG: OnceLock<MountConfig> = OnceLock::new();

/// Initialize the global mount configuration.
///
/// Must be called exactly once before any calls to `get()`.
pub fn init(config: MountConfig) {
    if MOUNT_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once — ignoring");
    }
}

/// Get a reference to the global mount configuration.
///
/// Falls back to built-in defaults when `init()` was never called, which
/// keeps library consumers and tests free of init ordering concerns.
pub fn get() -> &'static MountConfig {
    MOUNT_CONFIG.get_or_init(MountConfig::default)
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    MOUNT_CONFIG.get().is_some()
}

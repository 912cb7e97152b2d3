//! System-wide default constants.
//!
//! Centralises the protocol timing and sizing constants so every link and
//! worker reads the same numbers. Grouped by subsystem for easy discovery.

// ============================================================================
// Connection
// ============================================================================

/// Default 10micron command port.
pub const DEFAULT_MOUNT_PORT: u16 = 3490;

/// Budget for a single connect attempt (ms). 8 cycles of 250 ms.
pub const CONNECTION_TIMEOUT_MS: u64 = 2_000;

/// Reconnect / read-accumulation cycle tick (ms).
pub const CYCLE_TICK_MS: u64 = 250;

/// TCP keepalive probe idle time (seconds).
pub const KEEPALIVE_IDLE_SECS: u64 = 30;

/// TCP keepalive probe interval (seconds).
pub const KEEPALIVE_INTERVAL_SECS: u64 = 10;

// ============================================================================
// Polling cadences
// ============================================================================

/// Fast pointing poll period (ms).
pub const FAST_PERIOD_MS: u64 = 750;

/// Medium status poll period (ms).
pub const MEDIUM_PERIOD_MS: u64 = 3_000;

/// Slow settings poll period (ms).
pub const SLOW_PERIOD_MS: u64 = 10_000;

/// Dispatcher dequeue cadence (ms).
pub const DISPATCH_CADENCE_MS: u64 = 200;

/// Cancel-flag poll interval inside long waits (ms).
pub const CANCEL_CHECK_MS: u64 = 200;

// ============================================================================
// Protocol
// ============================================================================

/// Minimum byte length of a complete `:Ginfo#` reply. Shorter data means
/// the field is still in flight and the reader keeps accumulating.
pub const GINFO_MIN_LEN: usize = 71;

/// Firmware revision that introduces `:getain#` and `:GDUTV#`.
pub const FW_GETAIN: u32 = 21_500;

/// Oldest firmware that accepts the `:newalig#` upload sequence.
pub const FW_MODEL_UPLOAD: u32 = 20_815;

/// Number of named-model catalog slots on the mount.
pub const MODEL_NAME_SLOTS: usize = 50;

/// Mount-firmware hard limit on alignment points per model upload.
pub const MAX_MODEL_POINTS: usize = 100;

/// Minimum alignment stars required before single-point deletion is allowed.
pub const MIN_ALIGNMENT_STARS: usize = 4;

// ============================================================================
// Refraction updates
// ============================================================================

/// Valid refraction pressure range pushed to the mount (hPa).
pub const REFRACTION_PRESSURE_MIN: f64 = 900.0;
pub const REFRACTION_PRESSURE_MAX: f64 = 1_100.0;

/// Valid refraction temperature range pushed to the mount (°C), exclusive.
pub const REFRACTION_TEMP_MIN: f64 = -30.0;
pub const REFRACTION_TEMP_MAX: f64 = 35.0;

// ============================================================================
// Build pipeline
// ============================================================================

/// Bounded queue depth between pipeline stages.
pub const STAGE_QUEUE_DEPTH: usize = 100;

/// Default mount settling time after a slew (seconds).
pub const DEFAULT_SETTLING_TIME_S: f64 = 1.0;

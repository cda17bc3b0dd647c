//! Client and per-subject configuration.

use serde::{Deserialize, Serialize};

/// Heartbeat window after which a silent source is considered dead.
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: f64 = 15.0;

/// Per-subject settings, user-settable at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Sample an interpolated pose instead of the newest frame.
    pub use_interpolation: bool,
    /// How far behind "now" (local seconds) interpolated sampling looks.
    pub interpolation_offset: f32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            use_interpolation: false,
            interpolation_offset: 0.5,
        }
    }
}

/// Configuration for the client and its registry.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Liveness timeout passed to every source in `Source::attach`.
    pub heartbeat_timeout_secs: f64,
    /// Minimum spacing between two `is_alive` polls of the attached sources.
    pub source_validation_interval_secs: f64,
    /// Tolerance below `last_read_time` before a late frame counts as stale.
    pub stale_epsilon_secs: f64,
    /// Upper bound on buffered frames per subject; oldest frames go first.
    pub max_buffered_frames: usize,
    /// Settings given to subjects when they are first created.
    pub default_settings: ConnectionSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: DEFAULT_HEARTBEAT_TIMEOUT_SECS,
            source_validation_interval_secs: 1.0,
            stale_epsilon_secs: 1e-4,
            max_buffered_frames: 256,
            default_settings: ConnectionSettings::default(),
        }
    }
}

//! Belief controller configuration and constants.
//!
//! Every period below is expressed as a multiple of the current `min_rtt`
//! estimate, so the controller's cadence scales with the path instead of a
//! wall clock.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::state::ControlLaw;

/// Timestamps and time deltas, in milliseconds.
pub type Millis = f64;

/// Sending rates and capacity estimates, in segments per second.
pub type SegsPerSec = f64;

/// Segment sequence number.
pub type SeqNum = u64;

pub(crate) const MS_PER_SEC: f64 = 1_000.0;

/// Smallest time window used as a rate denominator.
pub(crate) const TIME_EPSILON: Millis = 1e-6;

/// Smallest `min_rtt` used as a time base (the driver's clock resolution).
/// A zero RTT sample is still recorded but never collapses periods, the
/// floor rate or the window.
pub const MIN_RTPROP: Millis = 1.0;

// =============================================================================
// Window and Rate Bounds
// =============================================================================

/// Number of history samples retained by the ring.
pub const HISTORY_SIZE: usize = 32;

/// Minimum congestion window in segments. Also sets the floor rate,
/// `MIN_CWND × 1000 / min_rtt`.
pub const MIN_CWND: u32 = 5;

/// Initial lower capacity bound (~60 Kbps at 1448 byte segments).
pub const INIT_MIN_C: SegsPerSec = MIN_CWND as SegsPerSec;

/// Initial upper capacity bound (~1.2 Gbps at 1448 byte segments).
pub const INIT_MAX_C: SegsPerSec = 1e5;

/// `min_rtt` before any sample or bootstrap value is known (100 seconds).
pub const TIME_DELTA_MAX: Millis = 1e5;

/// Window reported to the driver between `init()` and the first recompute.
pub const INITIAL_WINDOW: u32 = 2;

// =============================================================================
// Periods (multiples of min_rtt)
// =============================================================================

/// Minimum spacing between history samples.
pub const INTER_HISTORY_TIME: f64 = 1.0;

/// Period between capacity bound repair checkpoints.
pub const BELIEFS_TIMEOUT_PERIOD: f64 = 12.0;

/// Queueing-delay tolerance band.
pub const JITTER_MULTIPLIER: f64 = 1.0;

/// Width of the `min_c_lambda` measurement window, in min_rtt.
pub const MEASUREMENT_INTERVAL_RTPROP: f64 = 1.0;

/// Width of the `min_c_lambda` measurement window, in history samples.
pub const MEASUREMENT_INTERVAL_HISTORY: usize =
    (MEASUREMENT_INTERVAL_RTPROP / INTER_HISTORY_TIME) as usize;

/// Minimum spacing between rate/window recomputes.
pub const INTER_RATE_UPDATE_TIME: f64 = 1.0;

// =============================================================================
// Repair Thresholds
// =============================================================================

/// A bound moved "significantly" when it changed by more than this ratio.
pub const BELIEFS_CHANGED_SIGNIFICANTLY_THRESH: f64 = 1.1;

/// Growth allowance applied to `max_c` when it is repaired.
pub const TIMEOUT_THRESH: f64 = 1.5;

/// Number of resolved sequence numbers remembered to tell duplicate acks
/// apart from unknown ones.
pub const RESOLVED_SEQ_MEMORY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

// =============================================================================
// Configuration Struct
// =============================================================================

/// Configuration for the belief-based controller.
///
/// Deserializes from TOML; missing keys keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BeliefConfig {
    /// Control law used once the flow leaves slow start.
    pub control_law: ControlLaw,

    /// History ring capacity.
    pub history_size: usize,

    /// Minimum congestion window (segments).
    pub min_cwnd: u32,

    /// Initial lower capacity bound (segs/s).
    pub init_min_c: SegsPerSec,

    /// Initial upper capacity bound (segs/s).
    pub init_max_c: SegsPerSec,

    /// `min_rtt` placeholder until a sample arrives (ms).
    pub time_delta_max: Millis,

    /// Window reported right after `init()`.
    pub initial_window: u32,

    pub inter_history_time: f64,
    pub beliefs_timeout_period: f64,
    pub jitter_multiplier: f64,
    pub measurement_interval_history: usize,
    pub inter_rate_update_time: f64,
    pub beliefs_changed_significantly_thresh: f64,
    pub timeout_thresh: f64,

    /// How many resolved sequence numbers the ledger remembers.
    pub resolved_seq_memory: usize,
}

impl Default for BeliefConfig {
    fn default() -> Self {
        Self {
            control_law: ControlLaw::default(),
            history_size: HISTORY_SIZE,
            min_cwnd: MIN_CWND,
            init_min_c: INIT_MIN_C,
            init_max_c: INIT_MAX_C,
            time_delta_max: TIME_DELTA_MAX,
            initial_window: INITIAL_WINDOW,
            inter_history_time: INTER_HISTORY_TIME,
            beliefs_timeout_period: BELIEFS_TIMEOUT_PERIOD,
            jitter_multiplier: JITTER_MULTIPLIER,
            measurement_interval_history: MEASUREMENT_INTERVAL_HISTORY,
            inter_rate_update_time: INTER_RATE_UPDATE_TIME,
            beliefs_changed_significantly_thresh: BELIEFS_CHANGED_SIGNIFICANTLY_THRESH,
            timeout_thresh: TIMEOUT_THRESH,
            resolved_seq_memory: RESOLVED_SEQ_MEMORY,
        }
    }
}

impl BeliefConfig {
    /// Parse a (possibly partial) TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_size < 2 {
            return Err(ConfigError::Invalid("history-size must be at least 2"));
        }
        if self.min_cwnd == 0 {
            return Err(ConfigError::Invalid("min-cwnd must be positive"));
        }
        if self.measurement_interval_history == 0
            || self.measurement_interval_history >= self.history_size
        {
            return Err(ConfigError::Invalid(
                "measurement-interval-history must be in 1..history-size",
            ));
        }
        let periods = [
            self.inter_history_time,
            self.beliefs_timeout_period,
            self.inter_rate_update_time,
            self.time_delta_max,
        ];
        if periods.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(ConfigError::Invalid("periods must be positive and finite"));
        }
        if self.jitter_multiplier.is_nan() || self.jitter_multiplier < 0.0 {
            return Err(ConfigError::Invalid("jitter-multiplier must be non-negative"));
        }
        if self.init_min_c.is_nan() || self.init_min_c <= 0.0 || self.init_max_c < self.init_min_c {
            return Err(ConfigError::Invalid(
                "capacity bounds must satisfy 0 < init-min-c <= init-max-c",
            ));
        }
        if self.beliefs_changed_significantly_thresh < 1.0 || self.timeout_thresh < 1.0 {
            return Err(ConfigError::Invalid("thresholds must be at least 1.0"));
        }
        Ok(())
    }

    /// Validate this configuration and build a controller from it.
    pub fn build(self) -> Result<super::BeliefController, ConfigError> {
        self.validate()?;
        Ok(super::BeliefController::new(self))
    }

    /// `min_c_lambda` window width in history samples, never zero.
    pub(crate) fn measurement_span(&self) -> usize {
        self.measurement_interval_history.max(1)
    }
}

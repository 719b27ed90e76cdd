//! Belief-based congestion controller.
//!
//! The controller keeps *beliefs* about the path (minimum RTT, bottleneck
//! queue occupancy and a pair of capacity bounds) and derives a sending rate
//! and window from them.
//!
//! ## Key Concepts
//!
//! - **min_rtt**: Smallest RTT since `init()`, the noise-free latency baseline
//! - **jitter**: `min_rtt × JITTER_MULTIPLIER`, the delay tolerance band
//! - **min_c / max_c**: Running lower and upper capacity bounds (segs/s)
//! - **min_c_lambda**: Throughput proven on underutilized, causally complete windows
//! - **floor rate**: `MIN_CWND × 1000 / min_rtt`, never undercut
//! - **cwnd**: `2 × max_c × (min_rtt + jitter) / 1000`
//!
//! ## Components
//!
//! | Module | Role |
//! |--------|------|
//! | `ledger` | Outstanding segments, sequence-order loss inference |
//! | `history` | Fixed-capacity ring of periodic counter snapshots |
//! | `beliefs` | Estimators and the periodic bound repair |
//! | `state` | Phases and their control laws |
//! | `controller` | Event hooks and cadence gating |
//!
//! ## Phases
//!
//! | Phase | Law | Rate |
//! |-------|-----|------|
//! | SlowStart | both | `2 × min_c`, or `min_c / 2` once queueing is seen |
//! | CongAvoid | phase-driven | `2 × min_c_lambda + floor`, floor while inflight > 2 × MIN_CWND |
//! | Drain | duty-cycled | floor until inflight ≤ 2 × MIN_CWND |
//! | Probe | duty-cycled | `(2 × min_c_lambda + floor) / MEASUREMENT_INTERVAL_HISTORY` |

mod beliefs;
mod config;
mod controller;
mod diagnostics;
mod errors;
mod history;
mod ledger;
mod state;
mod stats;


// Re-export public API
pub use beliefs::{Beliefs, Counters, RepairOutcome};
pub use config::{
    BeliefConfig, ConfigError, Millis, SegsPerSec, SeqNum, BELIEFS_CHANGED_SIGNIFICANTLY_THRESH,
    BELIEFS_TIMEOUT_PERIOD, HISTORY_SIZE, INITIAL_WINDOW, INIT_MAX_C, INIT_MIN_C,
    INTER_HISTORY_TIME, INTER_RATE_UPDATE_TIME, JITTER_MULTIPLIER, MEASUREMENT_INTERVAL_HISTORY,
    MEASUREMENT_INTERVAL_RTPROP, MIN_CWND, MIN_RTPROP, RESOLVED_SEQ_MEMORY, TIMEOUT_THRESH,
    TIME_DELTA_MAX,
};
pub use controller::BeliefController;
pub use diagnostics::{DiagnosticLine, DiagnosticSink, LogLevel, RecordingSink, TracingSink};
pub use errors::CcError;
pub use history::{HistoryRing, HistorySample};
pub use ledger::Segment;
pub use state::{ControlLaw, Phase, RateDecision};
pub use stats::BeliefStats;

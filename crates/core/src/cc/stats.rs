//! Controller statistics for telemetry and debugging.

use super::config::{Millis, SegsPerSec};
use super::state::{ControlLaw, Phase};

/// Snapshot of the belief controller.
#[derive(Debug, Clone, PartialEq)]
pub struct BeliefStats {
    pub law: ControlLaw,
    pub phase: Phase,

    /// Window reported to the driver (segments).
    pub window: u32,
    pub intersend_time: Millis,
    pub sending_rate: SegsPerSec,

    pub min_rtt: Millis,
    pub min_qdel: Millis,
    pub inflight: u64,
    pub bq_belief2: f64,
    pub min_c: SegsPerSec,
    pub max_c: SegsPerSec,
    pub min_c_lambda: SegsPerSec,

    pub cum_sent: u64,
    pub cum_delivered: u64,
    pub cum_lost: u64,
    pub outstanding: usize,
    pub history_len: usize,

    /// Number of rate/window recomputes.
    pub recomputes: u64,
    /// Number of bound repair checkpoints.
    pub repairs: u64,

    pub unknown_acks: u64,
    pub duplicate_acks: u64,
    pub duplicate_sends: u64,
    pub reordered_deliveries: u64,
    pub timeouts: u64,

    /// Last out-of-band link rate sample, if any (segs/s).
    pub link_rate: Option<f64>,
}

impl std::fmt::Display for BeliefStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CC[{} {}] window={} rate={:.1}/s min_rtt={:.2}ms inflight={} \
             c=[{:.1},{:.1}] lambda={:.1} sent={} delivered={} lost={}",
            self.law,
            self.phase,
            self.window,
            self.sending_rate,
            self.min_rtt,
            self.inflight,
            self.min_c,
            self.max_c,
            self.min_c_lambda,
            self.cum_sent,
            self.cum_delivered,
            self.cum_lost,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_display() {
        let stats = BeliefStats {
            law: ControlLaw::PhaseDriven,
            phase: Phase::CongAvoid,
            window: 80,
            intersend_time: 1.25,
            sending_rate: 800.0,
            min_rtt: 20.0,
            min_qdel: 0.0,
            inflight: 7,
            bq_belief2: 0.0,
            min_c: 400.0,
            max_c: 1000.0,
            min_c_lambda: 300.0,
            cum_sent: 100,
            cum_delivered: 90,
            cum_lost: 3,
            outstanding: 10,
            history_len: 5,
            recomputes: 4,
            repairs: 0,
            unknown_acks: 0,
            duplicate_acks: 0,
            duplicate_sends: 0,
            reordered_deliveries: 0,
            timeouts: 0,
            link_rate: None,
        };

        let display = stats.to_string();
        assert!(display.contains("CONG_AVOID"));
        assert!(display.contains("window=80"));
        assert!(display.contains("c=[400.0,1000.0]"));
    }
}

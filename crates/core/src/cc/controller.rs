//! Belief-based congestion controller.
//!
//! Ties the segment ledger, history ring, belief state and phase machine
//! together behind the event hooks the transport driver calls.

use super::beliefs::{Beliefs, Counters};
use super::config::{BeliefConfig, Millis, SegsPerSec, SeqNum};
use super::diagnostics::{DiagnosticLine, DiagnosticSink, LogLevel, TracingSink};
use super::errors::CcError;
use super::history::{HistoryRing, HistorySample};
use super::ledger::{Segment, SegmentLedger};
use super::state::{ControlLaw, Phase, PhaseMachine, RateDecision};
use super::stats::BeliefStats;

/// Belief-based congestion controller for a single flow.
///
/// The driver injects the clock with [`set_timestamp`](Self::set_timestamp)
/// before every event; no method reads a wall clock, so a recorded event
/// trace always replays to the same outputs.
///
/// ## Usage
///
/// ```ignore
/// let mut controller = BeliefController::new(BeliefConfig::default());
/// controller.set_timestamp(0.0);
/// controller.init();
///
/// controller.on_pkt_sent(0);
/// controller.set_timestamp(20.0);
/// controller.on_ack(1, 10.0, 0.0);
///
/// let window = controller.window();
/// let intersend = controller.intersend_time();
/// ```
pub struct BeliefController {
    config: BeliefConfig,

    // === Estimation State ===
    ledger: SegmentLedger,
    history: HistoryRing,
    beliefs: Beliefs,
    counters: Counters,

    // === Control ===
    phases: PhaseMachine,
    sending_rate: SegsPerSec,
    /// Fractional congestion window (segments).
    cwnd: f64,
    /// Window reported to the driver.
    window: u32,
    intersend_time: Millis,
    /// Set by a timeout, consumed by the next recompute.
    pending_timeout: bool,

    // === Clock ===
    now: Millis,
    last_rate_update_time: Millis,
    last_history_update_time: Millis,

    /// Handshake RTT; reseeds `min_rtt` on every `init()`.
    bootstrap_min_rtt: Option<Millis>,
    link_rate: Option<f64>,

    // === Statistics ===
    recomputes: u64,
    repairs: u64,
    unknown_acks: u64,
    duplicate_acks: u64,
    duplicate_sends: u64,
    reordered_deliveries: u64,
    timeouts: u64,

    sink: Box<dyn DiagnosticSink>,
}

impl BeliefController {
    /// Create a controller that reports diagnostics through `tracing`.
    pub fn new(config: BeliefConfig) -> Self {
        Self::with_sink(config, TracingSink)
    }

    pub fn with_sink(config: BeliefConfig, sink: impl DiagnosticSink + 'static) -> Self {
        let beliefs = Beliefs::new(&config, config.time_delta_max);
        let mut controller = Self {
            ledger: SegmentLedger::new(config.resolved_seq_memory),
            history: HistoryRing::new(config.history_size.max(1)),
            beliefs,
            counters: Counters::default(),
            phases: PhaseMachine::new(config.control_law),
            sending_rate: config.init_min_c,
            cwnd: config.min_cwnd as f64,
            window: config.initial_window,
            intersend_time: 0.0,
            pending_timeout: false,
            now: 0.0,
            last_rate_update_time: 0.0,
            last_history_update_time: 0.0,
            bootstrap_min_rtt: None,
            link_rate: None,
            recomputes: 0,
            repairs: 0,
            unknown_acks: 0,
            duplicate_acks: 0,
            duplicate_sends: 0,
            reordered_deliveries: 0,
            timeouts: 0,
            sink: Box::new(sink),
            config,
        };
        controller.reset();
        controller
    }

    // =========================================================================
    // Event Hooks
    // =========================================================================

    /// Start a new flow epoch. Every estimate returns to its initial value.
    pub fn init(&mut self) {
        self.reset();
        self.emit(
            LogLevel::Info,
            format!(
                "init law={} min_rtt={:.3}",
                self.phases.law(),
                self.beliefs.min_rtt
            ),
        );
    }

    pub fn set_timestamp(&mut self, now: Millis) {
        self.now = now;
    }

    /// Seed `min_rtt` from an out-of-band measurement such as the handshake.
    ///
    /// The value is kept and reapplied by every later `init()`.
    pub fn set_min_rtt(&mut self, rtt: Millis) {
        if !rtt.is_finite() || rtt <= 0.0 {
            self.emit(LogLevel::Error, format!("ignoring bootstrap min_rtt {rtt}"));
            return;
        }
        self.bootstrap_min_rtt = Some(rtt);
        self.beliefs.min_rtt = self.beliefs.min_rtt.min(rtt);
        self.emit(LogLevel::Info, format!("bootstrap min_rtt={rtt:.3}"));
    }

    /// Record a segment handed to the network.
    pub fn on_pkt_sent(&mut self, seq: SeqNum) {
        match self
            .ledger
            .record_sent(seq, self.now, self.counters.delivered)
        {
            Ok(()) => self.counters.sent += 1,
            Err(err) => self.record_anomaly(err),
        }
        self.maybe_recompute();
    }

    /// Process an ack. `ack_seq` is one past the delivered sequence number.
    ///
    /// Returns the resolved segment, with its RTT and the number of segments
    /// this ack newly marked lost, or `None` if the ack was ignored.
    pub fn on_ack(
        &mut self,
        ack_seq: SeqNum,
        receiver_ts: Millis,
        sender_ts: Millis,
    ) -> Option<Segment> {
        tracing::trace!(ack_seq, receiver_ts, sender_ts, now = self.now, "ack");

        let Some(seq) = ack_seq.checked_sub(1) else {
            self.record_anomaly(CcError::UnknownAck { seq: ack_seq });
            return None;
        };
        let mut segment = match self.ledger.resolve_ack(seq) {
            Ok(segment) => segment,
            Err(err) => {
                self.record_anomaly(err);
                return None;
            }
        };

        if segment.lost {
            self.counters.lost = self.counters.lost.saturating_sub(1);
            self.record_anomaly(CcError::ReorderedDelivery { seq });
        }
        segment.this_loss_count = self.ledger.count_and_mark_losses(seq);
        segment.rtt = (self.now - segment.send_tstamp).max(0.0);
        self.counters.lost += segment.this_loss_count;
        self.counters.delivered += 1;

        self.beliefs
            .on_rtt_sample(segment.rtt, self.counters, &self.config);
        self.update_history(&segment);
        self.maybe_recompute();
        Some(segment)
    }

    /// The driver saw no ack within its deadline. The next recompute
    /// falls back to the floor rate.
    pub fn on_timeout(&mut self) {
        self.timeouts += 1;
        self.pending_timeout = true;
        self.emit(LogLevel::Info, CcError::Timeout.to_string());
    }

    /// Out-of-band throughput sample. Reported in stats only.
    pub fn on_link_rate_measurement(&mut self, rate: f64) {
        self.link_rate = Some(rate);
        self.emit(LogLevel::Debug, format!("link_rate rate={rate:.3}"));
    }

    /// Leave slow start for the control law's steady-state phase.
    pub fn enter_steady_state(&mut self) -> Phase {
        let from = self.phases.phase();
        let to = self.phases.enter_steady_state();
        if from != to {
            self.emit(LogLevel::Info, format!("phase {from} -> {to}"));
        }
        to
    }

    /// Flow teardown. Logs the final statistics; later events are still
    /// accepted.
    pub fn close(&mut self) {
        let stats = self.stats();
        self.emit(LogLevel::Info, format!("close {stats}"));
        self.sink.flush();
    }

    // =========================================================================
    // Outputs
    // =========================================================================

    pub fn window(&self) -> u32 {
        self.window
    }

    /// Minimum spacing between sends (ms).
    pub fn intersend_time(&self) -> Millis {
        self.intersend_time
    }

    pub fn sending_rate(&self) -> SegsPerSec {
        self.sending_rate
    }

    pub fn cwnd(&self) -> f64 {
        self.cwnd
    }

    pub fn phase(&self) -> Phase {
        self.phases.phase()
    }

    pub fn law(&self) -> ControlLaw {
        self.phases.law()
    }

    pub fn beliefs(&self) -> &Beliefs {
        &self.beliefs
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn history(&self) -> &HistoryRing {
        &self.history
    }

    /// Outstanding (or lost but not yet expired) segment.
    pub fn segment(&self, seq: SeqNum) -> Option<&Segment> {
        self.ledger.get(seq)
    }

    pub fn config(&self) -> &BeliefConfig {
        &self.config
    }

    pub fn now(&self) -> Millis {
        self.now
    }

    /// Get statistics snapshot for telemetry.
    pub fn stats(&self) -> BeliefStats {
        BeliefStats {
            law: self.phases.law(),
            phase: self.phases.phase(),
            window: self.window,
            intersend_time: self.intersend_time,
            sending_rate: self.sending_rate,
            min_rtt: self.beliefs.min_rtt,
            min_qdel: self.beliefs.min_qdel,
            inflight: self.beliefs.bq_belief1,
            bq_belief2: self.beliefs.bq_belief2,
            min_c: self.beliefs.min_c,
            max_c: self.beliefs.max_c,
            min_c_lambda: self.beliefs.min_c_lambda,
            cum_sent: self.counters.sent,
            cum_delivered: self.counters.delivered,
            cum_lost: self.counters.lost,
            outstanding: self.ledger.len(),
            history_len: self.history.len(),
            recomputes: self.recomputes,
            repairs: self.repairs,
            unknown_acks: self.unknown_acks,
            duplicate_acks: self.duplicate_acks,
            duplicate_sends: self.duplicate_sends,
            reordered_deliveries: self.reordered_deliveries,
            timeouts: self.timeouts,
            link_rate: self.link_rate,
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn reset(&mut self) {
        let min_rtt = self.bootstrap_min_rtt.unwrap_or(self.config.time_delta_max);
        self.ledger.clear();
        self.history.clear();
        self.beliefs = Beliefs::new(&self.config, min_rtt);
        self.beliefs.last_timeout_time = self.now;
        self.counters = Counters::default();
        self.phases.reset();

        self.sending_rate = self.config.init_min_c;
        self.cwnd = self.config.min_cwnd as f64;
        self.window = self.config.initial_window;
        self.intersend_time = 0.0;
        self.pending_timeout = false;
        self.last_rate_update_time = self.now;
        self.last_history_update_time = self.now;
    }

    /// Append a history sample at each boundary, otherwise extend the open one.
    fn update_history(&mut self, segment: &Segment) {
        let period = self.config.inter_history_time * self.beliefs.rtprop();
        let elapsed = self.now - self.last_history_update_time;

        if !self.history.is_empty() && elapsed < period {
            if let Some(open) = self.history.back_mut() {
                open.extend(segment.rtt);
            }
            return;
        }

        self.last_history_update_time = self.now;
        self.history.push(HistorySample {
            creation_tstamp: self.now,
            interval_min_rtt: segment.rtt,
            interval_max_rtt: segment.rtt,
            creation_cum_sent: self.counters.sent,
            creation_cum_delivered: self.counters.delivered,
            creation_cum_lost: self.counters.lost,
            creation_sending_rate: self.sending_rate,
            creation_cum_delivered_at_send: segment.cum_delivered_at_send,
            interval_segs_lost: segment.this_loss_count,
            processed: false,
        });

        self.beliefs.update_bq_belief2(self.counters.sent, elapsed);
        self.beliefs.update_minc_maxc(&self.history, &self.config);
        // The first checkpoint waits for a second sample to scan against.
        if self.history.len() > 1 {
            if let Some(outcome) = self.beliefs.repair_bounds(self.now, &self.config) {
                self.repairs += 1;
                tracing::debug!(
                    reset_minc = outcome.reset_minc,
                    shrink_maxc = outcome.shrink_maxc,
                    forced = outcome.forced,
                    min_c = self.beliefs.min_c,
                    max_c = self.beliefs.max_c,
                    "Capacity bounds repaired"
                );
            }
        }
        self.beliefs.update_minc_lambda(
            &mut self.history,
            segment.cum_delivered_at_send,
            &self.config,
        );

        let span = self.config.history_size as f64
            * self.config.inter_history_time
            * self.beliefs.rtprop();
        let expired = self.ledger.expire_lost(self.now - span);
        if expired > 0 {
            tracing::debug!(expired, "Expired lost segments");
        }
    }

    fn maybe_recompute(&mut self) {
        let period = self.config.inter_rate_update_time * self.beliefs.rtprop();
        if self.now - self.last_rate_update_time < period {
            return;
        }
        self.last_rate_update_time = self.now;

        let decision = if std::mem::take(&mut self.pending_timeout) {
            self.phases.floor(&self.beliefs, &self.config)
        } else {
            self.phases.decide(&self.beliefs, &self.config)
        };
        self.apply(decision);
        self.recomputes += 1;
        self.dump();
    }

    fn apply(&mut self, decision: RateDecision) {
        self.sending_rate = decision.sending_rate;
        self.cwnd = decision.cwnd;
        // Saturating cast: negative and NaN become 0.
        self.window = decision.cwnd as u32;
        self.intersend_time = decision.intersend_time;
    }

    fn dump(&mut self) {
        let state = format!(
            "state phase={} rate={:.3} cwnd={:.3} window={} intersend={:.3} \
             sent={} delivered={} lost={}",
            self.phases.phase(),
            self.sending_rate,
            self.cwnd,
            self.window,
            self.intersend_time,
            self.counters.sent,
            self.counters.delivered,
            self.counters.lost,
        );
        self.emit(LogLevel::Debug, state);

        let beliefs = format!("beliefs {}", self.beliefs);
        self.emit(LogLevel::Debug, beliefs);

        let history = format!("history len={}", self.history.len());
        self.emit(LogLevel::Debug, history);
        let samples: Vec<String> = self
            .history
            .iter()
            .enumerate()
            .map(|(i, sample)| format!("sample[{i}] {sample}"))
            .collect();
        for sample in samples {
            self.emit(LogLevel::Debug, sample);
        }
    }

    fn record_anomaly(&mut self, err: CcError) {
        match err {
            CcError::UnknownAck { .. } => self.unknown_acks += 1,
            CcError::DuplicateAck { .. } => self.duplicate_acks += 1,
            CcError::DuplicateSend { .. } => self.duplicate_sends += 1,
            CcError::ReorderedDelivery { .. } => self.reordered_deliveries += 1,
            CcError::Timeout => self.timeouts += 1,
        }
        self.emit(LogLevel::Error, err.to_string());
    }

    fn emit(&mut self, level: LogLevel, message: String) {
        self.sink.emit(DiagnosticLine {
            level,
            now: self.now,
            message,
        });
    }
}

impl std::fmt::Debug for BeliefController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeliefController")
            .field("phase", &self.phases.phase())
            .field("window", &self.window)
            .field("sending_rate", &self.sending_rate)
            .field("min_rtt", &self.beliefs.min_rtt)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cc::config::MIN_CWND;
    use crate::cc::diagnostics::RecordingSink;

    fn controller() -> (BeliefController, RecordingSink) {
        let sink = RecordingSink::new();
        let mut controller = BeliefController::with_sink(BeliefConfig::default(), sink.clone());
        controller.set_timestamp(0.0);
        controller.init();
        (controller, sink)
    }

    /// Send `0..n` at t=0, then ack seq 0 at t=20.
    fn warmed_up(n: SeqNum) -> (BeliefController, RecordingSink) {
        let (mut controller, sink) = controller();
        for seq in 0..n {
            controller.on_pkt_sent(seq);
        }
        controller.set_timestamp(20.0);
        controller.on_ack(1, 10.0, 0.0);
        (controller, sink)
    }

    #[test]
    fn test_controller_creation() {
        let (controller, _) = controller();
        assert_eq!(controller.window(), 2);
        assert_eq!(controller.intersend_time(), 0.0);
        assert_eq!(controller.phase(), Phase::SlowStart);
        assert_eq!(controller.sending_rate(), 5.0);
        assert_eq!(controller.beliefs().min_rtt, 1e5);
    }

    #[test]
    fn test_first_ack_recomputes() {
        let (controller, sink) = warmed_up(10);
        // 2 * min_c is below the floor of 5 * 1000 / 20
        assert_eq!(controller.sending_rate(), 250.0);
        assert_eq!(controller.intersend_time(), 4.0);
        // 2 * 1e5 * (20 + 20) / 1000
        assert_eq!(controller.window(), 8000);
        assert_eq!(controller.history().len(), 1);

        assert_eq!(sink.matching("state ").len(), 1);
        assert_eq!(sink.matching("beliefs ").len(), 1);
        assert_eq!(sink.matching("history ").len(), 1);
        assert_eq!(sink.matching("sample[0] ").len(), 1);
    }

    #[test]
    fn test_zero_rtt_acks_keep_flow_paced() {
        let (mut controller, _) = controller();
        for t in 0..50 {
            controller.set_timestamp(t as Millis);
            controller.on_pkt_sent(t);
            controller.on_ack(t + 1, t as Millis, t as Millis);
        }

        assert_eq!(controller.beliefs().min_rtt, 0.0);
        assert!(controller.window() >= MIN_CWND);
        // Floor uses the 1ms clock resolution: 5 * 1000 / 1
        assert!(controller.sending_rate() >= 5_000.0);
        assert!(controller.sending_rate().is_finite());
        assert!(controller.intersend_time() > 0.0);
        // At most one recompute per millisecond
        assert!(controller.stats().recomputes <= 50);
    }

    #[test]
    fn test_zero_measurement_span_stays_finite() {
        let config = BeliefConfig {
            measurement_interval_history: 0,
            control_law: ControlLaw::DutyCycled,
            ..Default::default()
        };
        let mut controller = BeliefController::with_sink(config, RecordingSink::new());
        controller.set_timestamp(0.0);
        controller.init();
        controller.on_pkt_sent(0);
        controller.enter_steady_state();
        controller.set_timestamp(20.0);
        controller.on_ack(1, 10.0, 0.0);

        assert_eq!(controller.phase(), Phase::Drain);
        // One probe tick: 2 * 5 + 250
        assert_eq!(controller.sending_rate(), 260.0);
        assert_eq!(controller.intersend_time(), 1000.0 / 260.0);
    }

    #[test]
    fn test_history_dump_lists_every_sample() {
        let (mut controller, sink) = warmed_up(10);
        controller.set_timestamp(40.0);
        controller.on_ack(2, 20.0, 0.0);
        controller.set_timestamp(60.0);
        controller.on_ack(3, 30.0, 0.0);

        assert_eq!(controller.history().len(), 3);
        assert_eq!(controller.stats().recomputes, 3);
        // One sample line per ring entry on each of the three dumps
        assert_eq!(sink.matching("sample[").len(), 1 + 2 + 3);
        let last = sink.lines().last().cloned().expect("dump lines");
        assert!(last.message.starts_with("sample[2] ts=60.000"), "{}", last.message);
    }

    #[test]
    fn test_repair_waits_for_second_sample() {
        let (mut controller, _) = controller();
        controller.set_timestamp(280.0);
        controller.on_pkt_sent(0);
        controller.on_pkt_sent(1);
        // Past 12 * 20ms since init, but only one sample so far
        controller.set_timestamp(300.0);
        controller.on_ack(1, 290.0, 280.0);
        assert_eq!(controller.history().len(), 1);
        assert_eq!(controller.stats().repairs, 0);

        controller.set_timestamp(320.0);
        controller.on_ack(2, 300.0, 280.0);
        assert_eq!(controller.history().len(), 2);
        assert_eq!(controller.stats().repairs, 1);
    }

    #[test]
    fn test_recompute_is_cadence_gated() {
        let (mut controller, _) = warmed_up(10);
        controller.set_timestamp(30.0);
        controller.on_ack(2, 10.0, 0.0);
        assert_eq!(controller.stats().recomputes, 1);
        controller.set_timestamp(40.0);
        controller.on_pkt_sent(10);
        assert_eq!(controller.stats().recomputes, 2);
    }

    #[test]
    fn test_duplicate_send_keeps_entry() {
        let (mut controller, sink) = controller();
        controller.on_pkt_sent(3);
        controller.set_timestamp(5.0);
        controller.on_pkt_sent(3);

        assert_eq!(controller.counters().sent, 1);
        assert_eq!(controller.segment(3).unwrap().send_tstamp, 0.0);
        assert_eq!(controller.stats().duplicate_sends, 1);
        assert_eq!(sink.count(LogLevel::Error), 1);
    }

    #[test]
    fn test_unknown_and_duplicate_acks_are_ignored() {
        let (mut controller, _) = warmed_up(4);
        let before = controller.counters();

        assert!(controller.on_ack(0, 0.0, 0.0).is_none());
        assert!(controller.on_ack(99, 0.0, 0.0).is_none());
        assert!(controller.on_ack(1, 0.0, 0.0).is_none());

        assert_eq!(controller.counters(), before);
        let stats = controller.stats();
        assert_eq!(stats.unknown_acks, 2);
        assert_eq!(stats.duplicate_acks, 1);
    }

    #[test]
    fn test_reordered_delivery_corrects_loss() {
        let (mut controller, sink) = warmed_up(4);

        controller.set_timestamp(21.0);
        let seg = controller.on_ack(3, 0.0, 0.0).unwrap();
        assert_eq!(seg.this_loss_count, 1);
        assert_eq!(controller.counters().lost, 1);
        assert!(controller.segment(1).unwrap().lost);

        controller.set_timestamp(22.0);
        let seg = controller.on_ack(2, 0.0, 0.0).unwrap();
        assert!(seg.lost);
        assert_eq!(seg.this_loss_count, 0);
        assert_eq!(controller.counters().lost, 0);
        assert_eq!(controller.counters().delivered, 3);

        let stats = controller.stats();
        assert_eq!(stats.reordered_deliveries, 1);
        assert_eq!(stats.unknown_acks, 0);
        assert_eq!(sink.count(LogLevel::Error), 1);
    }

    #[test]
    fn test_timeout_floors_next_recompute_only() {
        let (mut controller, sink) = warmed_up(10);
        controller.enter_steady_state();

        controller.on_timeout();
        assert_eq!(controller.sending_rate(), 250.0);
        controller.set_timestamp(45.0);
        controller.on_pkt_sent(10);
        assert_eq!(controller.sending_rate(), 250.0);

        // Inflight 9 <= 2 * MIN_CWND: 2 * min_c_lambda + floor
        controller.set_timestamp(70.0);
        controller.on_pkt_sent(11);
        assert_eq!(controller.sending_rate(), 260.0);

        assert_eq!(controller.stats().timeouts, 1);
        assert!(sink
            .lines()
            .iter()
            .any(|l| l.level == LogLevel::Info && l.message.contains("timeout")));
    }

    #[test]
    fn test_bootstrap_min_rtt_survives_init() {
        let (mut controller, _) = controller();
        controller.set_min_rtt(30.0);
        assert_eq!(controller.beliefs().min_rtt, 30.0);

        controller.set_timestamp(10.0);
        controller.on_pkt_sent(0);
        controller.set_timestamp(25.0);
        controller.on_ack(1, 0.0, 0.0);
        assert_eq!(controller.beliefs().min_rtt, 15.0);

        controller.init();
        assert_eq!(controller.beliefs().min_rtt, 30.0);
        assert_eq!(controller.counters(), Counters::default());
        assert!(controller.history().is_empty());
    }

    #[test]
    fn test_invalid_bootstrap_rtt_is_ignored() {
        let (mut controller, sink) = controller();
        controller.set_min_rtt(-1.0);
        controller.set_min_rtt(f64::NAN);
        assert_eq!(controller.beliefs().min_rtt, 1e5);
        assert_eq!(sink.count(LogLevel::Error), 2);
    }

    #[test]
    fn test_steady_state_transition_logged() {
        let (mut controller, sink) = controller();
        assert_eq!(controller.enter_steady_state(), Phase::CongAvoid);
        assert_eq!(controller.enter_steady_state(), Phase::CongAvoid);
        assert_eq!(sink.matching("phase ").len(), 1);

        controller.init();
        assert_eq!(controller.phase(), Phase::SlowStart);
    }

    #[test]
    fn test_link_rate_and_close() {
        let (mut controller, sink) = warmed_up(2);
        controller.on_link_rate_measurement(1234.0);
        assert_eq!(controller.stats().link_rate, Some(1234.0));

        controller.close();
        let close = sink.matching("close ");
        assert_eq!(close.len(), 1);
        assert_eq!(close[0].level, LogLevel::Info);

        // Still usable after close
        controller.set_timestamp(50.0);
        assert!(controller.on_ack(2, 0.0, 0.0).is_some());
    }
}

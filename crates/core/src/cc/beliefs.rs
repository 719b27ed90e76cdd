//! Belief state: scalar estimates derived from the ledger and history ring.
//!
//! ## Estimators
//!
//! | Belief | Updated | Source |
//! |--------|---------|--------|
//! | `min_rtt`, `min_qdel`, `bq_belief1` | every ack | RTT sample, cumulative counters |
//! | `bq_belief2` | every new history sample | sent count vs `min_c_lambda` drain |
//! | `min_c`, `max_c` | every new history sample | windowed delivery rates |
//! | `min_c_lambda` | every new history sample | causally valid, underutilized windows |
//!
//! `min_c`/`max_c` are meant to satisfy `max_c >= min_c`. A stale bound can
//! break that; the periodic repair (every `BELIEFS_TIMEOUT_PERIOD × min_rtt`)
//! relaxes whichever bound stopped moving.

use super::config::{BeliefConfig, Millis, SegsPerSec, MIN_RTPROP, MS_PER_SEC, TIME_EPSILON};
use super::history::HistoryRing;

/// Cumulative segment counters for the flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub sent: u64,
    pub delivered: u64,
    pub lost: u64,
}

impl Counters {
    /// Segments neither delivered nor lost.
    pub fn inflight(&self) -> u64 {
        self.sent
            .saturating_sub(self.delivered)
            .saturating_sub(self.lost)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Beliefs {
    // Updated on every ack
    pub min_rtt: Millis,
    pub min_qdel: Millis,
    /// Inflight segments (exact).
    pub bq_belief1: u64,

    // Updated on every new history sample
    pub min_c_lambda: SegsPerSec,
    /// Estimated bottleneck queue, in segments.
    pub bq_belief2: f64,
    pub last_segs_sent: u64,

    pub min_c: SegsPerSec,
    pub max_c: SegsPerSec,

    pub minc_since_last_timeout: SegsPerSec,
    pub maxc_since_last_timeout: SegsPerSec,
    pub last_timeout_minc: SegsPerSec,
    pub last_timeout_maxc: SegsPerSec,
    pub last_timeout_time: Millis,
}

/// What a repair checkpoint observed and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepairOutcome {
    pub minc_changed: bool,
    pub maxc_changed: bool,
    pub minc_changed_significantly: bool,
    pub maxc_changed_significantly: bool,
    pub beliefs_invalid: bool,
    pub reset_minc: bool,
    pub shrink_maxc: bool,
    /// Both bounds moved and still crossed; `min_c` was pulled down to `max_c`.
    pub forced: bool,
}

impl Beliefs {
    pub fn new(config: &BeliefConfig, min_rtt: Millis) -> Self {
        Self {
            min_rtt,
            min_qdel: config.time_delta_max,
            bq_belief1: 0,
            min_c_lambda: config.init_min_c,
            bq_belief2: 0.0,
            last_segs_sent: 0,
            min_c: config.init_min_c,
            max_c: config.init_max_c,
            minc_since_last_timeout: config.init_min_c,
            maxc_since_last_timeout: config.init_max_c,
            last_timeout_minc: config.init_min_c,
            last_timeout_maxc: config.init_max_c,
            last_timeout_time: 0.0,
        }
    }

    /// `min_rtt` as a time base, floored at [`MIN_RTPROP`].
    pub(crate) fn rtprop(&self) -> Millis {
        self.min_rtt.max(MIN_RTPROP)
    }

    pub(crate) fn jitter(&self, config: &BeliefConfig) -> Millis {
        self.rtprop() * config.jitter_multiplier
    }

    /// The rate that keeps `MIN_CWND` segments in flight per `min_rtt`.
    pub fn min_sending_rate(&self, config: &BeliefConfig) -> SegsPerSec {
        config.min_cwnd as f64 * MS_PER_SEC / self.rtprop()
    }

    /// Fold an RTT sample and the current counters into the per-ack beliefs.
    pub(crate) fn on_rtt_sample(&mut self, rtt: Millis, counters: Counters, config: &BeliefConfig) {
        self.min_rtt = self.min_rtt.min(rtt);
        let jitter = self.jitter(config);
        self.min_qdel = (rtt - self.rtprop() - jitter).max(0.0);
        self.bq_belief1 = counters.inflight();
    }

    /// Advance the queue estimate by what was sent minus what the bottleneck
    /// is believed to have drained since the previous sample.
    pub(crate) fn update_bq_belief2(&mut self, cum_sent: u64, elapsed: Millis) {
        let sent = cum_sent.saturating_sub(self.last_segs_sent) as f64;
        let drained = self.min_c_lambda * elapsed.max(0.0) / MS_PER_SEC;
        self.bq_belief2 = (self.bq_belief2 + sent - drained).clamp(0.0, self.bq_belief1 as f64);
        self.last_segs_sent = cum_sent;
    }

    /// Scan the history for fresh capacity bounds and merge them.
    ///
    /// Each older sample `st` is paired with the newest sample `et`:
    /// - `delivered / (window + jitter)` is an achievable rate, so the max over
    ///   all windows raises the lower bound.
    /// - `delivered / (window - jitter)` caps capacity, but only while every
    ///   interval walked so far kept the link busy (queueing or loss). The
    ///   single most recent interval is skipped as too noisy.
    pub(crate) fn update_minc_maxc(&mut self, history: &HistoryRing, config: &BeliefConfig) {
        if history.len() <= 1 {
            return;
        }
        let Some(et) = history.back() else {
            return;
        };

        let jitter = self.jitter(config);
        let threshold = self.rtprop() + jitter;

        let mut fresh_minc = config.init_min_c;
        let mut fresh_maxc = config.init_max_c;
        let mut cum_utilized = true;

        for (depth, st) in history.iter().rev().skip(1).enumerate() {
            let past = depth + 1;
            cum_utilized = cum_utilized && st.is_utilized(threshold);

            let window = et.creation_tstamp - st.creation_tstamp;
            let delivered = et
                .creation_cum_delivered
                .saturating_sub(st.creation_cum_delivered) as f64;

            if window + jitter > TIME_EPSILON {
                fresh_minc = fresh_minc.max(delivered * MS_PER_SEC / (window + jitter));
            }
            if cum_utilized && past > 1 && window - jitter > TIME_EPSILON {
                fresh_maxc = fresh_maxc.min(delivered * MS_PER_SEC / (window - jitter));
            }
        }

        let floor = self.min_sending_rate(config);
        self.minc_since_last_timeout = self.minc_since_last_timeout.max(fresh_minc);
        self.maxc_since_last_timeout = self.maxc_since_last_timeout.min(fresh_maxc).max(floor);
        self.min_c = self.min_c.max(fresh_minc);
        self.max_c = self.max_c.min(fresh_maxc).max(floor);
    }

    /// Run the repair checkpoint if a full timeout period has elapsed.
    pub(crate) fn repair_bounds(
        &mut self,
        now: Millis,
        config: &BeliefConfig,
    ) -> Option<RepairOutcome> {
        let period = self.rtprop() * config.beliefs_timeout_period;
        if now - self.last_timeout_time <= period {
            return None;
        }
        self.last_timeout_time = now;

        let thresh = config.beliefs_changed_significantly_thresh;
        let mut outcome = RepairOutcome {
            minc_changed: self.min_c > self.last_timeout_minc,
            maxc_changed: self.max_c < self.last_timeout_maxc,
            minc_changed_significantly: self.min_c > thresh * self.last_timeout_minc,
            maxc_changed_significantly: self.max_c * thresh < self.last_timeout_maxc,
            beliefs_invalid: self.max_c < self.min_c,
            ..Default::default()
        };

        // A bound that did not move during the period is stale. It is relaxed
        // when the bounds crossed, or when the other bound has not tightened
        // significantly either.
        outcome.reset_minc = !outcome.minc_changed
            && (outcome.beliefs_invalid || !outcome.maxc_changed_significantly);
        outcome.shrink_maxc = !outcome.maxc_changed
            && (outcome.beliefs_invalid || !outcome.minc_changed_significantly);

        if outcome.reset_minc {
            self.min_c = self.minc_since_last_timeout;
        }
        if outcome.shrink_maxc {
            self.max_c = (self.max_c * config.timeout_thresh).min(self.maxc_since_last_timeout);
        }
        if self.max_c < self.min_c {
            outcome.forced = true;
            self.min_c = self.max_c;
        }

        self.last_timeout_minc = self.min_c;
        self.last_timeout_maxc = self.max_c;
        self.minc_since_last_timeout = config.init_min_c;
        self.maxc_since_last_timeout = config.init_max_c;
        Some(outcome)
    }

    /// Raise `min_c_lambda` from windows that are causally complete and were
    /// underutilized end to end.
    ///
    /// `delivered_1rtt_ago` is the delivered count when the acked segment was
    /// sent: a window whose end had already seen more deliveries cannot have
    /// been observed by that segment yet. The walk stops at the first
    /// congested interval since every older window would include it.
    pub(crate) fn update_minc_lambda(
        &mut self,
        history: &mut HistoryRing,
        delivered_1rtt_ago: u64,
        config: &BeliefConfig,
    ) {
        let len = history.len();
        if len <= 1 {
            return;
        }
        let span = config.measurement_span();
        let threshold = self.rtprop() + self.jitter(config);

        let mut cum_underutilized = history
            .back()
            .is_some_and(|latest| latest.is_underutilized(threshold));
        let mut new_minc_lambda = config.init_min_c;

        for (past, hid) in (0..len - 1).rev().enumerate().map(|(d, h)| (d + 1, h)) {
            let Some(st) = history.get(hid).copied() else {
                break;
            };
            cum_underutilized = cum_underutilized && st.is_underutilized(threshold);

            if past < span || st.processed {
                continue;
            }
            let Some(et) = history.get(hid + span).copied() else {
                continue;
            };
            if et.creation_cum_delivered > delivered_1rtt_ago {
                continue;
            }

            if let Some(st) = history.get_mut(hid) {
                st.processed = true;
            }
            if !cum_underutilized {
                break;
            }

            let segs_sent = et.creation_cum_sent.saturating_sub(st.creation_cum_sent) as f64;
            let window = et.creation_tstamp - st.creation_tstamp;
            if window > TIME_EPSILON {
                new_minc_lambda = new_minc_lambda.max(segs_sent * MS_PER_SEC / window);
            }
        }

        self.min_c_lambda = self.min_c_lambda.max(new_minc_lambda);
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.max_c >= self.min_c
    }
}

impl std::fmt::Display for Beliefs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "min_rtt={:.3} min_qdel={:.3} bq1={} bq2={:.2} min_c_lambda={:.2} \
             min_c={:.2} max_c={:.2} minc_since_timeout={:.2} maxc_since_timeout={:.2} \
             last_timeout_minc={:.2} last_timeout_maxc={:.2}",
            self.min_rtt,
            self.min_qdel,
            self.bq_belief1,
            self.bq_belief2,
            self.min_c_lambda,
            self.min_c,
            self.max_c,
            self.minc_since_last_timeout,
            self.maxc_since_last_timeout,
            self.last_timeout_minc,
            self.last_timeout_maxc,
        )
    }
}

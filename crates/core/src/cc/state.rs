//! Controller phases and their control laws.
//!
//! ## Phase Transitions
//!
//! ```text
//! ┌────────────────┐
//! │   SlowStart    │  rate = 2 × min_c, halved when queueing is seen
//! └───────┬────────┘
//!         │ enter_steady_state() (operator driven)
//!         ├──────────────────────────────┐
//!         ▼ PhaseDriven                  ▼ DutyCycled
//! ┌────────────────┐            ┌────────────────┐  inflight <= 2 × MIN_CWND  ┌───────┐
//! │   CongAvoid    │            │     Drain      │ ─────────────────────────► │ Probe │
//! │                │            │  (floor rate)  │ ◄───────────────────────── │       │
//! └────────────────┘            └────────────────┘  after MEASUREMENT_INTERVAL└───────┘
//!                                                     _HISTORY ticks
//!
//! init() from any phase → SlowStart
//! ```

use serde::{Deserialize, Serialize};

use super::beliefs::Beliefs;
use super::config::{BeliefConfig, Millis, SegsPerSec, MS_PER_SEC};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Fast convergence: ramp towards the lower capacity bound.
    SlowStart,
    /// Slow convergence: pace at the underutilization-gated throughput estimate.
    CongAvoid,
    /// Duty-cycled law: send at the probe rate for a measurement interval.
    Probe,
    /// Duty-cycled law: hold the floor rate until the queue drains.
    Drain,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Phase::SlowStart => "SLOW_START",
            Phase::CongAvoid => "CONG_AVOID",
            Phase::Probe => "PROBE",
            Phase::Drain => "DRAIN",
        })
    }
}

/// Steady-state control law, chosen when the controller is built.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ControlLaw {
    /// `SlowStart` followed by `CongAvoid`.
    #[default]
    PhaseDriven,
    /// `SlowStart` followed by alternating `Drain`/`Probe`.
    DutyCycled,
}

impl std::fmt::Display for ControlLaw {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlLaw::PhaseDriven => write!(f, "phase-driven"),
            ControlLaw::DutyCycled => write!(f, "duty-cycled"),
        }
    }
}

/// Output of one rate/window recompute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDecision {
    pub sending_rate: SegsPerSec,
    /// Congestion window in segments (fractional).
    pub cwnd: f64,
    pub intersend_time: Millis,
}

impl RateDecision {
    fn new(sending_rate: SegsPerSec, beliefs: &Beliefs, config: &BeliefConfig) -> Self {
        let rtprop = beliefs.rtprop();
        let jitter = beliefs.jitter(config);
        let cwnd = (2.0 * beliefs.max_c * (rtprop + jitter) / MS_PER_SEC)
            .max(config.min_cwnd as f64);
        Self {
            sending_rate,
            cwnd,
            intersend_time: MS_PER_SEC / sending_rate,
        }
    }
}

/// Phase state machine plus the duty-cycle probe counter.
#[derive(Debug, Clone)]
pub(crate) struct PhaseMachine {
    law: ControlLaw,
    phase: Phase,
    probe_counter: usize,
}

impl PhaseMachine {
    pub(crate) fn new(law: ControlLaw) -> Self {
        Self {
            law,
            phase: Phase::SlowStart,
            probe_counter: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.phase = Phase::SlowStart;
        self.probe_counter = 0;
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn law(&self) -> ControlLaw {
        self.law
    }

    /// Leave `SlowStart` for the law's steady-state phase. No-op otherwise.
    pub(crate) fn enter_steady_state(&mut self) -> Phase {
        if self.phase == Phase::SlowStart {
            self.phase = match self.law {
                ControlLaw::PhaseDriven => Phase::CongAvoid,
                ControlLaw::DutyCycled => Phase::Drain,
            };
            self.probe_counter = 0;
        }
        self.phase
    }

    /// Apply the current phase's control law.
    pub(crate) fn decide(&mut self, beliefs: &Beliefs, config: &BeliefConfig) -> RateDecision {
        let floor = beliefs.min_sending_rate(config);
        let rate = match self.phase {
            Phase::SlowStart => fast_conv_rate(beliefs, config),
            Phase::CongAvoid => slow_conv_rate(beliefs, config, floor),
            Phase::Probe | Phase::Drain => self.duty_cycled_rate(beliefs, config, floor),
        };
        RateDecision::new(rate.max(floor), beliefs, config)
    }

    /// Clamp to the floor without advancing the phase.
    pub(crate) fn floor(&self, beliefs: &Beliefs, config: &BeliefConfig) -> RateDecision {
        RateDecision::new(beliefs.min_sending_rate(config), beliefs, config)
    }

    fn duty_cycled_rate(
        &mut self,
        beliefs: &Beliefs,
        config: &BeliefConfig,
        floor: SegsPerSec,
    ) -> SegsPerSec {
        let span = config.measurement_span();
        if self.phase == Phase::Drain {
            if beliefs.bq_belief1 > 2 * config.min_cwnd as u64 {
                return floor;
            }
            self.phase = Phase::Probe;
            self.probe_counter = 0;
        }

        let probe_rate =
            ((1.0 + config.jitter_multiplier) * beliefs.min_c_lambda + floor) / span as f64;
        self.probe_counter += 1;
        if self.probe_counter >= span {
            self.phase = Phase::Drain;
            self.probe_counter = 0;
        }
        probe_rate
    }
}

/// Slow start: back off to half the lower bound when queueing is seen,
/// otherwise ramp past it.
fn fast_conv_rate(beliefs: &Beliefs, config: &BeliefConfig) -> SegsPerSec {
    if beliefs.min_qdel > 0.0 {
        beliefs.min_c / 2.0
    } else {
        (1.0 + config.jitter_multiplier) * beliefs.min_c
    }
}

/// Steady state: drain when the pipe holds more than two minimum windows.
fn slow_conv_rate(beliefs: &Beliefs, config: &BeliefConfig, floor: SegsPerSec) -> SegsPerSec {
    if beliefs.bq_belief1 > 2 * config.min_cwnd as u64 {
        floor
    } else {
        (1.0 + config.jitter_multiplier) * beliefs.min_c_lambda + floor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beliefs(config: &BeliefConfig) -> Beliefs {
        let mut beliefs = Beliefs::new(config, 20.0);
        beliefs.min_qdel = 0.0;
        beliefs.min_c = 400.0;
        beliefs.max_c = 1000.0;
        beliefs.min_c_lambda = 300.0;
        beliefs
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::SlowStart.to_string(), "SLOW_START");
        assert_eq!(Phase::CongAvoid.to_string(), "CONG_AVOID");
        assert_eq!(ControlLaw::DutyCycled.to_string(), "duty-cycled");
    }

    #[test]
    fn test_slow_start_ramps_without_queueing() {
        let config = BeliefConfig::default();
        let beliefs = beliefs(&config);
        let mut machine = PhaseMachine::new(ControlLaw::PhaseDriven);
        let decision = machine.decide(&beliefs, &config);
        assert_eq!(decision.sending_rate, 800.0);
        // 2 * 1000 * (20 + 20) / 1000
        assert_eq!(decision.cwnd, 80.0);
        assert_eq!(decision.intersend_time, 1000.0 / 800.0);
    }

    #[test]
    fn test_slow_start_backs_off_on_queueing() {
        let config = BeliefConfig::default();
        let mut beliefs = beliefs(&config);
        beliefs.min_qdel = 3.0;
        let mut machine = PhaseMachine::new(ControlLaw::PhaseDriven);
        assert_eq!(machine.decide(&beliefs, &config).sending_rate, 250.0);

        // Never below the floor (5 * 1000 / 20 = 250)
        beliefs.min_c = 100.0;
        assert_eq!(machine.decide(&beliefs, &config).sending_rate, 250.0);
    }

    #[test]
    fn test_cong_avoid_law() {
        let config = BeliefConfig::default();
        let mut beliefs = beliefs(&config);
        let mut machine = PhaseMachine::new(ControlLaw::PhaseDriven);
        assert_eq!(machine.enter_steady_state(), Phase::CongAvoid);

        beliefs.bq_belief1 = 10;
        assert_eq!(machine.decide(&beliefs, &config).sending_rate, 850.0);

        beliefs.bq_belief1 = 11;
        assert_eq!(machine.decide(&beliefs, &config).sending_rate, 250.0);
    }

    #[test]
    fn test_duty_cycle_alternates() {
        let config = BeliefConfig::default();
        let mut beliefs = beliefs(&config);
        let mut machine = PhaseMachine::new(ControlLaw::DutyCycled);
        assert_eq!(machine.enter_steady_state(), Phase::Drain);

        beliefs.bq_belief1 = 20;
        assert_eq!(machine.decide(&beliefs, &config).sending_rate, 250.0);
        assert_eq!(machine.phase(), Phase::Drain);

        beliefs.bq_belief1 = 3;
        // One probe tick at (2 * 300 + 250) / 1, then back to Drain
        assert_eq!(machine.decide(&beliefs, &config).sending_rate, 850.0);
        assert_eq!(machine.phase(), Phase::Drain);
    }

    #[test]
    fn test_duty_cycle_probes_for_full_interval() {
        let config = BeliefConfig {
            measurement_interval_history: 3,
            ..Default::default()
        };
        let mut beliefs = beliefs(&config);
        beliefs.bq_belief1 = 0;
        let mut machine = PhaseMachine::new(ControlLaw::DutyCycled);
        machine.enter_steady_state();

        let probe_rate = (2.0 * 300.0 + 250.0) / 3.0;
        for _ in 0..2 {
            let decision = machine.decide(&beliefs, &config);
            assert_eq!(decision.sending_rate, probe_rate);
            assert_eq!(machine.phase(), Phase::Probe);
        }
        machine.decide(&beliefs, &config);
        assert_eq!(machine.phase(), Phase::Drain);
    }

    #[test]
    fn test_reset_returns_to_slow_start() {
        let mut machine = PhaseMachine::new(ControlLaw::DutyCycled);
        machine.enter_steady_state();
        machine.reset();
        assert_eq!(machine.phase(), Phase::SlowStart);
        assert_eq!(machine.law(), ControlLaw::DutyCycled);
    }
}

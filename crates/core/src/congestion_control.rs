//! Congestion control interface for the transport driver.
//!
//! The driver owns the socket, the clock and the timeout deadline; the
//! controller only consumes events and exposes its two outputs, the window
//! and the inter-send time. Every call happens on one logical sequence per
//! flow, so the contract takes `&mut self` and needs no interior locking.
//! Separate flows use separate instances.
//!
//! ## Usage
//!
//! ```ignore
//! use beliefcc::cc::BeliefConfig;
//! use beliefcc::congestion_control::CongestionControl;
//!
//! let mut controller: Box<dyn CongestionControl> = Box::new(BeliefConfig::default().build()?);
//! controller.set_timestamp(0.0);
//! controller.init();
//! controller.on_pkt_sent(0);
//! ```

use crate::cc::{BeliefController, BeliefStats, Millis, Phase, SeqNum};

/// Event interface between the transport driver and a congestion controller.
pub trait CongestionControl: Send {
    /// Reset to a new flow epoch.
    fn init(&mut self);

    /// Called after a segment is handed to the socket.
    fn on_pkt_sent(&mut self, seq: SeqNum);

    /// Called per ack. `ack_seq` is one past the delivered segment.
    fn on_ack(&mut self, ack_seq: SeqNum, receiver_ts: Millis, sender_ts: Millis);

    /// No ack arrived within the driver's deadline.
    fn on_timeout(&mut self);

    /// Advisory throughput sample from the driver (segs/s).
    fn on_link_rate_measurement(&mut self, rate: f64);

    /// Maximum segments in flight.
    fn window(&self) -> u32;

    /// Minimum spacing between sends (ms).
    fn intersend_time(&self) -> Millis;

    /// Inject the current time before an event.
    fn set_timestamp(&mut self, now: Millis);

    /// Bootstrap RTT measured out of band, e.g. by the handshake.
    fn set_min_rtt(&mut self, rtt: Millis);

    /// Flow teardown.
    fn close(&mut self);

    /// Operator trigger to leave slow start.
    fn enter_steady_state(&mut self) -> Phase;

    fn phase(&self) -> Phase;

    fn stats(&self) -> BeliefStats;
}

impl CongestionControl for BeliefController {
    fn init(&mut self) {
        BeliefController::init(self)
    }

    fn on_pkt_sent(&mut self, seq: SeqNum) {
        BeliefController::on_pkt_sent(self, seq)
    }

    fn on_ack(&mut self, ack_seq: SeqNum, receiver_ts: Millis, sender_ts: Millis) {
        BeliefController::on_ack(self, ack_seq, receiver_ts, sender_ts);
    }

    fn on_timeout(&mut self) {
        BeliefController::on_timeout(self)
    }

    fn on_link_rate_measurement(&mut self, rate: f64) {
        BeliefController::on_link_rate_measurement(self, rate)
    }

    fn window(&self) -> u32 {
        BeliefController::window(self)
    }

    fn intersend_time(&self) -> Millis {
        BeliefController::intersend_time(self)
    }

    fn set_timestamp(&mut self, now: Millis) {
        BeliefController::set_timestamp(self, now)
    }

    fn set_min_rtt(&mut self, rtt: Millis) {
        BeliefController::set_min_rtt(self, rtt)
    }

    fn close(&mut self) {
        BeliefController::close(self)
    }

    fn enter_steady_state(&mut self) -> Phase {
        BeliefController::enter_steady_state(self)
    }

    fn phase(&self) -> Phase {
        BeliefController::phase(self)
    }

    fn stats(&self) -> BeliefStats {
        BeliefController::stats(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cc::{BeliefConfig, ControlLaw};

    fn boxed(law: ControlLaw) -> Box<dyn CongestionControl> {
        let config = BeliefConfig {
            control_law: law,
            ..Default::default()
        };
        Box::new(config.build().expect("valid config"))
    }

    #[test]
    fn test_contract_through_trait_object() {
        let mut controller = boxed(ControlLaw::PhaseDriven);
        controller.set_timestamp(0.0);
        controller.init();
        assert_eq!(controller.window(), 2);
        assert_eq!(controller.intersend_time(), 0.0);

        for seq in 0..4 {
            controller.on_pkt_sent(seq);
        }
        controller.set_timestamp(20.0);
        controller.on_ack(1, 10.0, 0.0);
        assert_eq!(controller.intersend_time(), 4.0);

        controller.on_link_rate_measurement(500.0);
        controller.close();
        assert_eq!(controller.stats().link_rate, Some(500.0));
    }

    #[test]
    fn test_law_selected_at_construction() {
        let mut phase_driven = boxed(ControlLaw::PhaseDriven);
        let mut duty_cycled = boxed(ControlLaw::DutyCycled);
        assert_eq!(phase_driven.enter_steady_state(), Phase::CongAvoid);
        assert_eq!(duty_cycled.enter_steady_state(), Phase::Drain);
    }

    #[test]
    fn test_controller_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<BeliefController>();
    }
}

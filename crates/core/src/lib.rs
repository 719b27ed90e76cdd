//! Belief-based congestion control for ack-clocked datagram transports.
//!
//! The transport driver owns the socket and the clock. It feeds send, ack and
//! timeout events into a [`cc::BeliefController`] through the
//! [`congestion_control::CongestionControl`] contract and reads back a window
//! and an inter-send time.

/// Belief state, estimators and the rate/window controller.
pub mod cc;

/// Logger setup and config loading for binaries.
pub mod config;

/// Event contract between the transport driver and the controller.
pub mod congestion_control;

/// Replay of recorded event traces.
pub mod replay;

/// Driver-side datagram header and handshake sentinel.
pub mod wire;

//! Deterministic replay of recorded driver events.
//!
//! A trace is a JSON-lines file, one event per line, tagged by `"event"`:
//!
//! ```text
//! {"event":"min_rtt","rtt":20.0}
//! {"event":"init","t":0.0}
//! {"event":"sent","t":0.0,"seq":0}
//! {"event":"ack","t":20.0,"ack":1,"receiver_ts":10.0,"sender_ts":0.0}
//! {"event":"timeout","t":2500.0}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. The controller never
//! reads a wall clock, so replaying a trace twice yields identical steps.

use std::io::BufRead;

use serde::{Deserialize, Serialize};

use crate::cc::{Millis, Phase, SeqNum};
use crate::congestion_control::CongestionControl;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    Init {
        t: Millis,
    },
    Sent {
        t: Millis,
        seq: SeqNum,
    },
    Ack {
        t: Millis,
        ack: SeqNum,
        #[serde(default)]
        receiver_ts: Millis,
        #[serde(default)]
        sender_ts: Millis,
    },
    Timeout {
        t: Millis,
    },
    LinkRate {
        t: Millis,
        rate: f64,
    },
    /// Handshake RTT; carries no timestamp of its own.
    MinRtt {
        rtt: Millis,
    },
    SteadyState {
        t: Millis,
    },
}

impl TraceEvent {
    pub fn timestamp(&self) -> Option<Millis> {
        match self {
            TraceEvent::Init { t }
            | TraceEvent::Sent { t, .. }
            | TraceEvent::Ack { t, .. }
            | TraceEvent::Timeout { t }
            | TraceEvent::LinkRate { t, .. }
            | TraceEvent::SteadyState { t } => Some(*t),
            TraceEvent::MinRtt { .. } => None,
        }
    }

    fn apply<C: CongestionControl + ?Sized>(&self, controller: &mut C) {
        match *self {
            TraceEvent::Init { .. } => controller.init(),
            TraceEvent::Sent { seq, .. } => controller.on_pkt_sent(seq),
            TraceEvent::Ack {
                ack,
                receiver_ts,
                sender_ts,
                ..
            } => controller.on_ack(ack, receiver_ts, sender_ts),
            TraceEvent::Timeout { .. } => controller.on_timeout(),
            TraceEvent::LinkRate { rate, .. } => controller.on_link_rate_measurement(rate),
            TraceEvent::MinRtt { rtt } => controller.set_min_rtt(rtt),
            TraceEvent::SteadyState { .. } => {
                controller.enter_steady_state();
            }
        }
    }
}

/// Controller outputs after one replayed event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayStep {
    pub t: Millis,
    pub window: u32,
    pub intersend_time: Millis,
    pub phase: Phase,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("failed to read trace: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid trace event on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Parse a JSON-lines trace.
pub fn parse_trace(reader: impl BufRead) -> Result<Vec<TraceEvent>, ReplayError> {
    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let event = serde_json::from_str(trimmed).map_err(|source| ReplayError::Parse {
            line: index + 1,
            source,
        })?;
        events.push(event);
    }
    Ok(events)
}

/// Feed `events` to `controller`, setting the clock before each one.
pub fn run<C: CongestionControl + ?Sized>(
    controller: &mut C,
    events: impl IntoIterator<Item = TraceEvent>,
) -> Vec<ReplayStep> {
    let mut now = 0.0;
    events
        .into_iter()
        .map(|event| {
            if let Some(t) = event.timestamp() {
                now = t;
                controller.set_timestamp(t);
            }
            event.apply(controller);
            ReplayStep {
                t: now,
                window: controller.window(),
                intersend_time: controller.intersend_time(),
                phase: controller.phase(),
            }
        })
        .collect()
}

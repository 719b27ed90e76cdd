use thiserror::Error;

use super::config::SeqNum;

/// Anomalies observed while processing driver events.
///
/// None of these fail the flow: the controller logs them, bumps the matching
/// counter in [`BeliefStats`](super::BeliefStats) and keeps producing a usable
/// rate and window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CcError {
    #[error("ack for untracked segment {seq}")]
    UnknownAck { seq: SeqNum },

    #[error("ack for already resolved segment {seq}")]
    DuplicateAck { seq: SeqNum },

    #[error("segment {seq} sent while still outstanding")]
    DuplicateSend { seq: SeqNum },

    #[error("segment {seq} acked after being marked lost")]
    ReorderedDelivery { seq: SeqNum },

    #[error("no ack within the driver's timeout")]
    Timeout,
}

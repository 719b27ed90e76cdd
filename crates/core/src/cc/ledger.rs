//! Outstanding segment bookkeeping.
//!
//! The ledger owns one [`Segment`] per sent-but-unresolved sequence number.
//! Losses are inferred from sequence order: when an ack resolves `seq`, every
//! still-outstanding segment below it is considered lost. Lost segments stay in
//! the ledger so that a late (reordered) ack can still be matched and the loss
//! accounting corrected.

use std::collections::{BTreeMap, HashSet, VecDeque};

use super::config::{Millis, SeqNum};
use super::errors::CcError;

/// Per-segment state, created on send and consumed by the matching ack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    /// When the segment was handed to the driver.
    pub send_tstamp: Millis,
    /// Cumulative delivered count when this segment was sent. Anchors the
    /// causality check of the `min_c_lambda` estimator.
    pub cum_delivered_at_send: u64,
    /// RTT, set once the segment is acked.
    pub rtt: Millis,
    /// Segments newly marked lost by the ack of this segment.
    pub this_loss_count: u64,
    /// Marked lost by a later segment's ack.
    pub lost: bool,
}

impl Segment {
    fn new(send_tstamp: Millis, cum_delivered_at_send: u64) -> Self {
        Self {
            send_tstamp,
            cum_delivered_at_send,
            rtt: 0.0,
            this_loss_count: 0,
            lost: false,
        }
    }
}

/// Outstanding segments keyed by sequence number.
#[derive(Debug)]
pub(crate) struct SegmentLedger {
    outstanding: BTreeMap<SeqNum, Segment>,
    /// Recently resolved sequence numbers, oldest first.
    resolved: VecDeque<SeqNum>,
    resolved_set: HashSet<SeqNum>,
    resolved_capacity: usize,
}

impl SegmentLedger {
    pub(crate) fn new(resolved_capacity: usize) -> Self {
        Self {
            outstanding: BTreeMap::new(),
            resolved: VecDeque::with_capacity(resolved_capacity),
            resolved_set: HashSet::with_capacity(resolved_capacity),
            resolved_capacity,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.outstanding.clear();
        self.resolved.clear();
        self.resolved_set.clear();
    }

    /// Record a newly sent segment.
    ///
    /// A send for a sequence number that is already outstanding leaves the
    /// existing entry untouched.
    pub(crate) fn record_sent(
        &mut self,
        seq: SeqNum,
        now: Millis,
        delivered_at_send: u64,
    ) -> Result<(), CcError> {
        if self.outstanding.contains_key(&seq) {
            return Err(CcError::DuplicateSend { seq });
        }
        self.outstanding
            .insert(seq, Segment::new(now, delivered_at_send));
        Ok(())
    }

    /// Remove and return the segment acked by `seq`.
    pub(crate) fn resolve_ack(&mut self, seq: SeqNum) -> Result<Segment, CcError> {
        match self.outstanding.remove(&seq) {
            Some(segment) => {
                self.remember_resolved(seq);
                Ok(segment)
            }
            None if self.resolved_set.contains(&seq) => Err(CcError::DuplicateAck { seq }),
            None => Err(CcError::UnknownAck { seq }),
        }
    }

    /// Mark every outstanding segment below `seq` as lost, returning how many
    /// were newly marked. Segments already marked are never counted twice.
    pub(crate) fn count_and_mark_losses(&mut self, seq: SeqNum) -> u64 {
        let mut newly_lost = 0;
        for segment in self.outstanding.range_mut(..seq).map(|(_, s)| s) {
            if !segment.lost {
                segment.lost = true;
                newly_lost += 1;
            }
        }
        newly_lost
    }

    /// Drop lost segments sent before `horizon`. Returns how many were dropped.
    pub(crate) fn expire_lost(&mut self, horizon: Millis) -> usize {
        let before = self.outstanding.len();
        self.outstanding
            .retain(|_, s| !(s.lost && s.send_tstamp < horizon));
        before - self.outstanding.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.outstanding.len()
    }

    pub(crate) fn get(&self, seq: SeqNum) -> Option<&Segment> {
        self.outstanding.get(&seq)
    }

    fn remember_resolved(&mut self, seq: SeqNum) {
        // A resent and re-acked seq keeps its original slot.
        if self.resolved_capacity == 0 || self.resolved_set.contains(&seq) {
            return;
        }
        if self.resolved.len() == self.resolved_capacity {
            if let Some(oldest) = self.resolved.pop_front() {
                self.resolved_set.remove(&oldest);
            }
        }
        self.resolved.push_back(seq);
        self.resolved_set.insert(seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with(seqs: impl IntoIterator<Item = SeqNum>) -> SegmentLedger {
        let mut ledger = SegmentLedger::new(16);
        for seq in seqs {
            ledger.record_sent(seq, seq as Millis, 0).unwrap();
        }
        ledger
    }

    #[test]
    fn test_resolve_ack_consumes_once() {
        let mut ledger = ledger_with([1, 2, 3]);
        let seg = ledger.resolve_ack(2).unwrap();
        assert_eq!(seg.send_tstamp, 2.0);
        assert_eq!(ledger.len(), 2);
        assert_eq!(
            ledger.resolve_ack(2),
            Err(CcError::DuplicateAck { seq: 2 })
        );
    }

    #[test]
    fn test_unknown_ack() {
        let mut ledger = ledger_with([1]);
        assert_eq!(ledger.resolve_ack(9), Err(CcError::UnknownAck { seq: 9 }));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_duplicate_send_keeps_existing() {
        let mut ledger = SegmentLedger::new(16);
        ledger.record_sent(7, 10.0, 3).unwrap();
        assert_eq!(
            ledger.record_sent(7, 20.0, 4),
            Err(CcError::DuplicateSend { seq: 7 })
        );
        let seg = ledger.get(7).unwrap();
        assert_eq!(seg.send_tstamp, 10.0);
        assert_eq!(seg.cum_delivered_at_send, 3);
    }

    #[test]
    fn test_loss_marking_is_idempotent() {
        let mut ledger = ledger_with(0..10);
        ledger.resolve_ack(5).unwrap();
        assert_eq!(ledger.count_and_mark_losses(5), 5);
        // Later acks rescan the same segments without recounting them.
        ledger.resolve_ack(6).unwrap();
        assert_eq!(ledger.count_and_mark_losses(6), 0);
        ledger.resolve_ack(9).unwrap();
        assert_eq!(ledger.count_and_mark_losses(9), 2);
        for seq in 0..5 {
            assert!(ledger.get(seq).unwrap().lost);
        }
    }

    #[test]
    fn test_lost_segment_can_still_be_acked() {
        let mut ledger = ledger_with([1, 2]);
        ledger.resolve_ack(2).unwrap();
        ledger.count_and_mark_losses(2);
        let seg = ledger.resolve_ack(1).unwrap();
        assert!(seg.lost);
    }

    #[test]
    fn test_expire_lost_only_drops_old_lost_segments() {
        let mut ledger = ledger_with([1, 2, 3, 10]);
        ledger.resolve_ack(10).unwrap();
        ledger.count_and_mark_losses(3);
        assert_eq!(ledger.expire_lost(2.5), 2);
        assert!(ledger.get(1).is_none());
        assert!(ledger.get(3).is_some());
    }

    #[test]
    fn test_resolved_memory_is_bounded() {
        let mut ledger = SegmentLedger::new(2);
        for seq in 0..3 {
            ledger.record_sent(seq, 0.0, 0).unwrap();
            ledger.resolve_ack(seq).unwrap();
        }
        assert_eq!(ledger.resolve_ack(0), Err(CcError::UnknownAck { seq: 0 }));
        assert_eq!(ledger.resolve_ack(2), Err(CcError::DuplicateAck { seq: 2 }));
    }

    #[test]
    fn test_resent_seq_stays_remembered() {
        let mut ledger = SegmentLedger::new(3);
        for seq in [0, 1, 0, 2] {
            ledger.record_sent(seq, 0.0, 0).unwrap();
            ledger.resolve_ack(seq).unwrap();
        }
        assert_eq!(ledger.resolve_ack(0), Err(CcError::DuplicateAck { seq: 0 }));

        // 0 still holds its first slot and is evicted next.
        ledger.record_sent(3, 0.0, 0).unwrap();
        ledger.resolve_ack(3).unwrap();
        assert_eq!(ledger.resolve_ack(0), Err(CcError::UnknownAck { seq: 0 }));
        assert_eq!(ledger.resolve_ack(1), Err(CcError::DuplicateAck { seq: 1 }));
    }
}

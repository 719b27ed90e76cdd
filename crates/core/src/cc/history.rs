//! Fixed-capacity ring of periodic history samples.
//!
//! Samples are appended at most once per `INTER_HISTORY_TIME × min_rtt`; the
//! newest sample stays "open" and has its RTT extrema extended in place until
//! the next one is pushed. When full, the oldest sample is overwritten.

use super::config::{Millis, SegsPerSec};

/// Snapshot of the cumulative counters at a sample boundary, plus RTT
/// extrema observed while the sample was the newest one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistorySample {
    pub creation_tstamp: Millis,
    pub interval_min_rtt: Millis,
    pub interval_max_rtt: Millis,
    pub creation_cum_sent: u64,
    pub creation_cum_delivered: u64,
    pub creation_cum_lost: u64,
    pub creation_sending_rate: SegsPerSec,
    /// Delivered count carried by the segment whose ack created this sample.
    pub creation_cum_delivered_at_send: u64,
    pub interval_segs_lost: u64,
    /// Already consumed as a `min_c_lambda` window start.
    pub processed: bool,
}

impl HistorySample {
    /// No excess delay beyond `threshold` and no loss.
    pub(crate) fn is_underutilized(&self, threshold: Millis) -> bool {
        self.interval_max_rtt <= threshold && self.interval_segs_lost == 0
    }

    /// Queueing (min RTT above `threshold`) or loss was observed.
    pub(crate) fn is_utilized(&self, threshold: Millis) -> bool {
        self.interval_min_rtt > threshold || self.interval_segs_lost > 0
    }

    /// Fold another RTT observation into the still-open sample.
    pub(crate) fn extend(&mut self, rtt: Millis) {
        self.interval_min_rtt = self.interval_min_rtt.min(rtt);
        self.interval_max_rtt = self.interval_max_rtt.max(rtt);
    }
}

impl std::fmt::Display for HistorySample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ts={:.3} rtt=[{:.3},{:.3}] sent={} delivered={} lost={} rate={:.2} \
             delivered_at_send={} interval_lost={} processed={}",
            self.creation_tstamp,
            self.interval_min_rtt,
            self.interval_max_rtt,
            self.creation_cum_sent,
            self.creation_cum_delivered,
            self.creation_cum_lost,
            self.creation_sending_rate,
            self.creation_cum_delivered_at_send,
            self.interval_segs_lost,
            self.processed,
        )
    }
}

/// Ring buffer of [`HistorySample`]s. Index 0 is the oldest retained sample.
#[derive(Debug, Clone)]
pub struct HistoryRing {
    slots: Vec<HistorySample>,
    /// Slot holding the oldest sample once the ring is full.
    head: usize,
    capacity: usize,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "history ring needs a non-zero capacity");
        Self {
            slots: Vec::with_capacity(capacity),
            head: 0,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Append a sample, evicting the oldest one when full.
    ///
    /// Returns the evicted sample, if any.
    pub fn push(&mut self, sample: HistorySample) -> Option<HistorySample> {
        if self.slots.len() < self.capacity {
            self.slots.push(sample);
            None
        } else {
            let evicted = std::mem::replace(&mut self.slots[self.head], sample);
            self.head = (self.head + 1) % self.capacity;
            Some(evicted)
        }
    }

    fn slot(&self, index: usize) -> usize {
        (self.head + index) % self.capacity
    }

    pub fn get(&self, index: usize) -> Option<&HistorySample> {
        if index < self.slots.len() {
            Some(&self.slots[self.slot(index)])
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut HistorySample> {
        if index < self.slots.len() {
            let slot = self.slot(index);
            Some(&mut self.slots[slot])
        } else {
            None
        }
    }

    /// Newest sample.
    pub fn back(&self) -> Option<&HistorySample> {
        self.len().checked_sub(1).and_then(|i| self.get(i))
    }

    pub fn back_mut(&mut self) -> Option<&mut HistorySample> {
        match self.len().checked_sub(1) {
            Some(i) => self.get_mut(i),
            None => None,
        }
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &HistorySample> + '_ {
        (0..self.len()).map(move |i| &self.slots[self.slot(i)])
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.head = 0;
    }
}

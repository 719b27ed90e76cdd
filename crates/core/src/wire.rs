//! Driver-side datagram header.
//!
//! Each data datagram is `PACKET_SIZE` bytes: a little-endian [`PacketHeader`]
//! followed by `'-'` padding, so that on-wire size matches a TCP segment of
//! `TCP_MSS` payload bytes. Acks echo the header back.

use byteorder::{ByteOrder, LittleEndian};

use crate::cc::{Millis, SeqNum};

type DefaultEndian = LittleEndian;

/// Encoded header size, including 4 bytes of alignment padding after `src_id`.
pub const HEADER_SIZE: usize = 32;

/// UDP payload size: 1472 + 8 (UDP) + 20 (IP) = 1500 bytes on ethernet.
pub const PACKET_SIZE: usize = 1472;

/// Payload bytes accounted per segment, as for TCP.
pub const TCP_MSS: usize = 1448;

/// Actual payload carried after the header.
pub const DATA_SIZE: usize = PACKET_SIZE - HEADER_SIZE;

const PADDING: u8 = b'-';

/// Field value used by every field of the handshake header.
const HANDSHAKE_SENTINEL: i32 = -1;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram too short: {len} bytes, header needs {HEADER_SIZE}")]
    Truncated { len: usize },

    #[error("buffer too small: {len} bytes, datagram needs {PACKET_SIZE}")]
    BufferTooSmall { len: usize },

    #[error("negative sequence number {0} in data header")]
    NegativeSeq(i32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacketHeader {
    pub seq_num: i32,
    pub flow_id: i32,
    pub src_id: i32,
    pub sender_timestamp: Millis,
    pub receiver_timestamp: Millis,
}

impl PacketHeader {
    pub fn data(seq_num: i32, flow_id: i32, src_id: i32, sender_timestamp: Millis) -> Self {
        Self {
            seq_num,
            flow_id,
            src_id,
            sender_timestamp,
            receiver_timestamp: 0.0,
        }
    }

    /// Header exchanged to bootstrap the minimum RTT.
    pub fn handshake() -> Self {
        Self {
            seq_num: HANDSHAKE_SENTINEL,
            flow_id: HANDSHAKE_SENTINEL,
            src_id: HANDSHAKE_SENTINEL,
            sender_timestamp: HANDSHAKE_SENTINEL as f64,
            receiver_timestamp: HANDSHAKE_SENTINEL as f64,
        }
    }

    /// Whether this header answers a handshake. The receiver timestamp is
    /// not checked since the peer may stamp it.
    pub fn is_handshake(&self) -> bool {
        self.seq_num == HANDSHAKE_SENTINEL
            && self.flow_id == HANDSHAKE_SENTINEL
            && self.src_id == HANDSHAKE_SENTINEL
            && self.sender_timestamp == HANDSHAKE_SENTINEL as f64
    }

    pub fn encode(&self, buf: &mut [u8; HEADER_SIZE]) {
        DefaultEndian::write_i32(&mut buf[0..4], self.seq_num);
        DefaultEndian::write_i32(&mut buf[4..8], self.flow_id);
        DefaultEndian::write_i32(&mut buf[8..12], self.src_id);
        buf[12..16].fill(0);
        DefaultEndian::write_f64(&mut buf[16..24], self.sender_timestamp);
        DefaultEndian::write_f64(&mut buf[24..32], self.receiver_timestamp);
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_SIZE {
            return Err(WireError::Truncated { len: buf.len() });
        }
        Ok(Self {
            seq_num: DefaultEndian::read_i32(&buf[0..4]),
            flow_id: DefaultEndian::read_i32(&buf[4..8]),
            src_id: DefaultEndian::read_i32(&buf[8..12]),
            sender_timestamp: DefaultEndian::read_f64(&buf[16..24]),
            receiver_timestamp: DefaultEndian::read_f64(&buf[24..32]),
        })
    }

    /// Write a full data datagram into `buf`, returning its length.
    pub fn write_datagram(&self, buf: &mut [u8]) -> Result<usize, WireError> {
        if buf.len() < PACKET_SIZE {
            return Err(WireError::BufferTooSmall { len: buf.len() });
        }
        let mut header = [0u8; HEADER_SIZE];
        self.encode(&mut header);
        buf[..HEADER_SIZE].copy_from_slice(&header);
        buf[HEADER_SIZE..PACKET_SIZE].fill(PADDING);
        Ok(PACKET_SIZE)
    }

    /// Segment sequence number of a data header.
    pub fn segment(&self) -> Result<SeqNum, WireError> {
        u64::try_from(self.seq_num).map_err(|_| WireError::NegativeSeq(self.seq_num))
    }
}

/// Map a "next expected" ack number to the delivered segment, if any.
pub fn ack_to_segment(ack_seq: SeqNum) -> Option<SeqNum> {
    ack_seq.checked_sub(1)
}

/// Smoothed bottleneck rate from ack inter-arrival gaps.
///
/// Each gap is folded into an EWMA with weight 1/16; the rate (segs/s) is
/// reported once `warmup` acks have been seen.
#[derive(Debug, Clone)]
pub struct LinkRateEstimator {
    gap_estimate: Option<Millis>,
    last_arrival: Option<Millis>,
    seen: u64,
    warmup: u64,
}

impl LinkRateEstimator {
    const ALPHA: f64 = 1.0 / 16.0;

    pub fn new(warmup: u64) -> Self {
        Self {
            gap_estimate: None,
            last_arrival: None,
            seen: 0,
            warmup,
        }
    }

    /// Record an ack arrival and return the current rate estimate, if warm.
    pub fn on_ack(&mut self, now: Millis) -> Option<f64> {
        self.seen += 1;
        if let Some(last) = self.last_arrival.replace(now) {
            let gap = (now - last).max(0.0);
            self.gap_estimate = Some(match self.gap_estimate {
                None => gap,
                Some(est) => (1.0 - Self::ALPHA) * est + Self::ALPHA * gap,
            });
        }
        match self.gap_estimate {
            Some(gap) if self.seen > self.warmup && gap > 0.0 => Some(1_000.0 / gap),
            _ => None,
        }
    }
}

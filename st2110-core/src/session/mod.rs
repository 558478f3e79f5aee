//! Session builders: ST20 is the exemplar, ST22/30/40/41
//! share its shape (frame pull -> epoch -> gate -> emit -> end-of-frame).
//! Grounded structurally on `cognitod::runtime::sequencer`'s
//! poll-then-act consumer loop, generalised to a stateful per-tick
//! tasklet instead of a one-shot sequencer pass.

pub mod st20;
pub mod st22;
pub mod st30;
pub mod st40;
pub mod st41;
pub mod wire;

use crate::frame::Packet;
use std::collections::VecDeque;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BuilderState {
    WaitFrame,
    SendingPkts,
}

pub use crate::collab::FrameMeta;

/// Per-session packing mode for ST20 line maths
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PackingMode {
    /// One video line per packet.
    GpmSl,
    /// Fixed-size block packing, 1260-byte packets.
    Bpm,
    /// General packing, payload filled to the largest whole number of
    /// pixel-group pairs.
    Gpm,
}

pub const BPM_PKT_LEN: u32 = 1260;

/// Shared ring between a session's builder and its transmitter:
/// bounded, single-producer single-consumer. A `VecDeque` stands in
/// for a lock-free SPSC ring; capacity is enforced in `push`.
pub struct PacketRing {
    capacity: usize,
    queue: VecDeque<Packet>,
}

impl PacketRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "packet ring capacity must be a power of two");
        Self { capacity, queue: VecDeque::with_capacity(capacity) }
    }

    pub fn push(&mut self, pkt: Packet) -> Result<(), Packet> {
        if self.queue.len() >= self.capacity {
            return Err(pkt);
        }
        self.queue.push_back(pkt);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Packet> {
        self.queue.pop_front()
    }

    pub fn peek(&self) -> Option<&Packet> {
        self.queue.front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn pop_bulk(&mut self, max: usize) -> Vec<Packet> {
        let n = max.min(self.queue.len());
        self.queue.drain(..n).collect()
    }
}

/// Common per-session counters surfaced through `get_session_stats`.
#[derive(Debug, Default, Copy, Clone)]
pub struct BuildStats {
    pub frames_sent: u64,
    pub frames_late: u64,
    pub build_ret_code_busy: u64,
    pub build_time_exceeds_trs: u64,
    pub drop_onward: u64,
    /// App-supplied timestamp landed in the past (`CoreError::ErrUserTimestamp`).
    pub user_timestamp_errors: u64,
    /// User-metadata payload exceeded the per-frame buffer (`CoreError::ErrTxFrame`).
    pub tx_frame_errors: u64,
}


//! TX Queue collaborator contract.
//!
//! The physical NIC queue itself is out of scope; this trait is
//! the seam the session builder/transmitter call through. A
//! process-local `LoopbackTxQueue` is provided for tests and for the
//! sample binary when no real NIC driver is wired in, the same role
//! `cognitod`'s `fake_events.rs` plays for its eBPF producers.

use crate::frame::Packet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TxQueueStatus {
    Ok,
    Fatal,
}

pub trait TxQueue: Send {
    fn id(&self) -> u32;

    /// Non-blocking burst send; returns the number of packets consumed.
    fn burst(&self, pkts: &[Packet]) -> usize;

    /// Retry `burst` until `timeout` elapses or everything is sent.
    fn burst_busy(&self, pkts: &[Packet], timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut sent = 0;
        while sent < pkts.len() && Instant::now() < deadline {
            sent += self.burst(&pkts[sent..]);
            if sent < pkts.len() {
                std::thread::yield_now();
            }
        }
        sent
    }

    /// Drain HW descriptors, padding with `pad_pkt` as needed.
    fn flush(&self, pad_pkt: &Packet);

    /// Inform the HW rate limiter of a byte-per-second target. A no-op
    /// if unsupported
    fn set_bps(&self, _bps: u64) {}

    fn status(&self) -> TxQueueStatus;

    /// Mark the queue fatal; re-binding must yield a fresh `id`.
    fn fatal_error(&self);
}

/// In-process loopback queue: every burst "succeeds" by copying
/// packets into an internal buffer, used by tests and the sample
/// binary's default collaborator wiring.
pub struct LoopbackTxQueue {
    id: u32,
    status: Mutex<TxQueueStatus>,
    sent: Mutex<Vec<Packet>>,
    bps: Mutex<u64>,
    /// When `Some(n)`, the next `n` burst calls accept zero packets,
    /// simulating a stuck HW queue for fatal-error-recovery tests.
    stall_for: Mutex<usize>,
}

impl LoopbackTxQueue {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            status: Mutex::new(TxQueueStatus::Ok),
            sent: Mutex::new(Vec::new()),
            bps: Mutex::new(0),
            stall_for: Mutex::new(0),
        }
    }

    pub fn stall_next(&self, n: usize) {
        *self.stall_for.lock().unwrap() = n;
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent_snapshot(&self) -> Vec<Packet> {
        self.sent.lock().unwrap().clone()
    }

    pub fn configured_bps(&self) -> u64 {
        *self.bps.lock().unwrap()
    }
}

impl TxQueue for LoopbackTxQueue {
    fn id(&self) -> u32 {
        self.id
    }

    fn burst(&self, pkts: &[Packet]) -> usize {
        if *self.status.lock().unwrap() == TxQueueStatus::Fatal {
            return 0;
        }
        let mut stall = self.stall_for.lock().unwrap();
        if *stall > 0 {
            *stall -= 1;
            return 0;
        }
        drop(stall);
        let mut sent = self.sent.lock().unwrap();
        sent.extend_from_slice(pkts);
        pkts.len()
    }

    fn flush(&self, _pad_pkt: &Packet) {}

    fn set_bps(&self, bps: u64) {
        *self.bps.lock().unwrap() = bps;
    }

    fn status(&self) -> TxQueueStatus {
        *self.status.lock().unwrap()
    }

    fn fatal_error(&self) {
        *self.status.lock().unwrap() = TxQueueStatus::Fatal;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Packet;

    #[test]
    fn loopback_accepts_bursts_until_stalled() {
        let q = LoopbackTxQueue::new(1);
        let pkts = vec![Packet::new_test(0, 0), Packet::new_test(1, 0)];
        assert_eq!(q.burst(&pkts), 2);
        q.stall_next(1);
        assert_eq!(q.burst(&pkts), 0);
        assert_eq!(q.burst(&pkts), 2);
    }

    #[test]
    fn fatal_error_makes_burst_return_zero() {
        let q = LoopbackTxQueue::new(1);
        q.fatal_error();
        assert_eq!(q.status(), TxQueueStatus::Fatal);
        let pkts = vec![Packet::new_test(0, 0)];
        assert_eq!(q.burst(&pkts), 0);
    }
}

//! Transmitter: a dedicated tasklet per session manager
//! that drains each session's packet ring into its bound TX queue,
//! pacing against `target_tsc` and inserting pad packets to hold the
//! HW send rate constant.

use crate::collab::ClockSource;
use crate::error::CoreError;
use crate::frame::Packet;
use crate::scheduler::tasklet::{TaskletOps, TaskletResult};
use crate::session::PacketRing;
use crate::txqueue::TxQueue;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct TxHangThreshold {
    pub max_hang: Duration,
}

impl Default for TxHangThreshold {
    fn default() -> Self {
        Self { max_hang: Duration::from_millis(100) }
    }
}

/// One port's worth of transmit state for one session: the ring it
/// drains, the queue it bursts to, and hang/warmup bookkeeping.
pub struct PortTx {
    pub queue: Arc<dyn TxQueue>,
    pub bulk: u32,
    pub pad_interval: f64,
    pub pad_pkt_template: Packet,
    pub warm_pkts: u32,
    hang_since: Option<Instant>,
    hang_threshold: TxHangThreshold,
    inflight: Option<Packet>,
    pkts_since_pad: u32,
    warmed_up: bool,
}

impl PortTx {
    pub fn new(queue: Arc<dyn TxQueue>, bulk: u32, pad_interval: f64, warm_pkts: u32) -> Self {
        Self {
            queue,
            bulk,
            pad_interval,
            pad_pkt_template: Packet::pad(0),
            warm_pkts,
            hang_since: None,
            hang_threshold: TxHangThreshold::default(),
            inflight: None,
            pkts_since_pad: 0,
            warmed_up: false,
        }
    }

    /// Emit `warm_pkts` padding packets on an RL queue before the
    /// session's very first real packet is due.
    fn rl_warmup(&mut self) {
        if self.warmed_up {
            return;
        }
        self.warmed_up = true;
        if self.warm_pkts == 0 {
            return;
        }
        let pads: Vec<Packet> = (0..self.warm_pkts).map(|_| self.pad_pkt_template.clone()).collect();
        self.queue.burst(&pads);
    }

    /// Returns `Err(CoreError::TxHang)` once cumulative hang time
    /// exceeds the session's threshold.
    fn retry_inflight(&mut self, clock: &dyn ClockSource) -> Result<bool, CoreError> {
        let Some(pkt) = self.inflight.take() else {
            return Ok(true);
        };
        if clock.tsc_ns() < pkt.target_tsc {
            self.inflight = Some(pkt);
            return Ok(false);
        }
        let sent = self.queue.burst(std::slice::from_ref(&pkt));
        if sent == 1 {
            self.hang_since = None;
            return Ok(true);
        }
        self.inflight = Some(pkt);
        let since = *self.hang_since.get_or_insert_with(Instant::now);
        if since.elapsed() > self.hang_threshold.max_hang {
            return Err(CoreError::TxHang);
        }
        Ok(false)
    }

    fn tick(&mut self, ring: &mut PacketRing, clock: &dyn ClockSource) -> Result<TaskletResult, CoreError> {
        self.rl_warmup();

        if !self.retry_inflight(clock)? {
            return Ok(TaskletResult::HasPending);
        }

        let Some(first) = ring.peek() else {
            return Ok(TaskletResult::AllDone);
        };
        if clock.tsc_ns() < first.target_tsc {
            return Ok(TaskletResult::HasPending);
        }

        let mut batch = ring.pop_bulk(self.bulk as usize);
        batch.retain(|pkt| !pkt.is_dummy);
        self.pkts_since_pad += batch.len() as u32;
        if self.pad_interval > 0.0 && self.pkts_since_pad as f64 >= self.pad_interval {
            batch.push(self.pad_pkt_template.clone());
            self.pkts_since_pad = 0;
        }

        let sent = self.queue.burst(&batch);
        if sent < batch.len() {
            self.inflight = Some(batch.swap_remove(sent));
        }

        Ok(TaskletResult::HasPending)
    }
}

/// One session's transmit state across its 1-2 bound ports (2 for
/// ST 2022-7 redundant transmit).
pub struct SessionTx {
    pub ports: Vec<PortTx>,
}

/// The dedicated per-scheduler transmitter tasklet:
/// owns no rings itself, it is handed the live session list by the
/// manager each tick.
pub struct Transmitter {
    clock: Arc<dyn ClockSource>,
    sessions: Vec<(SessionTx, Vec<PacketRing>)>,
}

impl Transmitter {
    pub fn new(clock: Arc<dyn ClockSource>) -> Self {
        Self { clock, sessions: Vec::new() }
    }

    pub fn add_session(&mut self, tx: SessionTx, rings: Vec<PacketRing>) -> usize {
        self.sessions.push((tx, rings));
        self.sessions.len() - 1
    }

    pub fn remove_session(&mut self, idx: usize) {
        if idx < self.sessions.len() {
            self.sessions.remove(idx);
        }
    }

    /// Access a session's TX-side ring, so the owning builder can hand
    /// off newly-built packets into it each tick.
    pub fn ring_mut(&mut self, session_idx: usize, port_idx: usize) -> Option<&mut PacketRing> {
        self.sessions.get_mut(session_idx).and_then(|(_, rings)| rings.get_mut(port_idx))
    }

    fn drain_ring(&mut self, session_idx: usize, port_idx: usize) -> TaskletResult {
        let clock = Arc::clone(&self.clock);
        let Some((tx, rings)) = self.sessions.get_mut(session_idx) else {
            return TaskletResult::AllDone;
        };
        let (Some(port), Some(ring)) = (tx.ports.get_mut(port_idx), rings.get_mut(port_idx)) else {
            return TaskletResult::AllDone;
        };
        match port.tick(ring, clock.as_ref()) {
            Ok(r) => r,
            Err(CoreError::TxHang) => {
                port.queue.fatal_error();
                TaskletResult::Fatal
            }
            Err(_) => TaskletResult::Fatal,
        }
    }
}

impl TaskletOps for Transmitter {
    fn name(&self) -> &str {
        "transmitter"
    }

    fn handler(&mut self) -> TaskletResult {
        let mut has_pending = false;
        for session_idx in 0..self.sessions.len() {
            let port_count = self.sessions[session_idx].0.ports.len();
            for port_idx in 0..port_count {
                match self.drain_ring(session_idx, port_idx) {
                    TaskletResult::HasPending => has_pending = true,
                    TaskletResult::Fatal => has_pending = true,
                    TaskletResult::AllDone => {}
                }
            }
        }
        if has_pending {
            TaskletResult::HasPending
        } else {
            TaskletResult::AllDone
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txqueue::LoopbackTxQueue;

    struct FixedClock(std::sync::atomic::AtomicU64);
    impl ClockSource for FixedClock {
        fn ptp_time_ns(&self, _port: u16) -> u64 {
            0
        }
        fn tsc_ns(&self) -> u64 {
            self.0.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[test]
    fn drains_a_ready_packet_into_the_queue() {
        let clock: Arc<dyn ClockSource> = Arc::new(FixedClock(std::sync::atomic::AtomicU64::new(100)));
        let mut transmitter = Transmitter::new(Arc::clone(&clock));
        let queue = Arc::new(LoopbackTxQueue::new(1));
        let port = PortTx::new(queue.clone(), 4, 0.0, 0);
        let mut ring = PacketRing::new(16);
        ring.push(Packet::new_test(0, 0)).unwrap();
        let idx = transmitter.add_session(SessionTx { ports: vec![port] }, vec![ring]);
        let result = transmitter.drain_ring(idx, 0);
        assert_eq!(result, TaskletResult::HasPending);
        assert_eq!(queue.sent_count(), 1);
    }

    #[test]
    fn packet_not_yet_due_is_left_on_the_ring() {
        let clock: Arc<dyn ClockSource> = Arc::new(FixedClock(std::sync::atomic::AtomicU64::new(0)));
        let mut transmitter = Transmitter::new(Arc::clone(&clock));
        let queue = Arc::new(LoopbackTxQueue::new(1));
        let port = PortTx::new(queue.clone(), 4, 0.0, 0);
        let mut ring = PacketRing::new(16);
        ring.push(Packet::new_test(0, 1_000_000)).unwrap();
        let idx = transmitter.add_session(SessionTx { ports: vec![port] }, vec![ring]);
        transmitter.drain_ring(idx, 0);
        assert_eq!(queue.sent_count(), 0);
    }

    #[test]
    fn sustained_burst_failure_marks_the_queue_fatal() {
        let clock: Arc<dyn ClockSource> = Arc::new(FixedClock(std::sync::atomic::AtomicU64::new(100)));
        let mut transmitter = Transmitter::new(Arc::clone(&clock));
        let queue = Arc::new(LoopbackTxQueue::new(1));
        queue.fatal_error();
        let mut port = PortTx::new(queue.clone(), 4, 0.0, 0);
        port.hang_threshold.max_hang = Duration::from_millis(0);
        let mut ring = PacketRing::new(16);
        ring.push(Packet::new_test(0, 0)).unwrap();
        let idx = transmitter.add_session(SessionTx { ports: vec![port] }, vec![ring]);
        // first tick puts it inflight
        transmitter.drain_ring(idx, 0);
        std::thread::sleep(Duration::from_millis(1));
        let result = transmitter.drain_ring(idx, 0);
        assert_eq!(result, TaskletResult::Fatal);
    }
}

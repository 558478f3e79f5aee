//! End-to-end: a free-running frame source feeds an ST20 builder, whose
//! packets flow through the shared ring into a transmitter bound to a
//! loopback TX queue, driven entirely by the scheduler's tasklet loop.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use st2110_core::collab::{ClockSource, FrameMeta, SessionCallbacks, SessionEvent};
use st2110_core::error::CoreResult;
use st2110_core::fmt::{Fps, St20Format};
use st2110_core::frame::FramePool;
use st2110_core::pacing::ActiveRatio;
use st2110_core::scheduler::tasklet::{TaskletOps, TaskletResult};
use st2110_core::scheduler::{SchType, Scheduler};
use st2110_core::session::st20::{St20Params, St20Session};
use st2110_core::session::{PackingMode, PacketRing};
use st2110_core::transmitter::{PortTx, SessionTx, Transmitter};
use st2110_core::txqueue::LoopbackTxQueue;

struct InstantClock(std::time::Instant);
impl ClockSource for InstantClock {
    fn ptp_time_ns(&self, _port: u16) -> u64 {
        self.0.elapsed().as_nanos() as u64
    }
    fn tsc_ns(&self) -> u64 {
        self.0.elapsed().as_nanos() as u64
    }
}

struct FreeRunning {
    pool_len: u32,
    next: AtomicU32,
    frames_done: Arc<AtomicU64>,
}
impl SessionCallbacks for FreeRunning {
    fn get_next_frame(&self) -> CoreResult<Option<(u32, FrameMeta)>> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.pool_len;
        Ok(Some((idx, FrameMeta::default())))
    }
    fn notify_frame_done(&self, _idx: u32) {
        self.frames_done.fetch_add(1, Ordering::Relaxed);
    }
    fn notify_frame_late(&self, _late_by_epochs: u64) {}
    fn notify_rtp_done(&self) {}
    fn notify_event(&self, _event: SessionEvent) {}
}

struct Pipeline {
    builder: St20Session,
    transmitter: Transmitter,
}
impl TaskletOps for Pipeline {
    fn name(&self) -> &str {
        "pipeline"
    }
    fn handler(&mut self) -> TaskletResult {
        let a = self.builder.handler();
        if let Some(ring) = self.transmitter.ring_mut(0, 0) {
            while let Some(pkt) = self.builder.ring_mut().pop() {
                if ring.push(pkt).is_err() {
                    break;
                }
            }
        }
        let b = self.transmitter.handler();
        match (a, b) {
            (TaskletResult::Fatal, _) | (_, TaskletResult::Fatal) => TaskletResult::Fatal,
            (TaskletResult::HasPending, _) | (_, TaskletResult::HasPending) => TaskletResult::HasPending,
            _ => TaskletResult::AllDone,
        }
    }
}

#[test]
fn a_full_frame_of_packets_reaches_the_tx_queue() {
    let clock: Arc<dyn ClockSource> = Arc::new(InstantClock(std::time::Instant::now()));
    let frames_done = Arc::new(AtomicU64::new(0));
    let callbacks: Arc<dyn SessionCallbacks> =
        Arc::new(FreeRunning { pool_len: 4, next: AtomicU32::new(0), frames_done: Arc::clone(&frames_done) });

    let fmt = St20Format::Yuv422_10bit;
    let width = 640;
    let height = 360;
    let frame_size = fmt.frame_size(width, height) as usize;
    let on_done_callbacks = Arc::clone(&callbacks);
    let pool = FramePool::new_owned(4, frame_size, Arc::new(move |idx| on_done_callbacks.notify_frame_done(idx)));

    let params = St20Params {
        width,
        height,
        fmt,
        fps: Fps::P25,
        active: ActiveRatio::Hd,
        packing: PackingMode::GpmSl,
        max_payload: 1200,
        ssrc: 7,
        payload_type: 96,
        user_pacing: false,
        exact_user_pacing: false,
        rtp_timestamp_epoch: false,
        redundant: false,
        max_onward_epochs: 1000,
    };
    let total_pkts = params.total_pkts_per_frame();

    let builder = St20Session::new(params, Arc::clone(&clock), callbacks, pool, 4096, 16);
    let queue = Arc::new(LoopbackTxQueue::new(0));
    let port = PortTx::new(queue.clone(), 16, 0.0, 0);
    let mut transmitter = Transmitter::new(Arc::clone(&clock));
    transmitter.add_session(SessionTx { ports: vec![port] }, vec![PacketRing::new(4096)]);

    let sch = Arc::new(Scheduler::request(0, SchType::Unpinned, "test", 1, 100, 0, 50, false));
    sch.attach_tasklet(Box::new(Pipeline { builder, transmitter }));
    sch.start(None, 0).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while queue.sent_count() < total_pkts as usize && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    sch.stop();

    assert_eq!(queue.sent_count(), total_pkts as usize);
    assert!(frames_done.load(Ordering::Relaxed) >= 1);
}

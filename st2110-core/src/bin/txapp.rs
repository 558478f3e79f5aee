//! Reference ST 2110-20 sender: wires the library's collaborator
//! traits to stand-ins (a wall clock, a loopback TX queue, a
//! free-running frame source) and drives one session end to end.
//! NIC bring-up and real frame capture are the host application's job
//!; this binary exists to prove the pipeline, not to ship
//! video.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

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

#[derive(Parser, Debug)]
#[command(name = "st2110-txapp", about = "Reference ST 2110-20 sender over a loopback TX queue")]
struct Args {
    #[arg(long, default_value = "1920")]
    width: u32,
    #[arg(long, default_value = "1080")]
    height: u32,
    #[arg(long, default_value = "p25", value_parser = parse_fps)]
    fps: Fps,
    #[arg(long, default_value_t = 8, help = "frames to double/triple-buffer")]
    frame_count: usize,
    #[arg(long, default_value_t = 1200)]
    max_payload: u32,
    #[arg(long, default_value_t = 1)]
    ssrc: u32,
    #[arg(long, default_value_t = 5)]
    duration_secs: u64,
    #[arg(long, default_value_t = 8)]
    bulk: u32,
}

fn parse_fps(s: &str) -> Result<Fps, String> {
    match s {
        "p59.94" => Ok(Fps::P59_94),
        "p50" => Ok(Fps::P50),
        "p29.97" => Ok(Fps::P29_97),
        "p25" => Ok(Fps::P25),
        other => Err(format!("unknown fps {other}, expected one of p59.94/p50/p29.97/p25")),
    }
}

/// TAI-ish wall clock plus a free-running TSC, backed by `Instant`
/// since the sample has no PTP discipline to hand off to.
struct WallClock {
    epoch_instant: Instant,
    epoch_tai_ns: u64,
}

impl WallClock {
    fn new() -> Self {
        let epoch_tai_ns = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64;
        Self { epoch_instant: Instant::now(), epoch_tai_ns }
    }
}

impl ClockSource for WallClock {
    fn ptp_time_ns(&self, _port: u16) -> u64 {
        self.epoch_tai_ns + self.epoch_instant.elapsed().as_nanos() as u64
    }

    fn tsc_ns(&self) -> u64 {
        self.epoch_instant.elapsed().as_nanos() as u64
    }
}

/// Hands back pool slots round-robin, never applying backpressure.
/// Stands in for a real capture pipeline's `get_next_frame`.
struct FreeRunningFrameSource {
    pool_len: u32,
    next: AtomicU32,
    frames_done: Arc<AtomicU64>,
}

impl SessionCallbacks for FreeRunningFrameSource {
    fn get_next_frame(&self) -> CoreResult<Option<(u32, FrameMeta)>> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.pool_len;
        Ok(Some((idx, FrameMeta::default())))
    }

    fn notify_frame_done(&self, _idx: u32) {
        self.frames_done.fetch_add(1, Ordering::Relaxed);
    }

    fn notify_frame_late(&self, late_by_epochs: u64) {
        log::warn!("frame running {late_by_epochs} epoch(s) behind");
    }

    fn notify_rtp_done(&self) {}

    fn notify_event(&self, event: SessionEvent) {
        log::warn!("session event: {event:?}");
    }
}

/// Runs the builder then hands its freshly-built packets to the
/// transmitter's ring each tick — the Packet Ring is shared between a
/// session's builder and its transmitter.
struct Pipeline {
    builder: St20Session,
    transmitter: Transmitter,
}

impl TaskletOps for Pipeline {
    fn name(&self) -> &str {
        "st20_pipeline"
    }

    fn handler(&mut self) -> TaskletResult {
        let build_result = self.builder.handler();

        if let Some(tx_ring) = self.transmitter.ring_mut(0, 0) {
            while let Some(pkt) = self.builder.ring_mut().pop() {
                if tx_ring.push(pkt).is_err() {
                    break;
                }
            }
        }

        let tx_result = self.transmitter.handler();

        match (build_result, tx_result) {
            (TaskletResult::Fatal, _) | (_, TaskletResult::Fatal) => TaskletResult::Fatal,
            (TaskletResult::HasPending, _) | (_, TaskletResult::HasPending) => TaskletResult::HasPending,
            _ => TaskletResult::AllDone,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    info!(
        "starting st20 sender: {}x{} @ {:.2}fps, ssrc={}",
        args.width,
        args.height,
        args.fps.frame_rate(),
        args.ssrc
    );

    let clock: Arc<dyn ClockSource> = Arc::new(WallClock::new());
    let frames_done = Arc::new(AtomicU64::new(0));
    let callbacks: Arc<dyn SessionCallbacks> = Arc::new(FreeRunningFrameSource {
        pool_len: args.frame_count as u32,
        next: AtomicU32::new(0),
        frames_done: Arc::clone(&frames_done),
    });

    let fmt = St20Format::Yuv422_10bit;
    let frame_size = fmt.frame_size(args.width, args.height) as usize;
    let on_done_callbacks = Arc::clone(&callbacks);
    let pool =
        FramePool::new_owned(args.frame_count, frame_size, Arc::new(move |idx| on_done_callbacks.notify_frame_done(idx)));

    let params = St20Params {
        width: args.width,
        height: args.height,
        fmt,
        fps: args.fps,
        active: ActiveRatio::Hd,
        packing: PackingMode::GpmSl,
        max_payload: args.max_payload,
        ssrc: args.ssrc,
        payload_type: 96,
        user_pacing: false,
        exact_user_pacing: false,
        rtp_timestamp_epoch: false,
        redundant: false,
        max_onward_epochs: 1000,
    };

    let ring_capacity = 4096usize;
    let builder = St20Session::new(params, Arc::clone(&clock), callbacks, pool, ring_capacity, args.bulk);

    let queue = Arc::new(LoopbackTxQueue::new(0));
    let port = PortTx::new(queue.clone(), args.bulk, 0.0, 16);
    let mut transmitter = Transmitter::new(Arc::clone(&clock));
    transmitter.add_session(SessionTx { ports: vec![port] }, vec![PacketRing::new(ring_capacity)]);

    let pipeline = Pipeline { builder, transmitter };

    let sch = Arc::new(Scheduler::request(0, SchType::Unpinned, "txapp", 1, 200, 0, 50, false));
    sch.attach_tasklet(Box::new(pipeline));
    sch.start(None, 0).context("failed to start scheduler")?;

    let sch_for_sigint = Arc::clone(&sch);
    ctrlc::set_handler(move || {
        log::warn!("received ctrl-c, stopping scheduler");
        sch_for_sigint.stop();
    })
    .context("failed to install ctrl-c handler")?;

    std::thread::sleep(Duration::from_secs(args.duration_secs));
    sch.stop();

    info!(
        "stopped: {} packets sent, {} frames completed",
        queue.sent_count(),
        frames_done.load(Ordering::Relaxed)
    );

    Ok(())
}

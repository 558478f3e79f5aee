//! Collaborator contracts the core requires from the host application
//! NIC bring-up, ARP, PTP discipline and mempool
//! allocation are out of scope; these traits are the seam.
//!
//! Grounded on `linnix-ai-ebpf-common`'s split between the wire-format
//! crate and the collector-supplied runtime context: the core never
//! constructs a collaborator itself, it is always handed one.

use crate::error::CoreResult;
use crate::frame::Packet;
use crate::txqueue::TxQueue;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

pub type MacAddr = [u8; 6];

/// PTP-disciplined wall clock and free-running TSC
pub trait ClockSource: Send + Sync {
    /// Monotonic TAI nanoseconds for `port`.
    fn ptp_time_ns(&self, port: u16) -> u64;
    /// Monotonic CPU time counter, used for pacing deadlines.
    fn tsc_ns(&self) -> u64;
}

/// Address resolution and local identity
pub trait NetworkInfo: Send + Sync {
    fn dst_ip_to_mac(&self, port: u16, ip: Ipv4Addr, timeout: Duration) -> CoreResult<MacAddr>;
    fn src_mac(&self, port: u16) -> MacAddr;
    fn src_ip(&self, port: u16) -> Ipv4Addr;
}

/// TX queue lifecycle; `TxQueue` itself is the per-burst
/// contract (`st2110_core::txqueue`).
pub trait TxQueueProvider: Send + Sync {
    fn tx_queue_get(&self, port: u16, flow: u32) -> CoreResult<Arc<dyn TxQueue>>;
    fn tx_queue_put(&self, queue: &Arc<dyn TxQueue>);
}

/// RTCP-only RX path: `rx_queue_get` + `rx_queue_burst` for RTCP only.
pub trait RxQueueProvider: Send + Sync {
    fn rx_queue_get(&self, port: u16, flow: u32) -> CoreResult<u32>;
    fn rx_queue_burst(&self, handle: u32, max: usize) -> Vec<Vec<u8>>;
}

/// Backing-store allocator for packet payloads (the allocator-side
/// counterpart to `mempool_create`/`mempool_free`,
/// `mbuf_alloc`/`mbuf_free`). Modelled as a plain allocator since
/// `Packet::payload` is a `Vec<u8>` rather than a DPDK mbuf.
pub trait PacketPool: Send + Sync {
    fn alloc(&self, len: usize) -> CoreResult<Packet>;
    fn free(&self, pkt: Packet);

    /// Chain a continuation packet onto `head`, for SRDs that split
    /// across multiple packets.
    fn chain(&self, head: &mut Packet, tail: Packet);
}

/// Per-frame metadata handed back alongside a `get_next_frame` pull;
/// the builder copies it once per frame.
#[derive(Debug, Default, Clone)]
pub struct FrameMeta {
    /// Present when `ST20_TX_FLAG_USER_PACING` is set.
    pub required_tai: Option<u64>,
    pub second_field: bool,
    /// Present when `ST20_TX_FLAG_USER_TIMESTAMP` is set.
    pub user_timestamp: Option<u32>,
    /// Out-of-band user-metadata bytes to send alongside this frame,
    /// rejected with `CoreError::ErrTxFrame` above
    /// `st2110_wire::USER_META_MAX_REAL_LENGTH`.
    pub user_meta: Option<Vec<u8>>,
}

/// Application callbacks supplied at `create`
pub trait SessionCallbacks: Send + Sync {
    /// Pull the next available frame. `Ok(None)` means busy, try later.
    fn get_next_frame(&self) -> CoreResult<Option<(u32, FrameMeta)>>;
    fn notify_frame_done(&self, idx: u32);
    fn notify_frame_late(&self, late_by_epochs: u64);
    fn notify_rtp_done(&self);
    fn notify_event(&self, event: SessionEvent);

    /// For slice-level video: how many lines of frame `idx` are ready.
    fn query_frame_lines_ready(&self, _idx: u32) -> Option<u32> {
        None
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Vsync,
    Fatal,
    RecoveryError,
}

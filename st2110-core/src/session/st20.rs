//! ST 2110-20 (uncompressed video) session builder — the exemplar
//! the other ST types follow.

use crate::collab::{ClockSource, FrameMeta, SessionCallbacks, SessionEvent};
use crate::error::CoreError;
use crate::fmt::{Fps, St20Format};
use crate::frame::{FramePool, Packet};
use crate::pacing::{advance_packet, compute_epoch, ActiveRatio, FrameTiming, PacingCursor, VrxBudget};
use crate::scheduler::tasklet::{TaskletOps, TaskletResult};
use crate::session::wire::{self, RowSpan};
use crate::session::{BuilderState, BuildStats, PackingMode, PacketRing, BPM_PKT_LEN};
use st2110_wire::USER_META_MAX_REAL_LENGTH;
use std::sync::Arc;

pub struct St20Params {
    pub width: u32,
    pub height: u32,
    pub fmt: St20Format,
    pub fps: Fps,
    pub active: ActiveRatio,
    pub packing: PackingMode,
    pub max_payload: u32,
    pub ssrc: u32,
    pub payload_type: u8,
    pub user_pacing: bool,
    pub exact_user_pacing: bool,
    pub rtp_timestamp_epoch: bool,
    pub redundant: bool,
    pub max_onward_epochs: u64,
}

impl St20Params {
    /// Total packets per frame under the configured packing mode.
    pub fn total_pkts_per_frame(&self) -> u32 {
        let pg = self.fmt.pixel_group();
        let line_size = self.fmt.line_size(self.width);
        match self.packing {
            PackingMode::GpmSl => {
                let pkts_in_line = line_size.div_ceil(self.max_payload);
                pkts_in_line * self.height
            }
            PackingMode::Bpm => {
                debug_assert_eq!(BPM_PKT_LEN % pg.size, 0);
                let total_bytes = line_size as u64 * self.height as u64;
                total_bytes.div_ceil(BPM_PKT_LEN as u64) as u32
            }
            PackingMode::Gpm => {
                let pkt_len = (self.max_payload / (pg.size * 2)) * (pg.size * 2);
                let total_bytes = line_size as u64 * self.height as u64;
                total_bytes.div_ceil(pkt_len as u64) as u32
            }
        }
    }
}

/// Packet length for one packet of a GPM_SL frame at `pixels_in_pkt`
/// pixels
pub fn gpm_sl_pkt_len(fmt: St20Format, pixels_in_pkt: u32) -> u32 {
    let pg = fmt.pixel_group();
    pixels_in_pkt.div_ceil(pg.coverage) * pg.size
}

pub struct St20Session {
    params: St20Params,
    clock: Arc<dyn ClockSource>,
    callbacks: Arc<dyn SessionCallbacks>,
    pool: FramePool,
    ring: PacketRing,
    redundant_ring: Option<PacketRing>,
    timing: FrameTiming,
    vrx: VrxBudget,
    state: BuilderState,
    cursor: PacingCursor,
    frame_idx: u32,
    pkt_idx: u32,
    total_pkts: u32,
    rtp_timestamp: u32,
    /// Extended RTP sequence counter, monotonic across frames (unlike
    /// `pkt_idx`, which resets every frame for payload-offset maths).
    rtp_seq: u32,
    second_field: bool,
    user_timestamp: Option<u32>,
    /// Set for a frame whose epoch landed beyond `max_onward_epochs`:
    /// its packets are replaced with one dummy packet to hold pacing
    /// cadence without transmitting stale media.
    drop_current_frame: bool,
    pending_user_meta: Option<Vec<u8>>,
    inflight: Option<Packet>,
    bulk: u32,
    pub stats: BuildStats,
}

impl St20Session {
    pub fn new(
        params: St20Params,
        clock: Arc<dyn ClockSource>,
        callbacks: Arc<dyn SessionCallbacks>,
        pool: FramePool,
        ring_capacity: usize,
        bulk: u32,
    ) -> Self {
        let total_pkts = params.total_pkts_per_frame();
        let fps_timing = params.fps.timing();
        let timing = FrameTiming::compute(fps_timing, params.active, total_pkts);
        let frame_time_s = timing.frame_time_ns / 1_000_000_000.0;
        let vrx = VrxBudget::compute(total_pkts, frame_time_s, false);
        let redundant_ring = params.redundant.then(|| PacketRing::new(ring_capacity));

        Self {
            params,
            clock,
            callbacks,
            pool,
            ring: PacketRing::new(ring_capacity),
            redundant_ring,
            timing,
            vrx,
            state: BuilderState::WaitFrame,
            cursor: PacingCursor::default(),
            frame_idx: 0,
            pkt_idx: 0,
            total_pkts,
            rtp_timestamp: 0,
            rtp_seq: 0,
            second_field: false,
            user_timestamp: None,
            drop_current_frame: false,
            pending_user_meta: None,
            inflight: None,
            bulk,
            stats: BuildStats::default(),
        }
    }

    pub fn ring_mut(&mut self) -> &mut PacketRing {
        &mut self.ring
    }

    pub fn redundant_ring_mut(&mut self) -> Option<&mut PacketRing> {
        self.redundant_ring.as_mut()
    }

    fn flush_inflight(&mut self) -> bool {
        if let Some(pkt) = self.inflight.take() {
            match self.ring.push(pkt) {
                Ok(()) => true,
                Err(pkt) => {
                    self.inflight = Some(pkt);
                    false
                }
            }
        } else {
            true
        }
    }

    fn acquire_frame(&mut self) -> Result<Option<FrameMeta>, TaskletResult> {
        match self.callbacks.get_next_frame() {
            Ok(Some((idx, meta))) => {
                if self.pool.checkout(idx).is_err() {
                    self.callbacks.notify_event(SessionEvent::RecoveryError);
                    return Ok(None);
                }
                self.frame_idx = idx;
                self.pkt_idx = 0;
                self.second_field = meta.second_field;
                self.state = BuilderState::SendingPkts;
                Ok(Some(meta))
            }
            Ok(None) => {
                self.stats.build_ret_code_busy += 1;
                Ok(None)
            }
            Err(_) => Ok(None),
        }
    }

    /// Returns whether this frame's epoch landed beyond the configured
    /// onward-drop budget (caller must skip real emission for it).
    fn compute_frame_epoch(&mut self, meta_required_tai: Option<u64>) -> bool {
        let cur_tai = self.clock.ptp_time_ns(0);
        let cur_tsc = self.clock.tsc_ns();
        let result = compute_epoch(
            &mut self.cursor,
            cur_tai,
            cur_tsc,
            self.timing.frame_time_ns as u64,
            self.timing.tr_offset_ns as u64,
            self.vrx.narrow,
            self.timing.trs_ns as u64,
            meta_required_tai,
            self.params.exact_user_pacing,
            self.params.max_onward_epochs,
        );
        if let Some(late) = result.late_by_epochs {
            self.callbacks.notify_frame_late(late);
            self.stats.frames_late += 1;
        }
        if result.drop_onward {
            self.stats.drop_onward += 1;
        }
        if result.user_timestamp_past {
            log::warn!("{}", CoreError::ErrUserTimestamp);
            self.stats.user_timestamp_errors += 1;
        }

        if let Some(user_ts) = self.user_timestamp.filter(|_| self.params.user_pacing) {
            self.rtp_timestamp = user_ts;
            return result.drop_onward;
        }

        let epoch_base = if self.params.rtp_timestamp_epoch {
            result.epoch * self.timing.frame_time_ns as u64
        } else {
            self.cursor.ptp_cursor
        };
        let clock_rate = self.params.fps.timing().sampling_clock_rate as u64;
        self.rtp_timestamp = ((epoch_base as u128 * clock_rate as u128) / 1_000_000_000u128) as u32;
        result.drop_onward
    }

    /// Reject oversized out-of-band user metadata (`CoreError::ErrTxFrame`)
    /// rather than silently truncating it.
    fn validate_user_meta(user_meta: Option<Vec<u8>>, stats: &mut BuildStats) -> Option<Vec<u8>> {
        match user_meta {
            Some(bytes) if bytes.len() > USER_META_MAX_REAL_LENGTH as usize => {
                log::warn!("{}", CoreError::ErrTxFrame);
                stats.tx_frame_errors += 1;
                None
            }
            other => other,
        }
    }

    fn build_user_meta_packet(&mut self, meta: &[u8]) -> Packet {
        let seq16 = self.rtp_seq as u16;
        let payload = wire::rfc4175_user_meta_packet(self.params.payload_type, self.params.ssrc, seq16, self.rtp_timestamp, meta);
        self.rtp_seq = self.rtp_seq.wrapping_add(1);
        Packet {
            seq: self.pkt_idx,
            target_tsc: self.cursor.tsc_cursor,
            frame_index: self.frame_idx,
            rtp_timestamp: self.rtp_timestamp,
            marker: false,
            second_field: self.second_field,
            is_pad: false,
            is_dummy: false,
            payload,
            done: None,
        }
    }

    fn build_one_packet(&mut self, marker: bool) -> Packet {
        let pkt_len = match self.params.packing {
            PackingMode::GpmSl => {
                let line_size = self.params.fmt.line_size(self.params.width);
                let pkts_in_line = line_size.div_ceil(self.params.max_payload).max(1);
                let pixels_in_pkt = self.params.width.div_ceil(pkts_in_line).max(1);
                gpm_sl_pkt_len(self.params.fmt, pixels_in_pkt)
            }
            PackingMode::Bpm => BPM_PKT_LEN,
            PackingMode::Gpm => {
                let pg = self.params.fmt.pixel_group();
                (self.params.max_payload / (pg.size * 2)) * (pg.size * 2)
            }
        };

        let notifier = self.pool.new_packet_notifier(self.frame_idx);
        let storage = self.pool.storage(self.frame_idx).as_slice();
        let start = (self.pkt_idx as usize * pkt_len as usize).min(storage.len());
        let end = (start + pkt_len as usize).min(storage.len());
        let media = storage[start..end].to_vec();

        let line_size = self.params.fmt.line_size(self.params.width);
        let mut rows = wire::row_spans_for_range(line_size, start as u32, end as u32);
        if rows.is_empty() {
            rows.push(RowSpan { row_number: 0, row_offset: 0, length: media.len() as u16 });
        }

        let seq16 = self.rtp_seq as u16;
        let ext_seq16 = (self.rtp_seq >> 16) as u16;
        let payload = wire::rfc4175_packet(
            self.params.payload_type,
            self.params.ssrc,
            seq16,
            marker,
            self.rtp_timestamp,
            ext_seq16,
            self.second_field,
            &rows,
            &media,
        );
        self.rtp_seq = self.rtp_seq.wrapping_add(1);

        let target_tsc = self.cursor.tsc_cursor;
        advance_packet(&mut self.cursor, self.timing.trs_ns as u64);

        if self.redundant_ring.is_some() {
            // Redundant port shares the same payload chain; clone bumps
            // the frame refcount
            let _redundant_notifier = notifier.clone();
        }

        Packet {
            seq: self.pkt_idx,
            target_tsc,
            frame_index: self.frame_idx,
            rtp_timestamp: self.rtp_timestamp,
            marker,
            second_field: self.second_field,
            is_pad: false,
            is_dummy: false,
            payload,
            done: Some(notifier),
        }
    }
}

impl TaskletOps for St20Session {
    fn name(&self) -> &str {
        "st20_builder"
    }

    fn handler(&mut self) -> TaskletResult {
        if !self.flush_inflight() {
            return TaskletResult::HasPending;
        }

        if self.state == BuilderState::WaitFrame {
            match self.acquire_frame() {
                Ok(Some(meta)) => {
                    self.user_timestamp = meta.user_timestamp;
                    self.pending_user_meta = Self::validate_user_meta(meta.user_meta, &mut self.stats);
                    let required_tai = self.params.user_pacing.then_some(meta.required_tai).flatten();
                    self.drop_current_frame = self.compute_frame_epoch(required_tai);
                }
                Ok(None) => return TaskletResult::AllDone,
                Err(r) => return r,
            }
        }

        let cur_tsc = self.clock.tsc_ns();
        if cur_tsc < self.cursor.tsc_cursor {
            let gap = self.cursor.tsc_cursor - cur_tsc;
            return if gap < 1_000_000 { TaskletResult::HasPending } else { TaskletResult::AllDone };
        }

        if self.drop_current_frame {
            let pkt = Packet::dummy(self.cursor.tsc_cursor);
            match self.ring.push(pkt) {
                Ok(()) => {}
                Err(pkt) => {
                    self.inflight = Some(pkt);
                    return TaskletResult::HasPending;
                }
            }
            self.pool.mark_returned(self.frame_idx);
            self.state = BuilderState::WaitFrame;
            self.drop_current_frame = false;
            return TaskletResult::HasPending;
        }

        if let Some(meta) = self.pending_user_meta.take() {
            let pkt = self.build_user_meta_packet(&meta);
            if self.ring.push(pkt).is_err() {
                self.stats.tx_frame_errors += 1;
            }
        }

        let mut produced = 0;
        while produced < self.bulk && self.pkt_idx < self.total_pkts {
            let marker = self.pkt_idx + 1 == self.total_pkts;
            let pkt = self.build_one_packet(marker);
            self.pkt_idx += 1;

            match self.ring.push(pkt) {
                Ok(()) => {}
                Err(pkt) => {
                    self.inflight = Some(pkt);
                    return TaskletResult::HasPending;
                }
            }
            produced += 1;
        }

        if self.pkt_idx >= self.total_pkts {
            self.pool.mark_returned(self.frame_idx);
            self.state = BuilderState::WaitFrame;
            self.stats.frames_sent += 1;
            if cur_tsc > self.cursor.tsc_cursor {
                self.stats.build_time_exceeds_trs += 1;
            }
        }

        TaskletResult::HasPending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreResult;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedClock;
    impl ClockSource for FixedClock {
        fn ptp_time_ns(&self, _port: u16) -> u64 {
            1_000_000_000
        }
        fn tsc_ns(&self) -> u64 {
            1_000_000_000
        }
    }

    struct AlwaysFrame(AtomicU32);
    impl SessionCallbacks for AlwaysFrame {
        fn get_next_frame(&self) -> CoreResult<Option<(u32, FrameMeta)>> {
            Ok(Some((0, FrameMeta::default())))
        }
        fn notify_frame_done(&self, _idx: u32) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn notify_frame_late(&self, _late_by_epochs: u64) {}
        fn notify_rtp_done(&self) {}
        fn notify_event(&self, _event: SessionEvent) {}
    }

    fn test_params() -> St20Params {
        St20Params {
            width: 1920,
            height: 1080,
            fmt: St20Format::Yuv422_10bit,
            fps: Fps::P25,
            active: ActiveRatio::Hd,
            packing: PackingMode::GpmSl,
            max_payload: 1200,
            ssrc: 1,
            payload_type: 96,
            user_pacing: false,
            exact_user_pacing: false,
            rtp_timestamp_epoch: false,
            redundant: false,
            max_onward_epochs: 1000,
        }
    }

    #[test]
    fn total_pkts_per_frame_is_positive_for_gpm_sl() {
        let p = test_params();
        assert!(p.total_pkts_per_frame() > 0);
    }

    #[test]
    fn builder_drains_a_full_frame_into_the_ring() {
        let p = test_params();
        let total = p.total_pkts_per_frame();
        let callbacks: Arc<dyn SessionCallbacks> = Arc::new(AlwaysFrame(AtomicU32::new(0)));
        let clock: Arc<dyn ClockSource> = Arc::new(FixedClock);
        let frame_size = p.fmt.frame_size(p.width, p.height) as usize;
        let pool = FramePool::new_owned(2, frame_size, Arc::new(|_| {}));
        let mut session = St20Session::new(p, clock, callbacks, pool, 65536usize.next_power_of_two(), 8);

        let mut ticks = 0;
        while session.stats.frames_sent == 0 && ticks < 10_000 {
            session.handler();
            ticks += 1;
        }
        assert_eq!(session.stats.frames_sent, 1);
        assert_eq!(session.ring_mut().len() as u32, total);
    }

    #[test]
    fn validate_user_meta_rejects_oversized_metadata() {
        let mut stats = BuildStats::default();
        let oversized = vec![0u8; USER_META_MAX_REAL_LENGTH as usize + 1];
        let result = St20Session::validate_user_meta(Some(oversized), &mut stats);
        assert!(result.is_none());
        assert_eq!(stats.tx_frame_errors, 1);
    }

    #[test]
    fn validate_user_meta_passes_through_in_range_metadata() {
        let mut stats = BuildStats::default();
        let meta = vec![1, 2, 3];
        let result = St20Session::validate_user_meta(Some(meta.clone()), &mut stats);
        assert_eq!(result, Some(meta));
        assert_eq!(stats.tx_frame_errors, 0);
    }

    #[test]
    fn compute_frame_epoch_flags_drop_once_onward_budget_is_exhausted() {
        let p = test_params();
        let callbacks: Arc<dyn SessionCallbacks> = Arc::new(AlwaysFrame(AtomicU32::new(0)));
        let clock: Arc<dyn ClockSource> = Arc::new(FixedClock);
        let frame_size = p.fmt.frame_size(p.width, p.height) as usize;
        let pool = FramePool::new_owned(2, frame_size, Arc::new(|_| {}));
        let mut session = St20Session::new(p, clock, callbacks, pool, 1024, 8);
        session.params.max_onward_epochs = 0;
        // Pin the cursor to the clock's current epoch so the
        // None-required_tai branch has to pull it one epoch onward.
        session.cursor.cur_epoch = 1_000_000_000u64.div_ceil(session.timing.frame_time_ns as u64);

        let dropped = session.compute_frame_epoch(None);
        assert!(dropped);
        assert_eq!(session.stats.drop_onward, 1);
    }
}

//! ST 2110-22 (compressed video, RFC 9134 JPEG-XS/J2K) session builder.
//! Follows the shape of [[crate::session::st20]]; differs mainly in the
//! fixed 60-byte codestream box prepended to the first packet of each
//! frame unless `DISABLE_BOXES` is set

use crate::collab::{ClockSource, FrameMeta, SessionCallbacks, SessionEvent};
use crate::fmt::Fps;
use crate::frame::{FramePool, Packet};
use crate::pacing::{advance_packet, compute_epoch, ActiveRatio, FrameTiming, PacingCursor, VrxBudget};
use crate::scheduler::tasklet::{TaskletOps, TaskletResult};
use crate::session::wire::{self, RowSpan};
use crate::session::{BuildStats, BuilderState, PacketRing};
use std::sync::Arc;

/// JPEG-XS/J2K box header total (`jpvs/jpvi/jxpl/colr`), fixed size.
pub const BOXES_LEN: usize = 60;

pub struct St22Params {
    pub fps: Fps,
    pub active: ActiveRatio,
    pub max_payload: u32,
    pub codestream_size: u32,
    pub ssrc: u32,
    pub payload_type: u8,
    pub disable_boxes: bool,
    pub max_onward_epochs: u64,
}

impl St22Params {
    pub fn total_pkts_per_frame(&self) -> u32 {
        let effective_boxes = if self.disable_boxes { 0 } else { BOXES_LEN as u32 };
        (self.codestream_size + effective_boxes).div_ceil(self.max_payload).max(1)
    }
}

pub struct St22Session {
    params: St22Params,
    clock: Arc<dyn ClockSource>,
    callbacks: Arc<dyn SessionCallbacks>,
    pool: FramePool,
    ring: PacketRing,
    timing: FrameTiming,
    vrx: VrxBudget,
    state: BuilderState,
    cursor: PacingCursor,
    frame_idx: u32,
    pkt_idx: u32,
    total_pkts: u32,
    rtp_timestamp: u32,
    rtp_seq: u32,
    bulk: u32,
    pub stats: BuildStats,
}

impl St22Session {
    pub fn new(
        params: St22Params,
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

        Self {
            params,
            clock,
            callbacks,
            pool,
            ring: PacketRing::new(ring_capacity),
            timing,
            vrx,
            state: BuilderState::WaitFrame,
            cursor: PacingCursor::default(),
            frame_idx: 0,
            pkt_idx: 0,
            total_pkts,
            rtp_timestamp: 0,
            rtp_seq: 0,
            bulk,
            stats: BuildStats::default(),
        }
    }

    pub fn ring_mut(&mut self) -> &mut PacketRing {
        &mut self.ring
    }

    fn acquire_frame(&mut self) -> Option<FrameMeta> {
        match self.callbacks.get_next_frame() {
            Ok(Some((idx, meta))) => {
                if self.pool.checkout(idx).is_err() {
                    self.callbacks.notify_event(SessionEvent::RecoveryError);
                    return None;
                }
                self.frame_idx = idx;
                self.pkt_idx = 0;
                self.state = BuilderState::SendingPkts;
                Some(meta)
            }
            _ => None,
        }
    }
}

impl TaskletOps for St22Session {
    fn name(&self) -> &str {
        "st22_builder"
    }

    fn handler(&mut self) -> TaskletResult {
        if self.state == BuilderState::WaitFrame {
            let Some(meta) = self.acquire_frame() else {
                return TaskletResult::AllDone;
            };
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
                meta.required_tai,
                false,
                self.params.max_onward_epochs,
            );
            if let Some(late) = result.late_by_epochs {
                self.callbacks.notify_frame_late(late);
                self.stats.frames_late += 1;
            }
            let clock_rate = self.params.fps.timing().sampling_clock_rate as u64;
            self.rtp_timestamp = ((self.cursor.ptp_cursor as u128 * clock_rate as u128) / 1_000_000_000u128) as u32;
        }

        let cur_tsc = self.clock.tsc_ns();
        if cur_tsc < self.cursor.tsc_cursor {
            return TaskletResult::AllDone;
        }

        let boxes_len = if self.params.disable_boxes { 0 } else { BOXES_LEN };
        let mut produced = 0;
        while produced < self.bulk && self.pkt_idx < self.total_pkts {
            let notifier = self.pool.new_packet_notifier(self.frame_idx);
            let payload = self.pool.storage(self.frame_idx).as_slice();
            let per_pkt = self.params.max_payload as usize;
            let start = self.pkt_idx as usize * per_pkt;
            let mut payload = payload.get(start..(start + per_pkt).min(payload.len())).unwrap_or(&[]).to_vec();
            if self.pkt_idx == 0 && boxes_len > 0 {
                let mut framed = vec![0u8; boxes_len];
                framed.append(&mut payload);
                payload = framed;
            }

            let target_tsc = self.cursor.tsc_cursor;
            advance_packet(&mut self.cursor, self.timing.trs_ns as u64);

            let marker = self.pkt_idx + 1 == self.total_pkts;
            let rows = [RowSpan { row_number: 0, row_offset: 0, length: payload.len() as u16 }];
            let seq16 = self.rtp_seq as u16;
            let ext_seq16 = (self.rtp_seq >> 16) as u16;
            let wire_payload = wire::rfc4175_packet(
                self.params.payload_type,
                self.params.ssrc,
                seq16,
                marker,
                self.rtp_timestamp,
                ext_seq16,
                false,
                &rows,
                &payload,
            );
            self.rtp_seq = self.rtp_seq.wrapping_add(1);
            let pkt = Packet {
                seq: self.pkt_idx,
                target_tsc,
                frame_index: self.frame_idx,
                rtp_timestamp: self.rtp_timestamp,
                marker,
                second_field: false,
                is_pad: false,
                is_dummy: false,
                payload: wire_payload,
                done: Some(notifier),
            };
            self.pkt_idx += 1;
            if self.ring.push(pkt).is_err() {
                return TaskletResult::HasPending;
            }
            produced += 1;
        }

        if self.pkt_idx >= self.total_pkts {
            self.pool.mark_returned(self.frame_idx);
            self.state = BuilderState::WaitFrame;
            self.stats.frames_sent += 1;
        }

        TaskletResult::HasPending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_pkts_accounts_for_boxes_unless_disabled() {
        let with_boxes = St22Params {
            fps: Fps::P25,
            active: ActiveRatio::Hd,
            max_payload: 1400,
            codestream_size: 100_000,
            ssrc: 1,
            payload_type: 99,
            disable_boxes: false,
            max_onward_epochs: 1000,
        };
        let without = St22Params { disable_boxes: true, ..with_boxes_clone(&with_boxes) };
        assert!(with_boxes.total_pkts_per_frame() >= without.total_pkts_per_frame());
    }

    fn with_boxes_clone(p: &St22Params) -> St22Params {
        St22Params {
            fps: p.fps,
            active: p.active,
            max_payload: p.max_payload,
            codestream_size: p.codestream_size,
            ssrc: p.ssrc,
            payload_type: p.payload_type,
            disable_boxes: p.disable_boxes,
            max_onward_epochs: p.max_onward_epochs,
        }
    }
}

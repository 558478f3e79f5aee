//! ST 2110-41 (fast metadata) session builder: RFC 8331-shaped header
//! plus 32-bit-word-aligned, zero-padded payloads

use crate::collab::{ClockSource, SessionCallbacks, SessionEvent};
use crate::frame::{FramePool, Packet};
use crate::pacing::{advance_packet, PacingCursor};
use crate::scheduler::tasklet::{TaskletOps, TaskletResult};
use crate::session::wire;
use crate::session::{BuildStats, BuilderState, PacketRing};
use std::sync::Arc;

pub struct St41Params {
    pub ssrc: u32,
    pub payload_type: u8,
    pub data_item_type: u16,
    pub frame_time_ns: u64,
}

/// Round `data_item_length` (bytes) up to a whole number of 32-bit
/// words and return the padded length
pub fn word_align(data_item_length: u32) -> u32 {
    data_item_length.div_ceil(4) * 4
}

pub struct St41Session {
    params: St41Params,
    clock: Arc<dyn ClockSource>,
    callbacks: Arc<dyn SessionCallbacks>,
    pool: FramePool,
    ring: PacketRing,
    cursor: PacingCursor,
    state: BuilderState,
    frame_idx: u32,
    seq: u32,
    rtp_timestamp: u32,
    pub stats: BuildStats,
}

impl St41Session {
    pub fn new(
        params: St41Params,
        clock: Arc<dyn ClockSource>,
        callbacks: Arc<dyn SessionCallbacks>,
        pool: FramePool,
        ring_capacity: usize,
    ) -> Self {
        Self {
            params,
            clock,
            callbacks,
            pool,
            ring: PacketRing::new(ring_capacity),
            cursor: PacingCursor::default(),
            state: BuilderState::WaitFrame,
            frame_idx: 0,
            seq: 0,
            rtp_timestamp: 0,
            stats: BuildStats::default(),
        }
    }

    pub fn ring_mut(&mut self) -> &mut PacketRing {
        &mut self.ring
    }

    /// Build one zero-padded, word-aligned metadata payload from raw
    /// application data.
    pub fn build_payload(&self, data: &[u8]) -> Vec<u8> {
        let padded_len = word_align(data.len() as u32) as usize;
        let mut payload = vec![0u8; padded_len];
        payload[..data.len()].copy_from_slice(data);
        payload
    }
}

impl TaskletOps for St41Session {
    fn name(&self) -> &str {
        "st41_builder"
    }

    fn handler(&mut self) -> TaskletResult {
        if self.state == BuilderState::WaitFrame {
            match self.callbacks.get_next_frame() {
                Ok(Some((idx, _meta))) => {
                    if self.pool.checkout(idx).is_err() {
                        self.callbacks.notify_event(SessionEvent::RecoveryError);
                        return TaskletResult::AllDone;
                    }
                    self.frame_idx = idx;
                    self.state = BuilderState::SendingPkts;
                    let ptp_now = self.clock.ptp_time_ns(0);
                    self.cursor.tsc_cursor = self.clock.tsc_ns();
                    self.cursor.ptp_cursor = ptp_now;
                    self.rtp_timestamp = ((ptp_now as u128 * 90_000u128) / 1_000_000_000u128) as u32;
                }
                _ => return TaskletResult::AllDone,
            }
        }

        if self.clock.tsc_ns() < self.cursor.tsc_cursor {
            return TaskletResult::AllDone;
        }

        let notifier = self.pool.new_packet_notifier(self.frame_idx);
        let raw = self.pool.storage(self.frame_idx).as_slice().to_vec();
        let payload = self.build_payload(&raw);

        let target_tsc = self.cursor.tsc_cursor;
        advance_packet(&mut self.cursor, self.params.frame_time_ns);

        let seq16 = self.seq as u16;
        let ext_seq16 = (self.seq >> 16) as u16;
        let mut wire_payload =
            wire::rfc8331_packet(self.params.payload_type, self.params.ssrc, seq16, true, self.rtp_timestamp, ext_seq16, 1, false, &payload);
        wire_payload.extend_from_slice(&payload);

        let pkt = Packet {
            seq: self.seq,
            target_tsc,
            frame_index: self.frame_idx,
            rtp_timestamp: self.rtp_timestamp,
            marker: true,
            second_field: false,
            is_pad: false,
            is_dummy: false,
            payload: wire_payload,
            done: Some(notifier),
        };
        self.seq = self.seq.wrapping_add(1);

        if self.ring.push(pkt).is_ok() {
            self.pool.mark_returned(self.frame_idx);
            self.state = BuilderState::WaitFrame;
            self.stats.frames_sent += 1;
        }

        TaskletResult::HasPending
    }
}

//! ST 2110-30 (PCM audio, RFC 3550) session builder. Follows
//! [[crate::session::st20]]'s shape; audio has no line maths, just a
//! fixed packet time and sampling rate

use crate::collab::{ClockSource, SessionCallbacks, SessionEvent};
use crate::frame::{FramePool, Packet};
use crate::pacing::{advance_packet, PacingCursor};
use crate::scheduler::tasklet::{TaskletOps, TaskletResult};
use crate::session::wire;
use crate::session::{BuildStats, BuilderState, PacketRing};
use std::sync::Arc;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PacketTime {
    Ms1,
    Us125,
    Us80,
}

impl PacketTime {
    pub fn duration_ns(self) -> u64 {
        match self {
            PacketTime::Ms1 => 1_000_000,
            PacketTime::Us125 => 125_000,
            PacketTime::Us80 => 80_000,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SampleRate {
    Hz48000,
    Hz96000,
    Hz44100,
}

impl SampleRate {
    pub fn hz(self) -> u32 {
        match self {
            SampleRate::Hz48000 => 48_000,
            SampleRate::Hz96000 => 96_000,
            SampleRate::Hz44100 => 44_100,
        }
    }
}

pub struct St30Params {
    pub channels: u32,
    pub bytes_per_sample: u32,
    pub packet_time: PacketTime,
    pub sample_rate: SampleRate,
    pub ssrc: u32,
    pub payload_type: u8,
}

impl St30Params {
    pub fn samples_per_packet(&self) -> u32 {
        ((self.sample_rate.hz() as u64 * self.packet_time.duration_ns() as u64) / 1_000_000_000) as u32
    }

    pub fn packet_payload_len(&self) -> u32 {
        self.samples_per_packet() * self.channels * self.bytes_per_sample
    }
}

pub struct St30Session {
    params: St30Params,
    clock: Arc<dyn ClockSource>,
    callbacks: Arc<dyn SessionCallbacks>,
    pool: FramePool,
    ring: PacketRing,
    cursor: PacingCursor,
    state: BuilderState,
    frame_idx: u32,
    pkt_offset: u32,
    frame_len: u32,
    seq: u32,
    rtp_timestamp: u32,
    bulk: u32,
    pub stats: BuildStats,
}

impl St30Session {
    pub fn new(
        params: St30Params,
        clock: Arc<dyn ClockSource>,
        callbacks: Arc<dyn SessionCallbacks>,
        pool: FramePool,
        ring_capacity: usize,
        bulk: u32,
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
            pkt_offset: 0,
            frame_len: 0,
            seq: 0,
            rtp_timestamp: 0,
            bulk,
            stats: BuildStats::default(),
        }
    }

    pub fn ring_mut(&mut self) -> &mut PacketRing {
        &mut self.ring
    }
}

impl TaskletOps for St30Session {
    fn name(&self) -> &str {
        "st30_builder"
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
                    self.pkt_offset = 0;
                    self.frame_len = self.pool.storage(idx).len() as u32;
                    self.state = BuilderState::SendingPkts;
                    let ptp_now = self.clock.ptp_time_ns(0);
                    self.cursor.tsc_cursor = self.clock.tsc_ns();
                    self.cursor.ptp_cursor = ptp_now;
                    self.rtp_timestamp = ((ptp_now as u128 * self.params.sample_rate.hz() as u128) / 1_000_000_000u128) as u32;
                }
                _ => return TaskletResult::AllDone,
            }
        }

        if self.clock.tsc_ns() < self.cursor.tsc_cursor {
            return TaskletResult::AllDone;
        }

        let payload_len = self.params.packet_payload_len();
        let mut produced = 0;
        while produced < self.bulk && self.pkt_offset < self.frame_len {
            let notifier = self.pool.new_packet_notifier(self.frame_idx);
            let storage = self.pool.storage(self.frame_idx).as_slice();
            let start = self.pkt_offset as usize;
            let end = (start + payload_len as usize).min(storage.len());
            let payload = storage[start..end].to_vec();

            let target_tsc = self.cursor.tsc_cursor;
            advance_packet(&mut self.cursor, self.params.packet_time.duration_ns());

            let marker = end >= storage.len();
            let seq16 = self.seq as u16;
            let wire_payload =
                wire::rfc3550_packet(self.params.payload_type, self.params.ssrc, seq16, marker, self.rtp_timestamp, &payload);
            let pkt = Packet {
                seq: self.seq,
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
            self.seq = self.seq.wrapping_add(1);
            self.pkt_offset += payload_len;
            if self.ring.push(pkt).is_err() {
                return TaskletResult::HasPending;
            }
            produced += 1;
        }

        if self.pkt_offset >= self.frame_len {
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
    fn samples_per_packet_matches_1ms_at_48khz() {
        let p = St30Params {
            channels: 2,
            bytes_per_sample: 3,
            packet_time: PacketTime::Ms1,
            sample_rate: SampleRate::Hz48000,
            ssrc: 1,
            payload_type: 98,
        };
        assert_eq!(p.samples_per_packet(), 48);
        assert_eq!(p.packet_payload_len(), 48 * 2 * 3);
    }

    #[test]
    fn samples_per_packet_matches_125us_at_48khz() {
        let p = St30Params {
            channels: 1,
            bytes_per_sample: 3,
            packet_time: PacketTime::Us125,
            sample_rate: SampleRate::Hz48000,
            ssrc: 1,
            payload_type: 98,
        };
        assert_eq!(p.samples_per_packet(), 6);
    }
}

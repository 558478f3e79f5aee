//! ST 2110-40 (ancillary data, RFC 8331) session builder. Shares the
//! shape of [[crate::session::st20]]; the only wrinkle is optional
//! split-by-ANC-packet mode, one RTP packet per ANC
//! packet instead of bin-packing several into one payload.

use crate::collab::{ClockSource, SessionCallbacks, SessionEvent};
use crate::frame::{FramePool, Packet};
use crate::pacing::{advance_packet, PacingCursor};
use crate::scheduler::tasklet::{TaskletOps, TaskletResult};
use crate::session::wire;
use crate::session::{BuildStats, BuilderState, PacketRing};
use std::sync::Arc;

pub struct St40Params {
    pub ssrc: u32,
    pub payload_type: u8,
    pub max_payload: u32,
    pub split_by_anc_packet: bool,
    pub frame_time_ns: u64,
}

/// One ANC packet as handed to the builder by the application; `udw`
/// is the user data word payload already packed per SMPTE ST 291-1.
pub struct AncPacket {
    pub line_number: u16,
    pub horizontal_offset: u16,
    pub udw: Vec<u8>,
}

/// Header of one ANC record as laid out in the frame buffer by the
/// application: `line_number`, `horizontal_offset`, `udw_len`, all
/// little-endian, followed by `udw_len` bytes of user data words.
const ANC_RECORD_HDR_LEN: usize = 6;

pub struct St40Session {
    params: St40Params,
    clock: Arc<dyn ClockSource>,
    callbacks: Arc<dyn SessionCallbacks>,
    pool: FramePool,
    ring: PacketRing,
    cursor: PacingCursor,
    state: BuilderState,
    frame_idx: u32,
    seq: u32,
    rtp_timestamp: u32,
    bulk: u32,
    pub stats: BuildStats,
}

impl St40Session {
    pub fn new(
        params: St40Params,
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
            seq: 0,
            rtp_timestamp: 0,
            bulk,
            stats: BuildStats::default(),
        }
    }

    pub fn ring_mut(&mut self) -> &mut PacketRing {
        &mut self.ring
    }

    /// Decode the ANC records the application wrote into the frame
    /// buffer: a run of `(line_number: u16, horizontal_offset: u16,
    /// udw_len: u16)` headers (all little-endian) each followed by
    /// `udw_len` bytes, ending at the first truncated or zero-length
    /// trailer. A buffer with no records decodes to an empty frame.
    fn decode_ancs(buf: &[u8]) -> Vec<AncPacket> {
        let mut ancs = Vec::new();
        let mut off = 0usize;
        while off + ANC_RECORD_HDR_LEN <= buf.len() {
            let line_number = u16::from_le_bytes([buf[off], buf[off + 1]]);
            let horizontal_offset = u16::from_le_bytes([buf[off + 2], buf[off + 3]]);
            let udw_len = u16::from_le_bytes([buf[off + 4], buf[off + 5]]) as usize;
            let udw_start = off + ANC_RECORD_HDR_LEN;
            if udw_len == 0 || udw_start + udw_len > buf.len() {
                break;
            }
            ancs.push(AncPacket {
                line_number,
                horizontal_offset,
                udw: buf[udw_start..udw_start + udw_len].to_vec(),
            });
            off = udw_start + udw_len;
        }
        ancs
    }

    /// Bin-pack (or, in split mode, individually wrap) ANC packets into
    /// RTP payloads that respect `max_payload`. Each output bin carries
    /// the count of ANC packets merged into it, for the RFC 8331
    /// `ANC_Count` field.
    fn pack(&self, ancs: Vec<AncPacket>) -> Vec<(Vec<u8>, u16)> {
        if self.params.split_by_anc_packet {
            return ancs.into_iter().map(|a| (a.udw, 1)).collect();
        }
        let mut out = Vec::new();
        let mut cur = Vec::new();
        let mut cur_count: u16 = 0;
        for anc in ancs {
            if cur.len() + anc.udw.len() > self.params.max_payload as usize && !cur.is_empty() {
                out.push((std::mem::take(&mut cur), cur_count));
                cur_count = 0;
            }
            cur.extend_from_slice(&anc.udw);
            cur_count += 1;
        }
        if !cur.is_empty() {
            out.push((cur, cur_count));
        }
        out
    }
}

impl TaskletOps for St40Session {
    fn name(&self) -> &str {
        "st40_builder"
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

        let raw = self.pool.storage(self.frame_idx).as_slice().to_vec();
        let ancs = Self::decode_ancs(&raw);
        let payloads = self.pack(ancs);
        let total = payloads.len() as u32;
        let mut produced = 0;
        for (i, (payload, anc_count)) in payloads.into_iter().enumerate() {
            if produced >= self.bulk {
                break;
            }
            let notifier = self.pool.new_packet_notifier(self.frame_idx);
            let target_tsc = self.cursor.tsc_cursor;
            advance_packet(&mut self.cursor, self.params.frame_time_ns / total.max(1) as u64);

            let marker = i as u32 + 1 == total;
            let seq16 = self.seq as u16;
            let ext_seq16 = (self.seq >> 16) as u16;
            let anc_count = anc_count.min(u8::MAX as u16) as u8;
            let mut wire_payload = wire::rfc8331_packet(
                self.params.payload_type,
                self.params.ssrc,
                seq16,
                marker,
                self.rtp_timestamp,
                ext_seq16,
                anc_count,
                false,
                &payload,
            );
            wire_payload.extend_from_slice(&payload);

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
            if self.ring.push(pkt).is_err() {
                return TaskletResult::HasPending;
            }
            produced += 1;
        }

        self.pool.mark_returned(self.frame_idx);
        self.state = BuilderState::WaitFrame;
        self.stats.frames_sent += 1;
        TaskletResult::HasPending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_params() -> St40Params {
        St40Params { ssrc: 1, payload_type: 100, max_payload: 64, split_by_anc_packet: false, frame_time_ns: 16_666_667 }
    }

    #[test]
    fn split_mode_emits_one_payload_per_anc_packet() {
        let ancs = vec![
            AncPacket { line_number: 10, horizontal_offset: 0, udw: vec![1; 8] },
            AncPacket { line_number: 10, horizontal_offset: 8, udw: vec![2; 8] },
        ];
        let mut params = session_params();
        params.split_by_anc_packet = true;
        let session = St40Session {
            params,
            clock: unreachable_clock(),
            callbacks: unreachable_callbacks(),
            pool: crate::frame::FramePool::new_owned(1, 16, Arc::new(|_| {})),
            ring: PacketRing::new(16),
            cursor: PacingCursor::default(),
            state: BuilderState::WaitFrame,
            frame_idx: 0,
            seq: 0,
            rtp_timestamp: 0,
            bulk: 8,
            stats: BuildStats::default(),
        };
        let packed = session.pack(ancs);
        assert_eq!(packed.len(), 2);
        assert!(packed.iter().all(|(_, count)| *count == 1));
    }

    #[test]
    fn bin_pack_mode_merges_small_anc_packets() {
        let ancs = vec![
            AncPacket { line_number: 10, horizontal_offset: 0, udw: vec![1; 8] },
            AncPacket { line_number: 10, horizontal_offset: 8, udw: vec![2; 8] },
        ];
        let session = St40Session {
            params: session_params(),
            clock: unreachable_clock(),
            callbacks: unreachable_callbacks(),
            pool: crate::frame::FramePool::new_owned(1, 16, Arc::new(|_| {})),
            ring: PacketRing::new(16),
            cursor: PacingCursor::default(),
            state: BuilderState::WaitFrame,
            frame_idx: 0,
            seq: 0,
            rtp_timestamp: 0,
            bulk: 8,
            stats: BuildStats::default(),
        };
        let packed = session.pack(ancs);
        assert_eq!(packed.len(), 1);
        assert_eq!(packed[0].0.len(), 16);
        assert_eq!(packed[0].1, 2);
    }

    #[test]
    fn decode_ancs_reads_records_until_truncated() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&3u16.to_le_bytes());
        buf.extend_from_slice(&[1, 2, 3]);
        buf.extend_from_slice(&20u16.to_le_bytes());
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&[9, 9]);
        buf.extend_from_slice(&[0xff; 2]); // trailing garbage, too short for a header

        let ancs = St40Session::decode_ancs(&buf);
        assert_eq!(ancs.len(), 2);
        assert_eq!(ancs[0].line_number, 10);
        assert_eq!(ancs[0].udw, vec![1, 2, 3]);
        assert_eq!(ancs[1].horizontal_offset, 4);
        assert_eq!(ancs[1].udw, vec![9, 9]);
    }

    #[test]
    fn decode_ancs_empty_buffer_yields_no_packets() {
        assert!(St40Session::decode_ancs(&[]).is_empty());
    }

    struct NeverClock;
    impl ClockSource for NeverClock {
        fn ptp_time_ns(&self, _port: u16) -> u64 {
            0
        }
        fn tsc_ns(&self) -> u64 {
            0
        }
    }

    struct NeverCallbacks;
    impl SessionCallbacks for NeverCallbacks {
        fn get_next_frame(&self) -> crate::error::CoreResult<Option<(u32, crate::collab::FrameMeta)>> {
            Ok(None)
        }
        fn notify_frame_done(&self, _idx: u32) {}
        fn notify_frame_late(&self, _late_by_epochs: u64) {}
        fn notify_rtp_done(&self) {}
        fn notify_event(&self, _event: crate::collab::SessionEvent) {}
    }

    fn unreachable_clock() -> Arc<dyn ClockSource> {
        Arc::new(NeverClock)
    }

    fn unreachable_callbacks() -> Arc<dyn SessionCallbacks> {
        Arc::new(NeverCallbacks)
    }
}

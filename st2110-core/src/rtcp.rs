//! RTCP/NACK retransmission, grounded on
//! `mt_rtcp.h`'s `mt_rtcp_tx`/`mt_rtcp_rx` structs. The RX side
//! (`NackGenerator`) is test/integration scaffolding only: receiving
//! is explicitly out of scope, but a session under test
//! needs something on the other end to emit NACKs for the TX-side
//! retransmit buffer to react to.

use crate::frame::Packet;
use st2110_wire::rtcp::{RtcpFci, RtcpNackHdr, RTCP_PT_NACK};
use std::collections::VecDeque;

pub const DEFAULT_BUFFER_SIZE: usize = 1024;

#[derive(Debug, Default, Copy, Clone)]
pub struct RtcpTxStats {
    pub sent: u64,
    pub retransmit_succ: u64,
    pub retransmit_fail_nobuf: u64,
    pub retransmit_fail_read: u64,
    pub retransmit_fail_obsolete: u64,
    pub retransmit_fail_burst: u64,
    pub nack_received: u64,
}

/// A ring of recently-sent packets indexed by 16-bit RTP sequence
/// number, sized `buffer_size`.
pub struct RtcpTxBuffer {
    ssrc: u32,
    buffer_size: usize,
    entries: VecDeque<(u16, Packet)>,
    last_seq: Option<u16>,
    stats: RtcpTxStats,
}

impl RtcpTxBuffer {
    pub fn new(ssrc: u32, buffer_size: usize) -> Self {
        Self {
            ssrc,
            buffer_size,
            entries: VecDeque::with_capacity(buffer_size),
            last_seq: None,
            stats: RtcpTxStats::default(),
        }
    }

    pub fn stats(&self) -> RtcpTxStats {
        self.stats
    }

    /// Record freshly-sent packets, evicting the oldest once the ring
    /// is full.
    pub fn buffer_sent(&mut self, pkts: &[Packet]) {
        for pkt in pkts {
            let seq = pkt.seq as u16;
            if self.entries.len() >= self.buffer_size {
                self.entries.pop_front();
            }
            self.entries.push_back((seq, pkt.clone()));
            self.last_seq = Some(seq);
            self.stats.sent += 1;
        }
    }

    /// Parse an incoming RTCP PT 204 PDU and resolve retransmissions
    /// via `resend`, which should attempt a burst send of exactly one
    /// packet and report whether it succeeded.
    pub fn handle_rtcp(&mut self, hdr: &RtcpNackHdr, fcis: &[RtcpFci], mut resend: impl FnMut(&Packet) -> bool) {
        if hdr.ptype != RTCP_PT_NACK || hdr.ssrc() != self.ssrc {
            return;
        }
        self.stats.nack_received += 1;

        for fci in fcis {
            for seq in fci.missing_sequences() {
                match self.entries.iter().find(|(s, _)| *s == seq) {
                    None => self.stats.retransmit_fail_nobuf += 1,
                    Some((_, pkt)) => {
                        let pkt = pkt.clone();
                        if resend(&pkt) {
                            self.stats.retransmit_succ += 1;
                        } else {
                            self.stats.retransmit_fail_burst += 1;
                        }
                    }
                }
            }
        }
    }
}

#[derive(Debug, Default, Copy, Clone)]
pub struct NackGeneratorStats {
    pub received: u64,
    pub lost_detected: u64,
    pub nack_sent: u64,
}

/// RX-side NACK generator: tracks a bitmap of recently seen sequence
/// numbers and reports gaps, purely to drive TX-side retransmission
/// tests. Not part of the public collaborator contract.
pub struct NackGenerator {
    window_size: u16,
    last_seq: Option<u16>,
    seen: VecDeque<bool>,
    stats: NackGeneratorStats,
}

impl NackGenerator {
    pub fn new(window_size: u16) -> Self {
        Self {
            window_size,
            last_seq: None,
            seen: VecDeque::with_capacity(window_size as usize),
            stats: NackGeneratorStats::default(),
        }
    }

    pub fn stats(&self) -> NackGeneratorStats {
        self.stats
    }

    /// Record a received sequence number; returns the FCIs to send if
    /// a gap beyond `seq_skip_window` was just closed.
    pub fn on_packet(&mut self, seq: u16) -> Vec<RtcpFci> {
        self.stats.received += 1;
        let mut fcis = Vec::new();

        if let Some(last) = self.last_seq {
            let expected = last.wrapping_add(1);
            if seq != expected {
                let gap = seq.wrapping_sub(expected);
                if gap > 0 && gap < self.window_size && gap <= 17 {
                    self.stats.lost_detected += gap as u64;
                    self.stats.nack_sent += 1;
                    let start = expected.wrapping_sub(1);
                    let follow: u16 = if gap > 1 { (1u16 << (gap - 1)) - 1 } else { 0 };
                    fcis.push(RtcpFci::new(start, follow));
                }
            }
        }

        self.last_seq = Some(seq);
        if self.seen.len() >= self.window_size as usize {
            self.seen.pop_front();
        }
        self.seen.push_back(true);
        fcis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt(seq: u32) -> Packet {
        let mut p = Packet::pad(0);
        p.seq = seq;
        p
    }

    #[test]
    fn buffer_sent_evicts_oldest_past_capacity() {
        let mut buf = RtcpTxBuffer::new(1, 2);
        buf.buffer_sent(&[pkt(1), pkt(2), pkt(3)]);
        assert_eq!(buf.entries.len(), 2);
        assert_eq!(buf.entries.front().unwrap().0, 2);
    }

    #[test]
    fn handle_rtcp_retransmits_buffered_and_counts_nobuf() {
        let mut buf = RtcpTxBuffer::new(42, 16);
        buf.buffer_sent(&[pkt(10), pkt(11)]);
        let hdr = RtcpNackHdr::new(42);
        let fci = RtcpFci::new(9, 3); // misses 10,11,12 -> 12 not buffered
        let mut resent = Vec::new();
        buf.handle_rtcp(&hdr, &[fci], |p| {
            resent.push(p.seq);
            true
        });
        assert_eq!(buf.stats().retransmit_succ, 2);
        assert_eq!(buf.stats().retransmit_fail_nobuf, 1);
        assert_eq!(buf.stats().nack_received, 1);
    }

    #[test]
    fn wrong_ssrc_is_ignored() {
        let mut buf = RtcpTxBuffer::new(1, 16);
        buf.buffer_sent(&[pkt(1)]);
        let hdr = RtcpNackHdr::new(999);
        buf.handle_rtcp(&hdr, &[RtcpFci::new(1, 0)], |_| true);
        assert_eq!(buf.stats().nack_received, 0);
    }

    #[test]
    fn nack_generator_detects_a_single_gap() {
        let mut gen = NackGenerator::new(256);
        gen.on_packet(1);
        let fcis = gen.on_packet(3); // missed seq 2
        assert_eq!(fcis.len(), 1);
        assert_eq!(gen.stats().lost_detected, 1);
    }

    #[test]
    fn nack_generator_no_gap_on_contiguous_sequence() {
        let mut gen = NackGenerator::new(256);
        gen.on_packet(1);
        let fcis = gen.on_packet(2);
        assert!(fcis.is_empty());
    }
}

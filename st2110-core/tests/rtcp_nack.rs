//! RX-side gap detection (`NackGenerator`, test scaffolding) feeding the
//! TX-side retransmit buffer (`RtcpTxBuffer`) across the wire-format
//! boundary, proving the two sides agree on FCI bitmask semantics.

use st2110_core::frame::Packet;
use st2110_core::rtcp::{NackGenerator, RtcpTxBuffer};
use st2110_wire::rtcp::RtcpNackHdr;

fn pkt(seq: u32) -> Packet {
    let mut p = Packet::pad(0);
    p.seq = seq;
    p
}

#[test]
fn a_dropped_packet_triggers_exactly_one_successful_retransmit() {
    let ssrc = 99;
    let mut tx = RtcpTxBuffer::new(ssrc, 64);
    let mut rx = NackGenerator::new(256);

    // TX transmits and buffers 0..=5, but the network drops seq 3 in transit.
    let sent: Vec<Packet> = (0..=5u32).map(pkt).collect();
    tx.buffer_sent(&sent);

    let received: Vec<&Packet> = sent.iter().filter(|p| p.seq != 3).collect();
    let mut fcis = Vec::new();
    for p in &received {
        fcis.extend(rx.on_packet(p.seq as u16));
    }
    assert_eq!(fcis.len(), 1);
    assert_eq!(rx.stats().lost_detected, 1);

    let hdr = RtcpNackHdr::new(ssrc);
    let mut resent_seqs = Vec::new();
    tx.handle_rtcp(&hdr, &fcis, |p| {
        resent_seqs.push(p.seq);
        true
    });

    assert_eq!(resent_seqs, vec![3]);
    assert_eq!(tx.stats().retransmit_succ, 1);
    assert_eq!(tx.stats().retransmit_fail_nobuf, 0);
}

//! Wire-header assembly: turns the per-packet RTP fields each builder
//! already tracks into the serialized bytes prepended to the payload
//! before it reaches the TX ring. One function per RFC, mirroring the
//! header variants in `st2110_wire::rtp`.

use st2110_wire::{Rfc3550RtpHdr, Rfc4175RtpHdr, Rfc4175Srd, Rfc8331RtpHdr, RtpBaseHdr, SRD_BIT_CONTINUATION};

/// One sample-row segment a packet covers; `rfc4175_packet` emits the
/// first inline in the RTP header and the rest as trailing `Rfc4175Srd`
/// continuation sub-headers (the BPM "EXTRA" headers).
#[derive(Debug, Copy, Clone)]
pub struct RowSpan {
    pub row_number: u16,
    pub row_offset: u16,
    pub length: u16,
}

/// Split a byte range `[start, end)` of a `line_size`-bytes-per-row
/// buffer into the `RowSpan`s it touches. Yields one span for ranges
/// that stay within a single row, several for a packet that straddles
/// a row boundary (BPM/GPM packing).
pub fn row_spans_for_range(line_size: u32, start: u32, end: u32) -> Vec<RowSpan> {
    if line_size == 0 || end <= start {
        return Vec::new();
    }
    let mut spans = Vec::new();
    let mut pos = start;
    while pos < end {
        let row_number = (pos / line_size) as u16;
        let row_start = (pos / line_size) * line_size;
        let row_end = (row_start + line_size).min(end);
        spans.push(RowSpan {
            row_number,
            row_offset: (pos - row_start) as u16,
            length: (row_end - pos) as u16,
        });
        pos = row_end;
    }
    spans
}

fn base_hdr(payload_type: u8, ssrc: u32, seq: u16, marker: bool, timestamp: u32) -> RtpBaseHdr {
    let mut base = RtpBaseHdr::new(payload_type, ssrc);
    base.set_marker(marker);
    base.set_seq(seq);
    base.set_timestamp(timestamp);
    base
}

/// Serialize one RFC 4175 (ST20/22) packet: base RTP header, extended
/// sequence number, the first row's SRD inline, any extra rows as
/// continuation sub-headers, then the payload bytes.
#[allow(clippy::too_many_arguments)]
pub fn rfc4175_packet(
    payload_type: u8,
    ssrc: u32,
    seq: u16,
    marker: bool,
    timestamp: u32,
    ext_seq_number: u16,
    second_field: bool,
    rows: &[RowSpan],
    payload: &[u8],
) -> Vec<u8> {
    debug_assert!(!rows.is_empty());
    let base = base_hdr(payload_type, ssrc, seq, marker, timestamp);
    let first = rows[0];

    let mut row_offset = first.row_offset;
    if rows.len() > 1 {
        row_offset |= SRD_BIT_CONTINUATION;
    }
    let first_srd = Rfc4175Srd::new(first.length, first.row_number, row_offset, second_field);

    let hdr = Rfc4175RtpHdr {
        base,
        ext_seq_number: ext_seq_number.to_be_bytes(),
        row_length: first_srd.length,
        row_number: first_srd.row_number,
        row_offset: first_srd.row_offset,
    };

    let mut out = bytemuck::bytes_of(&hdr).to_vec();
    for (i, row) in rows.iter().enumerate().skip(1) {
        let more = i + 1 < rows.len();
        let mut srd = Rfc4175Srd::new(row.length, row.row_number, row.row_offset, second_field);
        srd.set_continuation(more);
        out.extend_from_slice(bytemuck::bytes_of(&srd));
    }
    out.extend_from_slice(payload);
    out
}

/// Serialize an out-of-band user-metadata packet (RFC 4175 header with
/// `USER_META_MARKER` set on `row_length`, carrying `meta` as the
/// payload instead of sample-row data).
pub fn rfc4175_user_meta_packet(payload_type: u8, ssrc: u32, seq: u16, timestamp: u32, meta: &[u8]) -> Vec<u8> {
    let base = base_hdr(payload_type, ssrc, seq, false, timestamp);
    let hdr = Rfc4175RtpHdr {
        base,
        ext_seq_number: [0; 2],
        row_length: (st2110_wire::USER_META_MARKER | meta.len() as u16).to_be_bytes(),
        row_number: [0; 2],
        row_offset: [0; 2],
    };
    let mut out = bytemuck::bytes_of(&hdr).to_vec();
    out.extend_from_slice(meta);
    out
}

/// Serialize one RFC 3550 (ST30 PCM audio) packet: just the 12-byte
/// base header followed by the payload.
pub fn rfc3550_packet(payload_type: u8, ssrc: u32, seq: u16, marker: bool, timestamp: u32, payload: &[u8]) -> Vec<u8> {
    let hdr = Rfc3550RtpHdr { base: base_hdr(payload_type, ssrc, seq, marker, timestamp) };
    let mut out = bytemuck::bytes_of(&hdr).to_vec();
    out.extend_from_slice(payload);
    out
}

/// Serialize one RFC 8331 (ST40 ancillary / ST41 fast metadata) packet:
/// base header, extended sequence number, ANC_Count and F bits.
#[allow(clippy::too_many_arguments)]
pub fn rfc8331_packet(
    payload_type: u8,
    ssrc: u32,
    seq: u16,
    marker: bool,
    timestamp: u32,
    ext_seq_number: u16,
    anc_count: u8,
    second_field: bool,
    payload: &[u8],
) -> Vec<u8> {
    let hdr = Rfc8331RtpHdr {
        base: base_hdr(payload_type, ssrc, seq, marker, timestamp),
        ext_seq_number: ext_seq_number.to_be_bytes(),
        anc_count,
        f_reserved: if second_field { 0b1000_0000 } else { 0 },
        _pad: [0; 4],
    };
    bytemuck::bytes_of(&hdr).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_spans_stay_single_within_one_row() {
        let spans = row_spans_for_range(1200, 0, 1200);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].row_number, 0);
        assert_eq!(spans[0].length, 1200);
    }

    #[test]
    fn row_spans_split_across_a_row_boundary() {
        let spans = row_spans_for_range(1200, 1100, 1300);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].row_number, 0);
        assert_eq!(spans[0].row_offset, 1100);
        assert_eq!(spans[0].length, 100);
        assert_eq!(spans[1].row_number, 1);
        assert_eq!(spans[1].row_offset, 0);
        assert_eq!(spans[1].length, 100);
    }

    #[test]
    fn rfc4175_single_row_packet_has_no_continuation_bit() {
        let rows = [RowSpan { row_number: 3, row_offset: 0, length: 1200 }];
        let bytes = rfc4175_packet(96, 1, 0, false, 0, 0, false, &rows, &[0xaa; 4]);
        assert_eq!(bytes.len(), 20 + 4);
        let row_offset = u16::from_be_bytes([bytes[18], bytes[19]]);
        assert_eq!(row_offset & SRD_BIT_CONTINUATION, 0);
    }

    #[test]
    fn rfc4175_multi_row_packet_sets_continuation_and_appends_srds() {
        let rows = [
            RowSpan { row_number: 3, row_offset: 0, length: 600 },
            RowSpan { row_number: 4, row_offset: 0, length: 600 },
        ];
        let bytes = rfc4175_packet(96, 1, 0, true, 0, 0, false, &rows, &[0xaa; 8]);
        // base header (20) + one extra SRD (6) + payload (8)
        assert_eq!(bytes.len(), 20 + 6 + 8);
        let row_offset = u16::from_be_bytes([bytes[18], bytes[19]]);
        assert_ne!(row_offset & SRD_BIT_CONTINUATION, 0);
    }

    #[test]
    fn rfc4175_user_meta_packet_sets_the_marker_bit() {
        let bytes = rfc4175_user_meta_packet(96, 1, 0, 0, &[1, 2, 3]);
        let row_length = u16::from_be_bytes([bytes[12], bytes[13]]);
        assert_ne!(row_length & st2110_wire::USER_META_MARKER, 0);
        assert_eq!(row_length & st2110_wire::USER_META_MAX_REAL_LENGTH, 3);
    }

    #[test]
    fn rfc3550_packet_is_just_the_base_header_plus_payload() {
        let bytes = rfc3550_packet(97, 1, 5, true, 1000, &[1, 2, 3, 4]);
        assert_eq!(bytes.len(), 12 + 4);
    }

    #[test]
    fn rfc8331_packet_carries_anc_count_and_no_payload_bytes_of_its_own() {
        let bytes = rfc8331_packet(100, 1, 0, true, 0, 0, 3, false, &[]);
        assert_eq!(bytes.len(), 20);
        assert_eq!(bytes[14], 3);
    }
}

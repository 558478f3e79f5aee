//! RFC 3550/4175/8331 RTP header variants used by the ST20/22/30/40/41
//! session builders

use bytemuck::{Pod, Zeroable};

pub const RTP_VERSION_2: u8 = 2;

/// The 12-byte RFC 3550 base RTP header, common to every media kind.
#[repr(C, packed)]
#[derive(Copy, Clone, Pod, Zeroable, Debug, Default)]
pub struct RtpBaseHdr {
    /// bits: version(2) padding(1) extension(1) cc(4)
    pub vpxcc: u8,
    /// bits: marker(1) payload_type(7)
    pub m_pt: u8,
    pub seq_number: [u8; 2],
    pub timestamp: [u8; 4],
    pub ssrc: [u8; 4],
}

impl RtpBaseHdr {
    pub fn new(payload_type: u8, ssrc: u32) -> Self {
        Self {
            vpxcc: RTP_VERSION_2 << 6,
            m_pt: payload_type & 0x7f,
            seq_number: [0; 2],
            timestamp: [0; 4],
            ssrc: ssrc.to_be_bytes(),
        }
    }

    pub fn set_marker(&mut self, marker: bool) {
        if marker {
            self.m_pt |= 0x80;
        } else {
            self.m_pt &= 0x7f;
        }
    }

    pub fn set_seq(&mut self, seq: u16) {
        self.seq_number = seq.to_be_bytes();
    }

    pub fn set_timestamp(&mut self, ts: u32) {
        self.timestamp = ts.to_be_bytes();
    }
}

/// RFC 4175 header (ST20): base RTP + extended sequence number + the
/// first sample-row-data sub-header, 20 bytes total.
#[repr(C, packed)]
#[derive(Copy, Clone, Pod, Zeroable, Debug, Default)]
pub struct Rfc4175RtpHdr {
    pub base: RtpBaseHdr,
    pub ext_seq_number: [u8; 2],
    pub row_length: [u8; 2],
    pub row_number: [u8; 2],
    pub row_offset: [u8; 2],
}

/// RFC 3550 header (ST30 PCM audio): just the 12-byte base.
#[repr(C, packed)]
#[derive(Copy, Clone, Pod, Zeroable, Debug, Default)]
pub struct Rfc3550RtpHdr {
    pub base: RtpBaseHdr,
}

/// RFC 8331 header (ST40 ancillary / ST41 fast metadata): base RTP +
/// extended sequence number + ANC_Count/F bits, padded to 20 bytes to
/// match the RFC 4175 header size the pacer budgets for.
#[repr(C, packed)]
#[derive(Copy, Clone, Pod, Zeroable, Debug, Default)]
pub struct Rfc8331RtpHdr {
    pub base: RtpBaseHdr,
    pub ext_seq_number: [u8; 2],
    /// ANC_Count (8 bits)
    pub anc_count: u8,
    /// bits: F(2) reserved(6)
    pub f_reserved: u8,
    pub _pad: [u8; 4],
}

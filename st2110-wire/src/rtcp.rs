//! RFC 4585 Generic NACK feedback (PT 204), mirroring
//! `mt_rtcp.h`'s `mt_rtcp_hdr`/`mt_rtcp_fci`.

use bytemuck::{Pod, Zeroable};

pub const RTCP_PT_NACK: u8 = 204;
pub const RTCP_MAX_FCIS: usize = 256;
pub const RTCP_MAX_NAME_LEN: usize = 24;

/// One Feedback Control Information entry: `start` is the first missing
/// sequence number, `follow` is a bitmask of the next 16 sequence
/// numbers also missing (RFC 4585 Generic NACK).
#[repr(C, packed)]
#[derive(Copy, Clone, Pod, Zeroable, Debug, Default)]
pub struct RtcpFci {
    pub start: [u8; 2],
    pub follow: [u8; 2],
}

impl RtcpFci {
    pub fn new(start: u16, follow: u16) -> Self {
        Self {
            start: start.to_be_bytes(),
            follow: follow.to_be_bytes(),
        }
    }

    pub fn start(&self) -> u16 {
        u16::from_be_bytes(self.start)
    }

    pub fn follow(&self) -> u16 {
        u16::from_be_bytes(self.follow)
    }

    /// Sequence numbers named by this FCI: `start+1 ..= start+1+follow_bits`
    /// for every set bit in `follow`
    pub fn missing_sequences(&self) -> Vec<u16> {
        let start = self.start();
        let follow = self.follow();
        let mut seqs = vec![start.wrapping_add(1)];
        for bit in 0..16u16 {
            if follow & (1 << bit) != 0 {
                seqs.push(start.wrapping_add(2 + bit));
            }
        }
        seqs
    }
}

/// 4-byte RTCP header, followed by a run of `RtcpFci` entries
/// (`len` counts them, max `RTCP_MAX_FCIS`).
#[repr(C, packed)]
#[derive(Copy, Clone, Pod, Zeroable, Debug, Default)]
pub struct RtcpNackHdr {
    pub flags: u8,
    pub ptype: u8,
    pub len: [u8; 2],
    pub ssrc: [u8; 4],
    pub name: [u8; 4],
}

impl RtcpNackHdr {
    pub fn new(ssrc: u32) -> Self {
        Self {
            flags: 0x80 | 0x01, // version 2, FMT=1 (Generic NACK)
            ptype: RTCP_PT_NACK,
            len: [0; 2],
            ssrc: ssrc.to_be_bytes(),
            name: *b"ST2X",
        }
    }

    pub fn ssrc(&self) -> u32 {
        u32::from_be_bytes(self.ssrc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fci_decodes_start_and_follow_bits() {
        let fci = RtcpFci::new(500, 0b101);
        let seqs = fci.missing_sequences();
        assert_eq!(seqs, vec![501, 502, 504]);
    }

    #[test]
    fn fci_wraps_16_bit_sequence() {
        let fci = RtcpFci::new(u16::MAX, 0);
        assert_eq!(fci.missing_sequences(), vec![0]);
    }
}

//! RFC 4175 sample-row-data sub-headers

use bytemuck::{Pod, Zeroable};

/// Set on `row_number` when the packet carries the second field of an
/// interlaced frame.
pub const SRD_BIT_FIELD: u16 = 0x8000;

/// Set on `row_offset` when another SRD sub-header follows in the same
/// packet (BPM "EXTRA" packets).
pub const SRD_BIT_CONTINUATION: u16 = 0x8000;

/// An additional SRD header appended after the first (embedded in
/// `Rfc4175RtpHdr`) when a packet spans more than one sample row.
#[repr(C, packed)]
#[derive(Copy, Clone, Pod, Zeroable, Debug, Default)]
pub struct Rfc4175Srd {
    pub length: [u8; 2],
    pub row_number: [u8; 2],
    pub row_offset: [u8; 2],
}

impl Rfc4175Srd {
    pub fn new(length: u16, row_number: u16, row_offset: u16, second_field: bool) -> Self {
        let row_number = if second_field {
            row_number | SRD_BIT_FIELD
        } else {
            row_number
        };
        Self {
            length: length.to_be_bytes(),
            row_number: row_number.to_be_bytes(),
            row_offset: row_offset.to_be_bytes(),
        }
    }

    pub fn set_continuation(&mut self, more: bool) {
        let mut offset = u16::from_be_bytes(self.row_offset);
        if more {
            offset |= SRD_BIT_CONTINUATION;
        } else {
            offset &= !SRD_BIT_CONTINUATION;
        }
        self.row_offset = offset.to_be_bytes();
    }
}

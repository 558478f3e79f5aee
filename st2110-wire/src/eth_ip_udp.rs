//! L2/L3/L4 header templates cached per session

use bytemuck::{Pod, Zeroable};

#[repr(C, packed)]
#[derive(Copy, Clone, Pod, Zeroable, Debug, Default)]
pub struct EthHdr {
    pub dst_mac: [u8; 6],
    pub src_mac: [u8; 6],
    pub ethertype: [u8; 2],
}

#[repr(C, packed)]
#[derive(Copy, Clone, Pod, Zeroable, Debug, Default)]
pub struct Ipv4Hdr {
    pub version_ihl: u8,
    pub dscp_ecn: u8,
    pub total_len: [u8; 2],
    pub id: [u8; 2],
    pub flags_frag_off: [u8; 2],
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: [u8; 2],
    pub src_ip: [u8; 4],
    pub dst_ip: [u8; 4],
}

impl Ipv4Hdr {
    /// Recompute the header checksum in place (used when HW offload is
    /// unavailable step 5).
    pub fn fix_checksum(&mut self) {
        self.checksum = [0, 0];
        let bytes = bytemuck::bytes_of(self);
        let mut sum: u32 = 0;
        for chunk in bytes.chunks(2) {
            let word = u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
            sum += word;
        }
        while sum >> 16 != 0 {
            sum = (sum & 0xffff) + (sum >> 16);
        }
        self.checksum = (!(sum as u16)).to_be_bytes();
    }
}

#[repr(C, packed)]
#[derive(Copy, Clone, Pod, Zeroable, Debug, Default)]
pub struct UdpHdr {
    pub src_port: [u8; 2],
    pub dst_port: [u8; 2],
    pub len: [u8; 2],
    pub checksum: [u8; 2],
}

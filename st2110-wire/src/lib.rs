//! Wire-format structs for ST 2110-20/22/30/40/41 and RFC 4585 RTCP NACK.
//!
//! Every struct here is `#[repr(C, packed)]` and derives `bytemuck::Pod` so
//! it can be written directly into a packet buffer with no intermediate
//! serialisation step, the same way `linnix_ai_ebpf_common::ProcessEvent`
//! is written directly into a ring slot.

pub mod eth_ip_udp;
pub mod rtcp;
pub mod rtp;
pub mod srd;

pub use eth_ip_udp::{EthHdr, Ipv4Hdr, UdpHdr};
pub use rtcp::{RtcpFci, RtcpNackHdr, RTCP_MAX_FCIS, RTCP_PT_NACK};
pub use rtp::{Rfc3550RtpHdr, Rfc4175RtpHdr, Rfc8331RtpHdr, RtpBaseHdr, RTP_VERSION_2};
pub use srd::{Rfc4175Srd, SRD_BIT_CONTINUATION, SRD_BIT_FIELD};

/// `row_length | USER_META_MARKER` flags an out-of-band user-metadata
/// packet (open question: real line
/// lengths never set the top bit, so overlap is impossible by
/// construction as long as callers reject lengths >= 32768).
pub const USER_META_MARKER: u16 = 0x8000;
pub const USER_META_MAX_REAL_LENGTH: u16 = 0x7fff;

/// Standard UDP payload ceiling used throughout the pacing/packing maths.
pub const ST_PKT_MAX_UDP_BYTES: usize = 1460;

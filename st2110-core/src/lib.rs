//! Tasklet scheduler, transmit pacing engine and redundant TX pipeline
//! for SMPTE ST 2110 senders.
//!
//! NIC bring-up, ARP, PTP discipline, RX reassembly and control-plane
//! signalling are out of scope; [`collab`] is the seam the host
//! application implements to supply them.

pub mod collab;
pub mod config;
pub mod error;
pub mod fmt;
pub mod frame;
pub mod lcore;
pub mod manager;
pub mod pacing;
pub mod rtcp;
pub mod scheduler;
pub mod session;
pub mod stats;
pub mod transmitter;
pub mod txqueue;

pub use error::{CoreError, CoreResult};

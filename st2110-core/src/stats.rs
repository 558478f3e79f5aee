//! Per-session statistics (`get_session_stats` /
//! `reset_session_stats`). Aggregated by the session manager on a
//! timer; kept as plain counters rather than atomics
//! since each slot is only ever touched under its own lock
//! — single-reader per tick.

use crate::rtcp::RtcpTxStats;
use crate::session::BuildStats;

#[derive(Debug, Default, Copy, Clone)]
pub struct SessionStats {
    pub build: BuildStats,
    pub rtcp: RtcpTxStats,
    pub pkts_sent: u64,
    pub pkts_dropped: u64,
}

impl SessionStats {
    pub fn reset(&mut self) {
        *self = SessionStats::default();
    }
}

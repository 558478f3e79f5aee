//! Per-session pacing state: epoch computation, VRX budget, and the
//! RTP-timestamp cursor the session builder reads every frame. The
//! closest C analogue is `mt_sch.c`'s tick-driven cursor advance,
//! reused here for the `SleepGate`/cursor-advance shape in
//! `crate::scheduler`.

pub mod servo;
pub mod training;

use crate::fmt::FpsTiming;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PacingTasklet {
    Rl,
    Tsc,
    TscNarrow,
    Ptp,
    Be,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ActiveRatio {
    /// 1080/1125, progressive HD and higher.
    Hd,
    /// 487/525, NTSC interlace.
    Ntsc480i,
    /// 576/625, PAL interlace.
    Pal576i,
}

impl ActiveRatio {
    pub fn ratio(self) -> (u32, u32) {
        match self {
            ActiveRatio::Hd => (1080, 1125),
            ActiveRatio::Ntsc480i => (487, 525),
            ActiveRatio::Pal576i => (576, 625),
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct FrameTiming {
    pub frame_time_ns: f64,
    pub trs_ns: f64,
    pub tr_offset_ns: f64,
}

impl FrameTiming {
    pub fn compute(fps: FpsTiming, active: ActiveRatio, total_packets_per_frame: u32) -> Self {
        let frame_time_ns = (fps.den as f64 / fps.mul as f64) * 1_000_000_000.0;
        let (num, den) = active.ratio();
        let active_ratio = num as f64 / den as f64;
        let trs_ns = frame_time_ns * active_ratio / total_packets_per_frame as f64;

        let tr_offset_ns = match active {
            ActiveRatio::Hd => frame_time_ns * 43.0 / 1125.0,
            ActiveRatio::Ntsc480i => frame_time_ns * 20.0 / 525.0 * 2.0,
            ActiveRatio::Pal576i => frame_time_ns * 26.0 / 625.0 * 2.0,
        };

        Self { frame_time_ns, trs_ns, tr_offset_ns }
    }
}

/// VRX (virtual-receive-buffer) budget
#[derive(Debug, Copy, Clone)]
pub struct VrxBudget {
    pub narrow: u32,
    pub wide: u32,
}

impl VrxBudget {
    pub fn compute(total_packets_per_frame: u32, frame_time_s: f64, rl_mode: bool) -> Self {
        let narrow = (total_packets_per_frame as f64 / (27_000.0 * frame_time_s)).max(8.0) as u32;
        let wide = (total_packets_per_frame as f64 / (300.0 * frame_time_s)).max(720.0) as u32;
        let narrow = if rl_mode { narrow.saturating_sub(4) } else { narrow };
        Self { narrow, wide }
    }
}

/// Running per-session cursor state, advanced every frame by
/// `compute_epoch` and every packet by `advance_packet`.
#[derive(Debug, Default, Copy, Clone)]
pub struct PacingCursor {
    pub cur_epoch: u64,
    pub tsc_cursor: u64,
    pub tsc_frame_start: u64,
    pub ptp_cursor: u64,
}

pub struct EpochResult {
    pub epoch: u64,
    pub start_tai: u64,
    pub time_to_tx_ns: u64,
    pub late_by_epochs: Option<u64>,
    pub drop_onward: bool,
    /// `required_tai` resolved to an epoch already behind the current
    /// TAI epoch (`CoreError::ErrUserTimestamp`).
    pub user_timestamp_past: bool,
}

/// the epoch pseudocode, transcribed near-verbatim into typed
/// Rust (no ceil-ish/round fuzz: integer epoch arithmetic on
/// nanosecond cursors).
#[allow(clippy::too_many_arguments)]
pub fn compute_epoch(
    cursor: &mut PacingCursor,
    cur_tai: u64,
    cur_tsc: u64,
    frame_time_ns: u64,
    tr_offset_ns: u64,
    vrx: u32,
    trs_ns: u64,
    required_tai: Option<u64>,
    exact_user_pacing: bool,
    max_onward: u64,
) -> EpochResult {
    let next_free = cursor.cur_epoch + 1;
    let mut late_by_epochs = None;
    let mut drop_onward = false;
    let mut user_timestamp_past = false;

    let epoch = match required_tai {
        None => {
            let mut epoch = cur_tai.div_ceil(frame_time_ns);
            if epoch <= next_free {
                let onward = next_free - epoch;
                if onward > max_onward {
                    drop_onward = true;
                }
                epoch = next_free;
            } else {
                late_by_epochs = Some(epoch - next_free);
            }
            epoch
        }
        Some(required) => {
            let epoch = (required as f64 / frame_time_ns as f64).round() as u64;
            let cur_tai_epoch = cur_tai / frame_time_ns;
            if epoch < cur_tai_epoch {
                user_timestamp_past = true;
            }
            epoch
        }
    };

    let start_tai = if exact_user_pacing {
        required_tai.unwrap_or(cur_tai)
    } else {
        epoch * frame_time_ns + tr_offset_ns - vrx as u64 * trs_ns
    };

    let time_to_tx_ns = start_tai.saturating_sub(cur_tai);

    cursor.tsc_cursor = cur_tsc + time_to_tx_ns;
    cursor.tsc_frame_start = cursor.tsc_cursor;
    cursor.ptp_cursor = start_tai;
    cursor.cur_epoch = epoch;

    EpochResult { epoch, start_tai, time_to_tx_ns, late_by_epochs, drop_onward, user_timestamp_past }
}

/// Advance the cursor by one packet's worth of TRS ("Per
/// packet forward").
pub fn advance_packet(cursor: &mut PacingCursor, trs_ns: u64) {
    cursor.tsc_cursor += trs_ns;
    cursor.ptp_cursor += trs_ns;
}

/// Whether packet `packet_index` (0-based within the frame) should be
/// followed by a padding packet ("A padding packet is
/// inserted whenever `(packet_index + pad_interval/2) mod pad_interval
/// < bulk`").
pub fn needs_pad(packet_index: u32, pad_interval: f64, bulk: u32) -> bool {
    let shifted = packet_index as f64 + pad_interval / 2.0;
    shifted.rem_euclid(pad_interval) < bulk as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_timing_hd_matches_known_1080p59_values() {
        let fps = crate::fmt::Fps::P59_94.timing();
        let t = FrameTiming::compute(fps, ActiveRatio::Hd, 4320);
        assert!(t.frame_time_ns > 16_000_000.0 && t.frame_time_ns < 16_800_000.0);
        assert!(t.tr_offset_ns > 0.0);
        assert!(t.trs_ns > 0.0);
    }

    #[test]
    fn vrx_budget_respects_floors() {
        let v = VrxBudget::compute(100, 0.040, false);
        assert_eq!(v.narrow, 8);
        assert_eq!(v.wide, 720);
    }

    #[test]
    fn rl_mode_subtracts_four_from_narrow() {
        let v = VrxBudget::compute(2_000_000, 0.040, true);
        let v_norm = VrxBudget::compute(2_000_000, 0.040, false);
        assert_eq!(v.narrow, v_norm.narrow - 4);
    }

    #[test]
    fn epoch_advances_to_next_free_when_behind() {
        let mut cursor = PacingCursor::default();
        cursor.cur_epoch = 5;
        let result = compute_epoch(
            &mut cursor,
            100,
            1_000,
            1_000_000,
            40_000,
            8,
            200,
            None,
            false,
            1000,
        );
        assert_eq!(result.epoch, 6);
        assert_eq!(cursor.cur_epoch, 6);
    }

    #[test]
    fn epoch_reports_late_when_ahead_of_next_free() {
        let mut cursor = PacingCursor::default();
        cursor.cur_epoch = 0;
        let result = compute_epoch(
            &mut cursor,
            10_000_000,
            1_000,
            1_000_000,
            40_000,
            8,
            200,
            None,
            false,
            1000,
        );
        assert!(result.late_by_epochs.is_some());
    }

    #[test]
    fn required_tai_in_the_past_is_flagged() {
        let mut cursor = PacingCursor::default();
        let result = compute_epoch(
            &mut cursor,
            10_000_000,
            1_000,
            1_000_000,
            40_000,
            8,
            200,
            Some(1_000), // resolves to an epoch well behind cur_tai's
            false,
            1000,
        );
        assert!(result.user_timestamp_past);
    }

    #[test]
    fn required_tai_in_the_future_is_not_flagged() {
        let mut cursor = PacingCursor::default();
        let result = compute_epoch(
            &mut cursor,
            1_000,
            1_000,
            1_000_000,
            40_000,
            8,
            200,
            Some(10_000_000),
            false,
            1000,
        );
        assert!(!result.user_timestamp_past);
    }

    #[test]
    fn needs_pad_fires_within_bulk_window() {
        assert!(!needs_pad(0, 10.0, 4)); // shifted = 5.0, 5.0 % 10 = 5.0, not < 4
        assert!(needs_pad(5, 10.0, 4)); // shifted = 10.0, % 10 = 0.0 < 4
    }
}

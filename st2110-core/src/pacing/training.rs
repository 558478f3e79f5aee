//! Pad-interval training: a one-time per-session,
//! per-port measurement so the HW send rate tracks the algebraic line
//! rate exactly, memoised per `(port, bps)`.

use std::collections::HashMap;

/// One flood-and-measure round. `sample_pkts_per_frame` is supplied by
/// the caller (normally the TX queue driver sending
/// `total_pkts_per_frame` back-to-back and counting how many the HW
/// actually drained in one frame period); kept pure here so it is
/// testable without a real queue.
pub struct PadIntervalTrainer {
    total_pkts_per_frame: u32,
    cache: HashMap<(u16, u64), f64>,
}

const TRAINING_FRAMES: usize = 66;
const TRAINING_TRIM_SAMPLES: usize = 60;
const PAD_INTERVAL_FLOOR: f64 = 32.0;
const BPS_RETRAIN_FACTOR: f64 = 1.005;

impl PadIntervalTrainer {
    pub fn new(total_pkts_per_frame: u32) -> Self {
        Self {
            total_pkts_per_frame,
            cache: HashMap::new(),
        }
    }

    pub fn cached(&self, port: u16, bps: u64) -> Option<f64> {
        self.cache.get(&(port, bps)).copied()
    }

    /// Trim the `TRAINING_FRAMES` raw samples to the middle
    /// `TRAINING_TRIM_SAMPLES` (classic trimmed-median sampling) and
    /// average them into one `pkts_per_frame_measured` figure.
    fn trimmed_average(mut samples: Vec<f64>) -> f64 {
        samples.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let drop = (samples.len() - TRAINING_TRIM_SAMPLES) / 2;
        let kept = &samples[drop..samples.len() - drop];
        kept.iter().sum::<f64>() / kept.len() as f64
    }

    /// Run one training pass given a `measure` closure that floods the
    /// queue with `total_pkts_per_frame` packets and returns how many
    /// packets actually drained in that frame period. Retrains with a
    /// raised `bps` when the measured rate undershoots the nominal
    /// rate, mirroring the original's `1.005 * nominal^2 / measured`
    /// retraining step.
    pub fn train(
        &mut self,
        port: u16,
        nominal_bps: u64,
        mut measure: impl FnMut(u64) -> Vec<f64>,
    ) -> f64 {
        if let Some(cached) = self.cached(port, nominal_bps) {
            return cached;
        }

        let mut bps = nominal_bps;
        loop {
            let samples = measure(bps);
            debug_assert_eq!(samples.len(), TRAINING_FRAMES);
            let measured = Self::trimmed_average(samples);
            let total = self.total_pkts_per_frame as f64;

            if measured <= total {
                // Degenerate measurement; retrain at a higher bps.
                bps = (BPS_RETRAIN_FACTOR * (nominal_bps as f64).powi(2) / measured.max(1.0)) as u64;
                continue;
            }

            let pad_interval = total / (measured - total);
            if pad_interval >= PAD_INTERVAL_FLOOR {
                self.cache.insert((port, nominal_bps), pad_interval);
                return pad_interval;
            }

            bps = (BPS_RETRAIN_FACTOR * (nominal_bps as f64).powi(2) / measured) as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trimmed_average_drops_outliers_at_both_ends() {
        let mut samples: Vec<f64> = (0..66).map(|i| i as f64).collect();
        // Outliers at the extremes shouldn't move the trimmed average much.
        samples[0] = -10_000.0;
        samples[65] = 10_000.0;
        let avg = PadIntervalTrainer::trimmed_average(samples);
        assert!(avg > 0.0 && avg < 66.0);
    }

    #[test]
    fn train_caches_result_per_port_and_bps() {
        let mut trainer = PadIntervalTrainer::new(4000);
        let samples = vec![4100.0; TRAINING_FRAMES];
        let pad = trainer.train(0, 1_000_000_000, |_bps| samples.clone());
        assert!(pad >= PAD_INTERVAL_FLOOR);
        assert_eq!(trainer.cached(0, 1_000_000_000), Some(pad));
    }

    #[test]
    fn train_retrains_when_pad_interval_below_floor() {
        let mut trainer = PadIntervalTrainer::new(4000);
        let mut calls = 0;
        let pad = trainer.train(0, 1_000_000_000, |_bps| {
            calls += 1;
            if calls == 1 {
                // total / (measured - total) < 32 => pad_interval below floor
                vec![4050.0; TRAINING_FRAMES]
            } else {
                vec![4200.0; TRAINING_FRAMES]
            }
        });
        assert!(calls >= 2);
        assert!(pad >= PAD_INTERVAL_FLOOR);
    }
}

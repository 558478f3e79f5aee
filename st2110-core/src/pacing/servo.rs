//! PI servo driving a sampled clock offset to a parts-per-billion
//! frequency adjustment, grounded directly on
//! `servo.c`/`servo.h`'s `pi_sample`/`pi_servo_create` state machine.

pub const HWTS_KP: f64 = 0.7;
pub const HWTS_KI: f64 = 0.3;
pub const SWTS_KP: f64 = 0.1;
pub const SWTS_KI: f64 = 0.001;

const NSEC_PER_SEC: f64 = 1_000_000_000.0;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ServoState {
    Unlocked,
    Jump,
    Locked,
}

/// Classic PI servo. `sample` advances the internal step counter the
/// same way the five `switch (s->count)` cases do in the original.
pub struct PiServo {
    offset: [f64; 2],
    local: [f64; 2],
    drift: f64,
    maxppb: f64,
    kp: f64,
    ki: f64,
    max_offset: f64,
    count: u8,
}

impl PiServo {
    /// `fadj` seeds the initial drift estimate (ppb); `sw_ts` selects
    /// the software- vs hardware-timestamped gain pair.
    pub fn new(fadj: f64, max_ppb: f64, sw_ts: bool, max_offset_secs: f64) -> Self {
        let (kp, ki) = if sw_ts { (SWTS_KP, SWTS_KI) } else { (HWTS_KP, HWTS_KI) };
        Self {
            offset: [0.0; 2],
            local: [0.0; 2],
            drift: fadj,
            maxppb: max_ppb,
            kp,
            ki,
            max_offset: if max_offset_secs > 0.0 { max_offset_secs * NSEC_PER_SEC } else { 0.0 },
            count: 0,
        }
    }

    /// Feed one `(offset, local_ts)` sample; returns the ppb
    /// adjustment (zero during the warmup steps) and the servo state.
    pub fn sample(&mut self, offset: f64, local_ts: f64) -> (f64, ServoState) {
        match self.count {
            0 => {
                self.offset[0] = offset;
                self.local[0] = local_ts;
                self.count = 1;
                (0.0, ServoState::Unlocked)
            }
            1 => {
                self.offset[1] = offset;
                self.local[1] = local_ts;
                self.count = 2;
                (0.0, ServoState::Unlocked)
            }
            2 => {
                self.drift += (self.offset[1] - self.offset[0]) / (self.local[1] - self.local[0]);
                self.count = 3;
                (0.0, ServoState::Unlocked)
            }
            3 => {
                self.count = 4;
                (0.0, ServoState::Jump)
            }
            _ => {
                if self.max_offset != 0.0 && self.max_offset < offset.abs() {
                    self.count = 0;
                    return (0.0, ServoState::Unlocked);
                }

                let ki_term = self.ki * offset;
                let mut ppb = self.kp * offset + self.drift + ki_term;
                if ppb < -self.maxppb {
                    ppb = -self.maxppb;
                } else if ppb > self.maxppb {
                    ppb = self.maxppb;
                } else {
                    // Anti-windup: only accumulate drift when unclamped.
                    self.drift += ki_term;
                }
                (ppb, ServoState::Locked)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_two_samples_stay_unlocked_and_seed_drift() {
        let mut servo = PiServo::new(0.0, 512_000.0, false, 0.0);
        let (ppb0, state0) = servo.sample(100.0, 0.0);
        assert_eq!(state0, ServoState::Unlocked);
        assert_eq!(ppb0, 0.0);
        let (_, state1) = servo.sample(200.0, 1.0);
        assert_eq!(state1, ServoState::Unlocked);
    }

    #[test]
    fn fourth_sample_requests_jump_then_fifth_locks() {
        let mut servo = PiServo::new(0.0, 512_000.0, false, 0.0);
        servo.sample(100.0, 0.0);
        servo.sample(200.0, 1.0);
        let (_, state2) = servo.sample(0.0, 2.0); // drift accumulation step
        assert_eq!(state2, ServoState::Unlocked);
        let (_, state3) = servo.sample(0.0, 3.0);
        assert_eq!(state3, ServoState::Jump);
        let (ppb, state4) = servo.sample(50.0, 4.0);
        assert_eq!(state4, ServoState::Locked);
        assert!(ppb.is_finite());
    }

    #[test]
    fn clamped_ppb_does_not_accumulate_drift() {
        let mut servo = PiServo::new(0.0, 10.0, false, 0.0);
        servo.sample(1.0, 0.0);
        servo.sample(1.0, 1.0);
        servo.sample(0.0, 2.0);
        servo.sample(0.0, 3.0);
        let (ppb, _) = servo.sample(1_000_000.0, 4.0);
        assert_eq!(ppb, 10.0); // clamped to +maxppb
    }

    #[test]
    fn offset_beyond_max_resets_to_unlocked() {
        let mut servo = PiServo::new(0.0, 512_000.0, false, 1e-6);
        servo.sample(0.0, 0.0);
        servo.sample(0.0, 1.0);
        servo.sample(0.0, 2.0);
        servo.sample(0.0, 3.0);
        let (ppb, state) = servo.sample(1e9, 4.0); // far beyond max_offset
        assert_eq!(ppb, 0.0);
        assert_eq!(state, ServoState::Unlocked);
    }
}

//! Trapezoidal trajectory generator.
//!
//! One setpoint per cycle, integrated open-loop against the drive's own
//! position controller. The profile only reads the measured position once,
//! at commit, so per-cycle work is bounded and independent of following
//! error.

use axis_common::{MotionError, MotionPhase, MotionResult};
use tracing::debug;

/// Trapezoidal profile state for a single move.
#[derive(Debug, Clone)]
pub struct TrapezoidProfile {
    /// Absolute target, counts.
    target: f64,
    /// Cruise velocity magnitude, counts/s.
    max_velocity: f64,
    /// Acceleration magnitude, counts/s^2.
    acceleration: f64,
    /// +1.0 toward positive counts, -1.0 toward negative. Fixed at commit;
    /// the profile does not plan reversals.
    direction: f64,
    /// Modelled position, counts.
    position: f64,
    /// Modelled velocity, counts/s.
    velocity: f64,
    /// Termination band around the target, counts.
    tolerance: f64,
    phase: MotionPhase,
}

impl TrapezoidProfile {
    /// A profile holding at `position` with no move pending.
    #[must_use]
    pub fn idle_at(position: f64, tolerance: f64) -> Self {
        Self {
            target: position,
            max_velocity: 0.0,
            acceleration: 1.0,
            direction: 1.0,
            position,
            velocity: 0.0,
            tolerance,
            phase: MotionPhase::Idle,
        }
    }

    /// Commit a move from `start` to `target` (both absolute counts).
    /// Speeds and accelerations are magnitudes; direction comes from the
    /// signed distance. A target already inside the tolerance band commits
    /// directly to Idle.
    pub fn commit(
        start: f64,
        target: f64,
        max_velocity: f64,
        acceleration: f64,
        tolerance: f64,
    ) -> MotionResult<Self> {
        if acceleration <= 0.0 || !acceleration.is_finite() {
            return Err(MotionError::InvalidProfile(format!(
                "acceleration must be positive, got {acceleration}"
            )));
        }
        if max_velocity <= 0.0 || !max_velocity.is_finite() {
            return Err(MotionError::InvalidProfile(format!(
                "max velocity must be positive, got {max_velocity}"
            )));
        }

        let distance = target - start;
        if distance.abs() <= tolerance {
            debug!(start, target, "zero-distance move, committing idle");
            return Ok(Self::idle_at(target, tolerance));
        }

        debug!(
            start,
            target,
            max_velocity,
            acceleration,
            "move committed"
        );

        Ok(Self {
            target,
            max_velocity,
            acceleration,
            direction: distance.signum(),
            position: start,
            velocity: 0.0,
            tolerance,
            phase: MotionPhase::Accelerating,
        })
    }

    /// Advance the profile by one cycle of `dt` seconds.
    ///
    /// Phase transitions are evaluated against the braking distance before
    /// the velocity is integrated, so the deceleration ramp starts on the
    /// cycle the remaining distance first dips below it.
    pub fn step(&mut self, dt: f64) -> MotionPhase {
        if self.phase == MotionPhase::Idle {
            self.velocity = 0.0;
            return self.phase;
        }

        let remaining = self.target - self.position;
        let braking = self.velocity * self.velocity / (2.0 * self.acceleration);

        self.phase = match self.phase {
            MotionPhase::Accelerating if remaining.abs() <= braking => MotionPhase::Decelerating,
            MotionPhase::Accelerating if self.velocity.abs() >= self.max_velocity => {
                MotionPhase::Cruising
            }
            MotionPhase::Cruising if remaining.abs() <= braking => MotionPhase::Decelerating,
            phase => phase,
        };

        if self.phase == MotionPhase::Decelerating {
            let crossed = remaining * self.direction <= 0.0;
            if crossed || remaining.abs() <= self.tolerance {
                self.phase = MotionPhase::Idle;
                self.velocity = 0.0;
                self.position = self.target;
                return self.phase;
            }
        }

        match self.phase {
            MotionPhase::Accelerating => {
                self.velocity += self.direction * self.acceleration * dt;
                if self.velocity.abs() > self.max_velocity {
                    self.velocity = self.direction * self.max_velocity;
                }
            }
            MotionPhase::Cruising => {
                self.velocity = self.direction * self.max_velocity;
            }
            MotionPhase::Decelerating => {
                self.velocity -= self.direction * self.acceleration * dt;
                if self.velocity * self.direction < 0.0 {
                    self.velocity = 0.0;
                }
            }
            MotionPhase::Idle => {}
        }

        self.position += self.velocity * dt;
        self.phase
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> MotionPhase {
        self.phase
    }

    /// Modelled position, counts.
    #[must_use]
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Modelled velocity, counts/s.
    #[must_use]
    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    /// Absolute target, counts.
    #[must_use]
    pub fn target(&self) -> f64 {
        self.target
    }

    /// Position setpoint for the output image; rounding toward zero.
    #[must_use]
    pub fn position_setpoint(&self) -> i32 {
        self.position as i32
    }

    /// Velocity setpoint for the output image; rounding toward zero.
    #[must_use]
    pub fn velocity_setpoint(&self) -> i32 {
        self.velocity as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axis_common::units::{dps2_to_counts, dps_to_counts, CYCLE_TIME_S};

    const TOL: f64 = 100.0;

    fn run_to_idle(profile: &mut TrapezoidProfile, max_cycles: usize) -> usize {
        for cycle in 0..max_cycles {
            if profile.step(CYCLE_TIME_S) == MotionPhase::Idle {
                return cycle + 1;
            }
        }
        panic!("profile did not terminate within {max_cycles} cycles");
    }

    #[test]
    fn rejects_degenerate_parameters() {
        assert!(TrapezoidProfile::commit(0.0, 1000.0, 100.0, 0.0, TOL).is_err());
        assert!(TrapezoidProfile::commit(0.0, 1000.0, 100.0, -5.0, TOL).is_err());
        assert!(TrapezoidProfile::commit(0.0, 1000.0, 0.0, 100.0, TOL).is_err());
        assert!(TrapezoidProfile::commit(0.0, 1000.0, -1.0, 100.0, TOL).is_err());
        assert!(TrapezoidProfile::commit(0.0, 1000.0, f64::NAN, 100.0, TOL).is_err());
    }

    #[test]
    fn zero_distance_commits_idle() {
        let profile = TrapezoidProfile::commit(500.0, 500.0, 1000.0, 1000.0, TOL).unwrap();
        assert_eq!(profile.phase(), MotionPhase::Idle);
        assert_eq!(profile.velocity(), 0.0);
    }

    #[test]
    fn within_tolerance_commits_idle() {
        let profile = TrapezoidProfile::commit(500.0, 560.0, 1000.0, 1000.0, TOL).unwrap();
        assert_eq!(profile.phase(), MotionPhase::Idle);
    }

    #[test]
    fn full_revolution_profile_shape() {
        // 360 deg at 180 deg/s, 360 deg/s^2: ramp 0.5 s, cruise 1.5 s,
        // ramp down 0.5 s
        let target = 2_097_152.0;
        let v = dps_to_counts(180.0);
        let a = dps2_to_counts(360.0);
        let mut profile = TrapezoidProfile::commit(0.0, target, v, a, TOL).unwrap();

        let mut saw = Vec::new();
        let mut last = MotionPhase::Idle;
        for _ in 0..3000 {
            let phase = profile.step(CYCLE_TIME_S);
            if phase != last {
                saw.push(phase);
                last = phase;
            }
            if phase == MotionPhase::Idle {
                break;
            }
        }

        assert_eq!(
            saw,
            vec![
                MotionPhase::Accelerating,
                MotionPhase::Cruising,
                MotionPhase::Decelerating,
                MotionPhase::Idle,
            ]
        );
        assert!((profile.position() - target).abs() <= TOL);
        assert_eq!(profile.velocity(), 0.0);
    }

    #[test]
    fn terminates_within_the_analytic_bound() {
        let v = dps_to_counts(180.0);
        let a = dps2_to_counts(360.0);
        let distance = 2_097_152.0;
        let bound = ((2.0 * v / a + distance / v) / CYCLE_TIME_S).ceil() as usize + 1;

        let mut profile = TrapezoidProfile::commit(0.0, distance, v, a, TOL).unwrap();
        let cycles = run_to_idle(&mut profile, bound);
        assert!(cycles <= bound);
    }

    #[test]
    fn reverse_move_is_symmetric() {
        let v = dps_to_counts(90.0);
        let a = dps2_to_counts(360.0);
        let target = -(90.0f64 * 5825.422_222).round();

        let mut forward = TrapezoidProfile::commit(0.0, -target, v, a, TOL).unwrap();
        let mut reverse = TrapezoidProfile::commit(0.0, target, v, a, TOL).unwrap();

        let fw = run_to_idle(&mut forward, 10_000);
        let rv = run_to_idle(&mut reverse, 10_000);
        assert_eq!(fw, rv);
        assert!((forward.position() + reverse.position()).abs() < 1e-6);
        assert!((reverse.position() - target).abs() <= TOL);
    }

    #[test]
    fn short_move_never_cruises() {
        // Distance too short to reach cruise velocity: triangular profile
        let v = dps_to_counts(180.0);
        let a = dps2_to_counts(360.0);
        let target = dps_to_counts(10.0); // well under the ramp distance

        let mut profile = TrapezoidProfile::commit(0.0, target, v, a, TOL).unwrap();
        let mut cruised = false;
        for _ in 0..10_000 {
            match profile.step(CYCLE_TIME_S) {
                MotionPhase::Cruising => cruised = true,
                MotionPhase::Idle => break,
                _ => {}
            }
        }
        assert!(!cruised);
        assert_eq!(profile.phase(), MotionPhase::Idle);
        assert!((profile.position() - target).abs() <= TOL);
    }

    #[test]
    fn velocity_is_clamped_at_cruise() {
        let v = 1000.0;
        let a = 100_000.0;
        let mut profile = TrapezoidProfile::commit(0.0, 1e9, v, a, TOL).unwrap();
        for _ in 0..100 {
            profile.step(CYCLE_TIME_S);
            assert!(profile.velocity().abs() <= v + 1e-9);
        }
    }

    #[test]
    fn setpoint_rounds_toward_zero() {
        let mut profile = TrapezoidProfile::idle_at(0.0, TOL);
        profile.position = 99.99;
        assert_eq!(profile.position_setpoint(), 99);
        profile.position = -99.99;
        assert_eq!(profile.position_setpoint(), -99);
    }

    #[test]
    fn idle_snaps_to_target() {
        let v = dps_to_counts(180.0);
        let a = dps2_to_counts(360.0);
        let target = 50_000.0;
        let mut profile = TrapezoidProfile::commit(0.0, target, v, a, TOL).unwrap();
        run_to_idle(&mut profile, 10_000);
        assert_eq!(profile.position(), target);
        assert_eq!(profile.velocity(), 0.0);
    }
}

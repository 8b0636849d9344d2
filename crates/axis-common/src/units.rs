//! Engineering unit conversions between operator units (degrees) and
//! drive units (encoder counts).

use std::time::Duration;

/// Encoder resolution: counts per mechanical revolution (2^21).
pub const COUNTS_PER_REV: i64 = 1 << 21;

/// Encoder counts per degree of shaft rotation.
pub const COUNTS_PER_DEGREE: f64 = COUNTS_PER_REV as f64 / 360.0;

/// Fixed process-data cycle time.
pub const CYCLE_TIME: Duration = Duration::from_millis(2);

/// Cycle time as seconds, for trajectory integration.
pub const CYCLE_TIME_S: f64 = 0.002;

/// Convert an angle in degrees to encoder counts, rounded to nearest.
#[must_use]
pub fn degrees_to_counts(degrees: f64) -> i64 {
    (degrees * COUNTS_PER_DEGREE).round() as i64
}

/// Convert encoder counts to degrees.
#[must_use]
pub fn counts_to_degrees(counts: i64) -> f64 {
    counts as f64 / COUNTS_PER_DEGREE
}

/// Convert a speed in deg/s to counts/s.
#[must_use]
pub fn dps_to_counts(dps: f64) -> f64 {
    dps * COUNTS_PER_DEGREE
}

/// Convert an acceleration in deg/s^2 to counts/s^2.
#[must_use]
pub fn dps2_to_counts(dps2: f64) -> f64 {
    dps2 * COUNTS_PER_DEGREE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_revolution_is_exact() {
        assert_eq!(COUNTS_PER_REV, 2_097_152);
        assert_eq!(degrees_to_counts(360.0), COUNTS_PER_REV);
        assert_eq!(degrees_to_counts(-360.0), -COUNTS_PER_REV);
    }

    #[test]
    fn counts_per_degree_matches_resolution() {
        assert!((COUNTS_PER_DEGREE - 5825.422).abs() < 0.001);
    }

    #[test]
    fn round_trips_within_half_count() {
        for deg in [0.0, 1.0, 45.0, 90.0, 123.456, -90.0] {
            let counts = degrees_to_counts(deg);
            let back = counts_to_degrees(counts);
            assert!((back - deg).abs() * COUNTS_PER_DEGREE <= 0.5);
        }
    }
}

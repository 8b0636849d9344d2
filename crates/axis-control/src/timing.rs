//! Absolute-deadline sleeping on the monotonic clock.
//!
//! Deadlines advance by a fixed period from the initial anchor, so a late
//! wakeup shortens the following sleep instead of shifting every
//! subsequent cycle: missed cycles never accumulate drift.

use std::time::{Duration, Instant};

/// Sleeps until successive absolute deadlines `t0 + n * period`.
#[derive(Debug)]
pub struct MonotonicDeadline {
    period_ns: u64,
    #[cfg(target_os = "linux")]
    next: libc::timespec,
    #[cfg(not(target_os = "linux"))]
    next: Instant,
    anchor: Instant,
    ticks: u64,
}

#[cfg(target_os = "linux")]
const NANOS_PER_SEC: i64 = 1_000_000_000;

impl MonotonicDeadline {
    /// Anchor the deadline sequence at now + period.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        let period_ns = period.as_nanos() as u64;

        #[cfg(target_os = "linux")]
        {
            let mut now = libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            };
            // SAFETY: now is a valid timespec out-parameter
            unsafe {
                libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now);
            }
            let mut deadline = Self {
                period_ns,
                next: now,
                anchor: Instant::now(),
                ticks: 0,
            };
            deadline.advance();
            deadline
        }

        #[cfg(not(target_os = "linux"))]
        {
            Self {
                period_ns,
                next: Instant::now() + period,
                anchor: Instant::now(),
                ticks: 0,
            }
        }
    }

    /// Cycle period.
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::from_nanos(self.period_ns)
    }

    /// Number of deadlines waited for so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Time since the deadline sequence was anchored.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.anchor.elapsed()
    }

    /// Sleep until the current deadline, then arm the next one. Returns
    /// immediately if the deadline already passed.
    pub fn wait(&mut self) {
        self.sleep_until_next();
        self.ticks += 1;
        self.advance();
    }

    #[cfg(target_os = "linux")]
    fn sleep_until_next(&self) {
        // TIMER_ABSTIME sleeps against the absolute monotonic deadline and
        // restarts transparently on EINTR
        loop {
            // SAFETY: next is a valid timespec; the remainder pointer may
            // be null for absolute sleeps
            let rc = unsafe {
                libc::clock_nanosleep(
                    libc::CLOCK_MONOTONIC,
                    libc::TIMER_ABSTIME,
                    &self.next,
                    std::ptr::null_mut(),
                )
            };
            if rc != libc::EINTR {
                break;
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn sleep_until_next(&self) {
        let now = Instant::now();
        if self.next > now {
            std::thread::sleep(self.next - now);
        }
    }

    #[cfg(target_os = "linux")]
    fn advance(&mut self) {
        self.next.tv_nsec += self.period_ns as i64;
        while self.next.tv_nsec >= NANOS_PER_SEC {
            self.next.tv_nsec -= NANOS_PER_SEC;
            self.next.tv_sec += 1;
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn advance(&mut self) {
        self.next += Duration::from_nanos(self.period_ns);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_round_trips() {
        let deadline = MonotonicDeadline::new(Duration::from_millis(2));
        assert_eq!(deadline.period(), Duration::from_millis(2));
        assert_eq!(deadline.ticks(), 0);
    }

    #[test]
    fn waits_track_wall_time() {
        let mut deadline = MonotonicDeadline::new(Duration::from_millis(2));
        for _ in 0..25 {
            deadline.wait();
        }
        assert_eq!(deadline.ticks(), 25);

        // 25 cycles at 2 ms: at least 50 ms must have elapsed, and a
        // quiescent host should land well under double that
        let elapsed = deadline.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[test]
    fn missed_deadlines_do_not_drift() {
        let mut deadline = MonotonicDeadline::new(Duration::from_millis(1));
        // Burn well past several deadlines
        std::thread::sleep(Duration::from_millis(10));

        let start = Instant::now();
        for _ in 0..5 {
            deadline.wait();
        }
        // All five deadlines are already in the past, so the waits return
        // immediately instead of serializing five fresh periods
        assert!(start.elapsed() < Duration::from_millis(5));
    }

    #[test]
    fn zero_period_never_blocks() {
        let mut deadline = MonotonicDeadline::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..1000 {
            deadline.wait();
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}

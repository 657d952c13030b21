//! Quadrature encoder count-difference and RPM conversion.
//!
//! Grounded on `motor.c`'s `GetCountDifference`/`CountToRPM`: the timer
//! counter is free-running and wraps at `counts_per_revolution`-sized
//! ranges are not assumed, so a wrap is detected by comparing the raw
//! difference against half the counter range, the same heuristic
//! `systime.c` and `motor.c` both use for their own wrap-safe arithmetic.

use candrive_hal::QuadratureTimer;

/// Wraps a [`QuadratureTimer`] and converts raw counts into signed,
/// wrap-corrected counts and RPM.
pub struct Encoder<T: QuadratureTimer> {
    timer: T,
    counts_per_revolution: u32,
    last_count: u32,
}

impl<T: QuadratureTimer> Encoder<T> {
    /// Wraps `timer`, reporting RPM scaled by `counts_per_revolution`
    /// counts per mechanical revolution.
    pub fn new(timer: T, counts_per_revolution: u32) -> Self {
        let last_count = timer.count();
        Self {
            timer,
            counts_per_revolution,
            last_count,
        }
    }

    /// Signed difference between the current count and the count at the
    /// last call, corrected for at most one wrap of the underlying
    /// counter.
    pub fn count_difference(&mut self) -> i64 {
        let current = self.timer.count();
        let diff = count_difference(self.last_count, current);
        self.last_count = current;
        diff
    }

    /// Converts a signed count difference measured over `period_ms` into
    /// RPM.
    pub fn count_to_rpm(&self, count: i64, period_ms: u32) -> i32 {
        if period_ms == 0 || self.counts_per_revolution == 0 {
            return 0;
        }
        let frequency_hz = 1000i64 / period_ms as i64;
        let cpr = self.counts_per_revolution as i64;
        let numerator = count * frequency_hz * 60 + cpr.signum() * (cpr / 2) * count.signum();
        (numerator / cpr) as i32
    }
}

/// Computes `current - previous` over a free-running `u32` counter,
/// treating a difference whose magnitude exceeds half the counter's range
/// as having wrapped, matching `GetCountDifference`'s `±1` reconciliation
/// of the wrap boundary.
pub fn count_difference(previous: u32, current: u32) -> i64 {
    let diff = current as i64 - previous as i64;
    let half_range = (u32::MAX as i64 + 1) / 2;

    if diff > half_range {
        diff - (u32::MAX as i64) - 1
    } else if diff < -half_range {
        diff + (u32::MAX as i64) + 1
    } else {
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_difference_without_wrap() {
        assert_eq!(count_difference(100, 150), 50);
        assert_eq!(count_difference(150, 100), -50);
    }

    #[test]
    fn count_difference_detects_forward_wrap() {
        assert_eq!(count_difference(u32::MAX - 1, 1), 3);
    }

    #[test]
    fn count_difference_detects_backward_wrap() {
        assert_eq!(count_difference(1, u32::MAX - 1), -3);
    }

    struct FixedTimer(u32);
    impl QuadratureTimer for FixedTimer {
        fn count(&self) -> u32 {
            self.0
        }
    }

    #[test]
    fn count_to_rpm_scales_with_period_and_cpr() {
        let encoder = Encoder::new(FixedTimer(0), 100);
        // 10 counts in 10ms at 100 counts/rev => 100 counts/100ms => 1000
        // counts/s => 10 rev/s => 600 rpm.
        let rpm = encoder.count_to_rpm(10, 10);
        assert_eq!(rpm, 600);
    }
}

//! A fixed-point exponential moving average filter.
//!
//! Grounded on `filter.c`: the smoothing factor `alpha` and the running
//! value are both scaled to `u32::MAX`, so the update can be computed with
//! a single 64-bit multiply-accumulate and no floating point.

/// An exponential moving average filter over `u32`-scaled samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct Filter {
    alpha: u32,
    value: u32,
}

impl Filter {
    /// Scales a floating-point smoothing factor in `0.0..=1.0` to the
    /// fixed-point representation used by [`Filter::new`].
    ///
    /// Equivalent to the original `FILTER_ALPHA` macro.
    pub fn alpha(a: f32) -> u32 {
        (a * u32::MAX as f32) as u32
    }

    /// Creates a filter with the given initial value and smoothing factor.
    ///
    /// `alpha` must be nonzero; `alpha == 0` is reserved to mean
    /// "uninitialized" by [`Filter::is_initialized`].
    pub fn new(initial_value: u32, alpha: u32) -> Self {
        Self {
            alpha,
            value: initial_value,
        }
    }

    /// Creates a filter that is not yet initialized. A caller observing
    /// [`Filter::is_initialized`] return `false` is expected to call
    /// [`Filter::init`] with the first available sample before calling
    /// [`Filter::process`].
    pub fn uninitialized() -> Self {
        Self { alpha: 0, value: 0 }
    }

    /// `true` once the filter has a smoothing factor assigned.
    pub fn is_initialized(&self) -> bool {
        self.alpha != 0
    }

    /// Seeds an uninitialized filter with `initial_value` and `alpha`.
    pub fn init(&mut self, initial_value: u32, alpha: u32) {
        self.alpha = alpha;
        self.value = initial_value;
    }

    /// Feeds one new sample through the filter using the smoothing factor
    /// given at construction or via [`Filter::init`].
    ///
    /// Calling this before the filter is initialized leaves the sample
    /// unfiltered, matching [`Filter::init`] semantics on first use.
    pub fn process(&mut self, sample: u32) -> u32 {
        if !self.is_initialized() {
            self.value = sample;
            return self.value;
        }

        let alpha = self.alpha as u64;
        let inverse = u32::MAX as u64 - alpha;
        let value = (alpha * sample as u64 + inverse * self.value as u64 + u32::MAX as u64 / 2)
            / u32::MAX as u64;
        self.value = value as u32;
        self.value
    }

    /// The current filtered value.
    pub fn output(&self) -> u32 {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_on_init_when_uninitialized() {
        let mut filter = Filter::uninitialized();
        assert!(!filter.is_initialized());
        filter.init(1000, Filter::alpha(0.5));
        assert!(filter.is_initialized());
        assert_eq!(filter.output(), 1000);
    }

    #[test]
    fn converges_toward_constant_input() {
        let alpha = Filter::alpha(0.5);
        let mut filter = Filter::new(0, alpha);
        for _ in 0..64 {
            filter.process(1000);
        }
        assert!(filter.output() > 990);
    }

    #[test]
    fn unchanged_input_is_stable() {
        let alpha = Filter::alpha(0.3);
        let mut filter = Filter::new(500, alpha);
        let out = filter.process(500);
        assert_eq!(out, 500);
    }
}

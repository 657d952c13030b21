//! A thin, direction-aware wrapper around a [`PwmOutput`].

use candrive_hal::PwmOutput;

/// Commanded rotation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Clockwise.
    Cw,
    /// Counter-clockwise.
    Ccw,
}

/// Drives a single PWM channel from a signed duty in `-1000..=1000`
/// (tenths of a percent), translating sign into [`Direction`].
pub struct Pwm<P: PwmOutput> {
    pub(crate) output: P,
    enabled: bool,
}

impl<P: PwmOutput> Pwm<P> {
    /// Wraps `output`, disabled.
    pub fn new(output: P) -> Self {
        Self {
            output,
            enabled: false,
        }
    }

    /// Enables the output.
    pub fn enable(&mut self) {
        if !self.enabled {
            self.output.enable();
            self.enabled = true;
        }
    }

    /// Disables the output, forcing it low.
    pub fn disable(&mut self) {
        if self.enabled {
            self.output.disable();
            self.enabled = false;
        }
    }

    /// `true` if the output is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Sets the duty cycle, `0..=1000` (tenths of a percent).
    pub fn set_duty(&mut self, duty_permille: u16) {
        let max = self.output.max_duty() as u32;
        let scaled = (duty_permille.min(1000) as u32 * max) / 1000;
        self.output.set_duty(scaled as u16);
    }
}

//! Per-motor speed/current measurement and three-state (Run/Coast/Brake)
//! drive output.
//!
//! Grounded on `motor.c`. Direction is driven by two GPIOs (INA/INB); speed
//! is commanded as a signed duty whose sign selects direction and whose
//! magnitude sets PWM duty, with speed 0 leaving the current direction
//! unchanged rather than defaulting to a fixed one. Coasting leaves the
//! PWM output enabled at zero duty (matching the reference firmware
//! rather than disabling the output outright); braking disables PWM,
//! shorts both direction pins low, then re-enables at full duty.

use crate::encoder::Encoder;
use crate::filter::Filter;
use crate::pwm::Pwm;
use crate::systime::elapsed;
use candrive_hal::{AdcChannel, OutputPin, PwmOutput, QuadratureTimer};

const UPDATE_PERIOD_MS: u32 = 10;

/// The three drive states a motor can be commanded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    /// Actively driven at a commanded speed.
    Run,
    /// PWM enabled at zero duty; the motor freewheels.
    Coast,
    /// Both phases shorted low; the motor is actively braked.
    Brake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Cw,
    Ccw,
}

/// Drives and measures a single motor.
pub struct Motor<P: PwmOutput, A: AdcChannel, T: QuadratureTimer, InA: OutputPin, InB: OutputPin> {
    pwm: Pwm<P>,
    current_sense: A,
    current_filter: Filter,
    encoder: Encoder<T>,
    in_a: InA,
    in_b: InB,
    direction: Direction,
    status: Status,
    commanded_speed: i16,
    rpm: i32,
    last_update_ms: u32,
}

impl<P, A, T, InA, InB> Motor<P, A, T, InA, InB>
where
    P: PwmOutput,
    A: AdcChannel,
    T: QuadratureTimer,
    InA: OutputPin,
    InB: OutputPin,
{
    /// Creates a motor driver. The PWM output starts enabled at zero duty,
    /// matching the reference firmware's boot state.
    pub fn new(pwm: P, current_sense: A, timer: T, in_a: InA, in_b: InB, counts_per_revolution: u32) -> Self {
        debug_assert!(counts_per_revolution > 0);
        let mut pwm = Pwm::new(pwm);
        pwm.enable();
        pwm.set_duty(0);
        Self {
            pwm,
            current_sense,
            current_filter: Filter::uninitialized(),
            encoder: Encoder::new(timer, counts_per_revolution),
            in_a,
            in_b,
            direction: Direction::Cw,
            status: Status::Run,
            commanded_speed: 0,
            rpm: 0,
            last_update_ms: 0,
        }
    }

    /// Commands a signed speed in `-1000..=1000` (tenths of a percent of
    /// full scale); the sign selects direction. A speed of zero leaves the
    /// current direction unchanged. Only re-issues the PWM/GPIO writes if
    /// the motor was not already running at this exact speed.
    pub fn set_speed(&mut self, speed: i16) {
        if self.status == Status::Run && self.commanded_speed == speed {
            return;
        }

        self.set_direction(speed);
        self.status = Status::Run;
        self.commanded_speed = speed;
        self.pwm.enable();
        self.pwm.set_duty(speed.unsigned_abs().min(1000));
    }

    /// Lets the motor freewheel: PWM stays enabled, duty forced to zero.
    pub fn coast(&mut self) {
        self.status = Status::Coast;
        self.pwm.set_duty(0);
    }

    /// Actively brakes the motor: both direction outputs are driven low
    /// and the PWM output is driven to full duty.
    pub fn brake(&mut self) {
        self.pwm.disable();
        self.in_a.set_low();
        self.in_b.set_low();
        self.pwm.set_duty(1000);
        self.pwm.enable();
        self.status = Status::Brake;
    }

    /// Current drive state.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Last measured speed, in RPM (signed with direction).
    pub fn rpm(&self) -> i32 {
        self.rpm
    }

    /// Reads the current-sense ADC, runs it through the current EMA filter
    /// (`alpha` ≈ 0.5) and converts the filtered count to milliamps,
    /// negated when spinning counter-clockwise so the sign matches
    /// commanded direction.
    pub fn sense_current_ma(&mut self, counts_to_ma: impl Fn(u16) -> i32) -> nb::Result<i32, A::Error> {
        let raw = self.current_sense.read()?;
        if !self.current_filter.is_initialized() {
            self.current_filter.init(raw as u32, Filter::alpha(0.5));
        } else {
            self.current_filter.process(raw as u32);
        }
        let filtered = self.current_filter.output() as u16;
        let magnitude = counts_to_ma(filtered);
        Ok(match self.direction {
            Direction::Cw => magnitude,
            Direction::Ccw => -magnitude,
        })
    }

    /// Recomputes RPM from the encoder if at least one update period has
    /// elapsed since the last call.
    pub fn update(&mut self, now_ms: u32) {
        if elapsed(self.last_update_ms, now_ms) < UPDATE_PERIOD_MS {
            return;
        }
        let diff = self.encoder.count_difference();
        self.rpm = self.encoder.count_to_rpm(diff, UPDATE_PERIOD_MS);
        self.last_update_ms = now_ms;
    }

    fn set_direction(&mut self, speed: i16) {
        if speed > 0 {
            self.direction = Direction::Cw;
            self.in_a.set_high();
            self.in_b.set_low();
        } else if speed < 0 {
            self.direction = Direction::Ccw;
            self.in_a.set_low();
            self.in_b.set_high();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakePwm {
        enabled: bool,
        duty: u16,
    }
    impl PwmOutput for FakePwm {
        fn enable(&mut self) {
            self.enabled = true;
        }
        fn disable(&mut self) {
            self.enabled = false;
        }
        fn max_duty(&self) -> u16 {
            1000
        }
        fn set_duty(&mut self, duty: u16) {
            self.duty = duty;
        }
    }

    struct FakeAdc(u16);
    impl AdcChannel for FakeAdc {
        type Error = core::convert::Infallible;
        fn read(&mut self) -> nb::Result<u16, Self::Error> {
            Ok(self.0)
        }
    }

    struct FakeTimer(u32);
    impl QuadratureTimer for FakeTimer {
        fn count(&self) -> u32 {
            self.0
        }
    }

    #[derive(Default)]
    struct FakePin(bool);
    impl OutputPin for FakePin {
        fn set_high(&mut self) {
            self.0 = true;
        }
        fn set_low(&mut self) {
            self.0 = false;
        }
    }

    fn motor() -> Motor<FakePwm, FakeAdc, FakeTimer, FakePin, FakePin> {
        Motor::new(
            FakePwm {
                enabled: false,
                duty: 0,
            },
            FakeAdc(0),
            FakeTimer(0),
            FakePin::default(),
            FakePin::default(),
            100,
        )
    }

    #[test]
    fn set_speed_zero_leaves_direction_unchanged() {
        let mut m = motor();
        m.set_speed(500);
        assert!(m.in_a.0);
        m.set_speed(0);
        // Direction pins still reflect the last nonzero command.
        assert!(m.in_a.0);
        assert_eq!(m.status(), Status::Run);
    }

    #[test]
    fn coast_keeps_pwm_enabled_at_zero_duty() {
        let mut m = motor();
        m.set_speed(500);
        m.coast();
        assert_eq!(m.status(), Status::Coast);
        assert!(m.pwm.is_enabled());
        assert_eq!(m.pwm.output.duty, 0);
    }

    #[test]
    fn brake_shorts_both_phases_and_drives_full_duty() {
        let mut m = motor();
        m.set_speed(500);
        m.brake();
        assert_eq!(m.status(), Status::Brake);
        assert!(!m.in_a.0);
        assert!(!m.in_b.0);
        assert_eq!(m.pwm.output.duty, 1000);
        assert!(m.pwm.is_enabled());
    }

    struct SteppingTimer(core::cell::Cell<u32>);
    impl QuadratureTimer for SteppingTimer {
        fn count(&self) -> u32 {
            let value = self.0.get();
            self.0.set(value + 5);
            value
        }
    }

    #[test]
    fn update_recomputes_rpm_only_after_period_elapses() {
        let mut m = Motor::new(
            FakePwm {
                enabled: false,
                duty: 0,
            },
            FakeAdc(0),
            SteppingTimer(core::cell::Cell::new(0)),
            FakePin::default(),
            FakePin::default(),
            100,
        );
        m.update(5);
        assert_eq!(m.rpm(), 0);
        m.update(10);
        assert_ne!(m.rpm(), 0);
    }

    #[test]
    fn set_speed_is_idempotent_when_unchanged() {
        let mut m = motor();
        m.set_speed(300);
        m.pwm.output.duty = 999; // Tamper to detect a re-issue.
        m.set_speed(300);
        assert_eq!(m.pwm.output.duty, 999);
    }

    struct SteppingAdc(core::cell::Cell<u16>, u16);
    impl AdcChannel for SteppingAdc {
        type Error = core::convert::Infallible;
        fn read(&mut self) -> nb::Result<u16, Self::Error> {
            let value = self.0.get();
            self.0.set(value + self.1);
            Ok(value)
        }
    }

    #[test]
    fn current_reading_passes_through_first_sample_unfiltered() {
        let mut m = Motor::new(
            FakePwm { enabled: false, duty: 0 },
            SteppingAdc(core::cell::Cell::new(1000), 0),
            FakeTimer(0),
            FakePin::default(),
            FakePin::default(),
            100,
        );
        assert_eq!(m.sense_current_ma(|raw| raw as i32).unwrap(), 1000);
    }

    #[test]
    fn current_reading_smooths_a_step_change() {
        let mut m = Motor::new(
            FakePwm { enabled: false, duty: 0 },
            SteppingAdc(core::cell::Cell::new(0), 2000),
            FakeTimer(0),
            FakePin::default(),
            FakePin::default(),
            100,
        );
        // First sample (0) seeds the filter; the jump to 2000 is smoothed
        // rather than reported immediately.
        assert_eq!(m.sense_current_ma(|raw| raw as i32).unwrap(), 0);
        let smoothed = m.sense_current_ma(|raw| raw as i32).unwrap();
        assert!(smoothed > 0 && smoothed < 2000);
    }
}

//! Coordinates both motors and their cascaded PID loops.
//!
//! The controller periodically updates each motor's measured RPM, runs a
//! speed PID per motor to produce a duty command, and forwards the result
//! to [`crate::motor::Motor::set_speed`] (or `coast`/`brake` when no
//! setpoint has been given). It refuses to arm either motor unless
//! [`crate::config::Config::is_valid`] reported a complete configuration
//! at boot, matching the persisted-state contract in the data model.

use crate::motor::Motor;
use crate::pid::Pid;
use candrive_hal::{AdcChannel, OutputPin, PwmOutput, QuadratureTimer};

/// A commanded action for one motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Drive toward a signed RPM setpoint.
    Speed(i32),
    /// Let the motor freewheel.
    Coast,
    /// Actively brake the motor.
    Brake,
}

/// Drives two motors from independent speed PID loops.
pub struct MotorController<P, A, T, InA, InB>
where
    P: PwmOutput,
    A: AdcChannel,
    T: QuadratureTimer,
    InA: OutputPin,
    InB: OutputPin,
{
    motors: [Motor<P, A, T, InA, InB>; 2],
    pids: [Pid; 2],
    commands: [Command; 2],
}

impl<P, A, T, InA, InB> MotorController<P, A, T, InA, InB>
where
    P: PwmOutput,
    A: AdcChannel,
    T: QuadratureTimer,
    InA: OutputPin,
    InB: OutputPin,
{
    /// Builds a controller for two motors, each with its own speed PID.
    pub fn new(motors: [Motor<P, A, T, InA, InB>; 2], pids: [Pid; 2]) -> Self {
        Self {
            motors,
            pids,
            commands: [Command::Coast, Command::Coast],
        }
    }

    /// Commands motor `index` (0 or 1).
    pub fn command(&mut self, index: usize, command: Command) {
        if let Command::Speed(_) = self.commands[index] {
            if command != self.commands[index] {
                self.pids[index].reset();
            }
        }
        self.commands[index] = command;
    }

    /// Advances both motors' RPM measurement and PID loops by one tick.
    pub fn update(&mut self, now_ms: u32) {
        for index in 0..2 {
            self.motors[index].update(now_ms);
            match self.commands[index] {
                Command::Speed(setpoint) => {
                    let error = setpoint - self.motors[index].rpm();
                    let duty = self.pids[index].update(error);
                    self.motors[index].set_speed(duty.clamp(-1000, 1000) as i16);
                }
                Command::Coast => self.motors[index].coast(),
                Command::Brake => self.motors[index].brake(),
            }
        }
    }

    /// Read-only access to motor `index`, e.g. for status reporting.
    pub fn motor(&self, index: usize) -> &Motor<P, A, T, InA, InB> {
        &self.motors[index]
    }

    /// Mutable access to motor `index`, for out-of-band current sensing
    /// (which needs `&mut self` to drive the ADC) between control ticks.
    pub fn motor_mut(&mut self, index: usize) -> &mut Motor<P, A, T, InA, InB> {
        &mut self.motors[index]
    }
}

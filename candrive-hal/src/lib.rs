//! Integration traits for the CANDrive motor controller firmware.
//!
//! This crate declares the contract a target board must satisfy for
//! [`candrive`](https://docs.rs/candrive) to drive it: a CAN controller, a
//! flash device, quadrature timers, PWM outputs, an ADC, an independent
//! watchdog, battery-backed registers and a monotonic system clock.
//!
//! None of the traits here are implemented by this crate; a board support
//! package provides the implementations, the same way a `chip-hal` crate
//! would implement `mcan_core::Dependencies` for a specific microcontroller.
#![no_std]
#![warn(missing_docs)]

use core::convert::Infallible;

/// A single standard (11-bit) or extended (29-bit) CAN identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanId {
    /// An 11-bit standard identifier.
    Standard(u16),
    /// A 29-bit extended identifier.
    Extended(u32),
}

/// A CAN data frame with up to 8 bytes of payload.
///
/// Classic CAN 2.0B frames only; CAN-FD is out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: CanId,
    dlc: u8,
    data: [u8; 8],
}

impl CanFrame {
    /// Builds a frame, truncating `data` to 8 bytes if longer.
    pub fn new(id: CanId, data: &[u8]) -> Self {
        let dlc = data.len().min(8) as u8;
        let mut buf = [0u8; 8];
        buf[..dlc as usize].copy_from_slice(&data[..dlc as usize]);
        Self { id, dlc, data: buf }
    }

    /// The frame's identifier.
    pub fn id(&self) -> CanId {
        self.id
    }

    /// The number of valid bytes in [`Self::data`].
    pub fn len(&self) -> usize {
        self.dlc as usize
    }

    /// `true` if the frame carries no payload.
    pub fn is_empty(&self) -> bool {
        self.dlc == 0
    }

    /// The frame's payload, `0..len()` valid.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }
}

/// A CAN controller capable of transmitting frames and delivering received
/// ones to registered listeners.
///
/// # Safety
///
/// Implementors must guarantee that [`CanController::transmit`] only ever
/// observes frames placed on the bus after the call, and that frames
/// delivered to [`CanController::poll`] are delivered at most once.
pub unsafe trait CanController {
    /// Error produced by a failed transmission.
    type Error;

    /// Queues `frame` for transmission, returning `Ok(true)` if it was
    /// accepted or `Ok(false)` if no transmit mailbox was free.
    fn transmit(&mut self, frame: &CanFrame) -> Result<bool, Self::Error>;

    /// Polls the controller for one received frame, if any is pending.
    fn poll(&mut self) -> Option<CanFrame>;
}

/// A programmable, byte-addressable on-chip flash region.
///
/// Writes are only ever word- or half-word-aligned and monotonic (the
/// caller never rewrites a region without erasing it first); the
/// implementation is free to assume this.
pub trait FlashDevice {
    /// Error produced by a failed program or erase operation.
    type Error;

    /// Size, in bytes, of one erasable page.
    const PAGE_SIZE: usize;

    /// Erases the page starting at `address`.
    fn erase_page(&mut self, address: u32) -> Result<(), Self::Error>;

    /// Programs `data` at `address`. `address` is word-aligned; `data` may
    /// have a trailing partial word, which is zero-padded.
    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error>;

    /// Reads `buffer.len()` bytes starting at `address`.
    fn read(&self, address: u32, buffer: &mut [u8]);
}

/// A single-ended ADC channel reporting raw sample counts.
pub trait AdcChannel {
    /// Error produced by a failed conversion; infallible on most targets.
    type Error;

    /// Performs one conversion and returns the raw sample.
    fn read(&mut self) -> nb::Result<u16, Self::Error>;
}

/// A single PWM output channel with a fixed carrier frequency.
pub trait PwmOutput {
    /// Enables the output.
    fn enable(&mut self);

    /// Disables the output, forcing it low.
    fn disable(&mut self);

    /// The maximum value accepted by [`PwmOutput::set_duty`].
    fn max_duty(&self) -> u16;

    /// Sets the duty cycle, `0..=max_duty()`.
    fn set_duty(&mut self, duty: u16);
}

/// A quadrature (incremental) encoder timer.
///
/// The counter is free-running and wraps modulo `2^16` or `2^32` depending
/// on the timer's width; callers reconcile wrap-around using
/// [`candrive::encoder`](https://docs.rs/candrive).
pub trait QuadratureTimer {
    /// Current free-running count.
    fn count(&self) -> u32;
}

/// A general purpose digital output pin.
pub trait OutputPin {
    /// Drives the pin high.
    fn set_high(&mut self);

    /// Drives the pin low.
    fn set_low(&mut self);
}

/// A general purpose digital input pin.
pub trait InputPin {
    /// Returns `true` if the pin reads high.
    fn is_high(&self) -> bool;
}

/// A blocking or non-blocking byte-oriented serial port, used for the
/// diagnostic console.
pub trait Usart {
    /// Error produced by a failed read or write.
    type Error;

    /// Reads one byte if available without blocking.
    fn read(&mut self) -> nb::Result<u8, Self::Error>;

    /// Writes one byte, blocking if the transmit buffer is full.
    fn write(&mut self, byte: u8) -> nb::Result<(), Self::Error>;
}

/// The independent (watchdog) timer peripheral.
pub trait IndependentWatchdog {
    /// Starts the watchdog with the given timeout, in milliseconds.
    fn start(&mut self, period_ms: u32);

    /// Refreshes the watchdog counter.
    fn feed(&mut self);
}

/// Read/write access to the battery-backed (VBAT-domain) register file used
/// to carry state across a reset.
///
/// Implementations must guarantee the backing memory survives any reset
/// that is not a full power-on reset.
pub trait BackupRegisters {
    /// Number of `u16` registers available.
    const LEN: usize;

    /// Reads register `index`.
    fn read(&self, index: usize) -> u16;

    /// Writes register `index`.
    fn write(&mut self, index: usize, value: u16);

    /// Hardware reset-cause flags, board specific but must include a bit
    /// indicating the last reset was caused by the independent watchdog.
    fn reset_flags(&self) -> ResetFlags;

    /// Clears the hardware reset-cause flags after they have been read.
    fn clear_reset_flags(&mut self);
}

/// Reset-cause flags, read once at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResetFlags {
    /// The independent watchdog timer expired.
    pub watchdog: bool,
    /// A low-power (stop/standby) reset occurred.
    pub low_power: bool,
    /// A software-requested reset occurred.
    pub software: bool,
    /// A power-on/power-down reset occurred.
    pub power_on: bool,
}

/// The monotonic free-running millisecond tick used throughout the crate.
///
/// An implementation is expected to drive this from a periodic interrupt
/// (e.g. SysTick) incrementing a counter once per millisecond.
pub trait SystemClock {
    /// Milliseconds elapsed since boot, wrapping at `u32::MAX`.
    fn uptime_ms(&self) -> u32;

    /// Microseconds elapsed since boot, wrapping at `u32::MAX`.
    ///
    /// Implementations reading a hardware down-counter alongside the
    /// millisecond tick must read-compare-read to avoid tearing across a
    /// tick boundary.
    fn uptime_us(&self) -> u32;
}

/// A monotonic digital input with no failure mode, used where
/// `embedded-hal` 0.2's associated error type would otherwise be
/// uninhabited.
pub trait InfallibleInputPin: InputPin {}

impl<T> InfallibleInputPin for T where T: InputPin {}

// Re-exported so implementors do not need to depend on `void` directly to
// satisfy `embedded-hal` 0.2 trait bounds with an infallible error type.
#[doc(hidden)]
pub type Never = Infallible;

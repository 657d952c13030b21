//! Platform-independent logic of the CANDrive motor controller firmware.
//!
//! This crate is generic over the traits in
//! [`candrive_hal`](https://docs.rs/candrive-hal) and performs no dynamic
//! allocation. It is organized bottom-up: [`fifo`], [`stream`], [`crc`],
//! [`filter`] and [`util`] are small self-contained data structures;
//! [`can_interface`], [`flash`], [`nvs`], [`nvcom`] and [`systime`] wrap a
//! single peripheral; [`isotp`], [`pid`], [`pwm`], [`encoder`], [`motor`]
//! and [`supervisor`] compose those into the control algorithms; and
//! [`signal_handler`], [`firmware_manager`] and [`motor_controller`] tie
//! everything together into the two subsystems driven by the application
//! and bootloader binaries.
#![no_std]
#![warn(missing_docs)]

pub mod can_interface;
pub mod config;
pub mod console;
pub mod crc;
pub mod encoder;
pub mod filter;
pub mod firmware_manager;
pub mod fifo;
pub mod flash;
pub mod image;
pub mod isotp;
pub mod motor;
pub mod motor_controller;
pub mod nvcom;
pub mod nvs;
pub mod pid;
pub mod pwm;
pub mod signal_handler;
pub mod stream;
pub mod supervisor;
pub mod systime;
pub mod util;

/// Re-exports of the traits and types most commonly needed by a board
/// support package wiring this crate together, the way `mcan::prelude`
/// re-exports the pieces needed to configure a CAN bus.
pub mod prelude {
    pub use crate::can_interface::{CanInterface, Listener};
    pub use crate::motor_controller::MotorController;
    pub use crate::supervisor::Supervisor;
    pub use candrive_hal::{CanFrame, CanId};
}

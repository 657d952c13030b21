//! Typed configuration values loaded from [`crate::nvs`] at boot.
//!
//! Grounded on `config.c`: a handful of named `u32` values read once at
//! startup and exposed through typed getters. If any key is missing the
//! whole configuration is considered invalid and every field defaults to
//! zero, matching the persisted-state contract: the motor controller must
//! refuse to build any motor instance rather than run on zeroed config.

use crate::nvs::{hash_key, Nvs, NvsError};
use candrive_hal::FlashDevice;

const KEY_COUNTS_PER_REVOLUTION_M1: &[u8] = b"cpr_m1";
const KEY_COUNTS_PER_REVOLUTION_M2: &[u8] = b"cpr_m2";
const KEY_CURRENT_LIMIT_MA: &[u8] = b"current_limit_ma";
const KEY_SPEED_LIMIT_RPM: &[u8] = b"speed_limit_rpm";

/// Configuration values required to bring up the motor controller.
#[derive(Debug, Clone, Copy, Default)]
pub struct Config {
    /// Quadrature counts per mechanical revolution, motor 1.
    pub counts_per_revolution_m1: u32,
    /// Quadrature counts per mechanical revolution, motor 2.
    pub counts_per_revolution_m2: u32,
    /// Maximum allowed sensed current, in milliamps.
    pub current_limit_ma: u32,
    /// Maximum allowed commanded speed, in RPM.
    pub speed_limit_rpm: u32,
    valid: bool,
}

impl Config {
    /// Loads every configuration key from `nvs`. If any key is absent the
    /// returned `Config` has every field zeroed and [`Config::is_valid`]
    /// returns `false`.
    pub fn load<F: FlashDevice>(nvs: &Nvs<F>) -> Result<Self, NvsError> {
        let m1 = read_u32(nvs, KEY_COUNTS_PER_REVOLUTION_M1)?;
        let m2 = read_u32(nvs, KEY_COUNTS_PER_REVOLUTION_M2)?;
        let current_limit = read_u32(nvs, KEY_CURRENT_LIMIT_MA)?;
        let speed_limit = read_u32(nvs, KEY_SPEED_LIMIT_RPM)?;

        match (m1, m2, current_limit, speed_limit) {
            (Some(counts_per_revolution_m1), Some(counts_per_revolution_m2), Some(current_limit_ma), Some(speed_limit_rpm)) => {
                Ok(Self {
                    counts_per_revolution_m1,
                    counts_per_revolution_m2,
                    current_limit_ma,
                    speed_limit_rpm,
                    valid: true,
                })
            }
            _ => Ok(Self::default()),
        }
    }

    /// `true` if every required key was present at load time.
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

fn read_u32<F: FlashDevice>(nvs: &Nvs<F>, key: &[u8]) -> Result<Option<u32>, NvsError> {
    let value = nvs.retrieve(hash_key(key))?;
    Ok(value.and_then(|bytes| bytes.as_slice().try_into().ok().map(u32::from_le_bytes)))
}

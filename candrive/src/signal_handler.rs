//! Decodes incoming CAN control frames into motor commands and encodes
//! outgoing status frames.
//!
//! This is the CAN-facing counterpart of [`crate::motor_controller`]: it
//! owns no control logic of its own, only the wire format. Frame layout
//! mirrors the compact, fixed-offset style the rest of the firmware uses
//! for its protocol messages (see [`crate::firmware_manager::protocol`]):
//! a `u8` command/mode byte followed by little-endian setpoints.

use crate::motor_controller::Command;
use candrive_hal::CanFrame;

const MODE_COAST: u8 = 0;
const MODE_BRAKE: u8 = 1;
const MODE_SPEED: u8 = 2;

/// Decodes a received control frame into a pair of motor commands.
///
/// Layout: `[mode, speed_m1_lo, speed_m1_hi, speed_m2_lo, speed_m2_hi]`,
/// speeds as signed RPM. `mode` selects how the speed fields are
/// interpreted; in `Coast`/`Brake` mode they are ignored.
pub fn decode_control_frame(frame: &CanFrame) -> Option<[Command; 2]> {
    let data = frame.data();
    let mode = *data.first()?;
    match mode {
        MODE_COAST => Some([Command::Coast, Command::Coast]),
        MODE_BRAKE => Some([Command::Brake, Command::Brake]),
        MODE_SPEED => {
            if data.len() < 5 {
                return None;
            }
            let speed_m1 = i16::from_le_bytes([data[1], data[2]]) as i32;
            let speed_m2 = i16::from_le_bytes([data[3], data[4]]) as i32;
            Some([Command::Speed(speed_m1), Command::Speed(speed_m2)])
        }
        _ => None,
    }
}

/// A status snapshot reported by [`encode_status_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorStatus {
    /// Measured RPM.
    pub rpm: i32,
    /// Measured current, in milliamps.
    pub current_ma: i32,
}

/// Encodes a status frame for one motor: `[index, rpm_le(i32),
/// current_ma_le(i16)]`, truncating current to `i16` range.
pub fn encode_status_frame(id: candrive_hal::CanId, index: u8, status: MotorStatus) -> CanFrame {
    let mut buf = [0u8; 7];
    buf[0] = index;
    buf[1..5].copy_from_slice(&status.rpm.to_le_bytes());
    let current = status.current_ma.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
    buf[5..7].copy_from_slice(&current.to_le_bytes());
    CanFrame::new(id, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candrive_hal::CanId;

    #[test]
    fn decodes_coast_frame() {
        let frame = CanFrame::new(CanId::Standard(0x200), &[MODE_COAST]);
        assert_eq!(
            decode_control_frame(&frame),
            Some([Command::Coast, Command::Coast])
        );
    }

    #[test]
    fn decodes_speed_frame_with_signed_setpoints() {
        let mut data = [MODE_SPEED, 0, 0, 0, 0];
        data[1..3].copy_from_slice(&(-100i16).to_le_bytes());
        data[3..5].copy_from_slice(&(250i16).to_le_bytes());
        let frame = CanFrame::new(CanId::Standard(0x200), &data);
        assert_eq!(
            decode_control_frame(&frame),
            Some([Command::Speed(-100), Command::Speed(250)])
        );
    }

    #[test]
    fn rejects_too_short_speed_frame() {
        let frame = CanFrame::new(CanId::Standard(0x200), &[MODE_SPEED, 0, 0]);
        assert_eq!(decode_control_frame(&frame), None);
    }

    #[test]
    fn rejects_unknown_mode() {
        let frame = CanFrame::new(CanId::Standard(0x200), &[0xFF]);
        assert_eq!(decode_control_frame(&frame), None);
    }

    #[test]
    fn status_frame_roundtrips_fields() {
        let encoded = encode_status_frame(
            CanId::Standard(0x300),
            1,
            MotorStatus {
                rpm: -5000,
                current_ma: 1200,
            },
        );
        let data = encoded.data();
        assert_eq!(data[0], 1);
        assert_eq!(i32::from_le_bytes(data[1..5].try_into().unwrap()), -5000);
        assert_eq!(i16::from_le_bytes(data[5..7].try_into().unwrap()), 1200);
    }
}

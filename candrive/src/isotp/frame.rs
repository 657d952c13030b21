//! Encoding and decoding of the four ISO-TP frame types onto an 8-byte CAN
//! payload.

use super::{CF_DATA_LENGTH, FF_DATA_LENGTH, SF_DATA_LENGTH};
use candrive_hal::CanFrame;
use heapless::Vec;

const PCI_SF: u8 = 0x0;
const PCI_FF: u8 = 0x1;
const PCI_CF: u8 = 0x2;
const PCI_FC: u8 = 0x3;

/// Flow status carried by a flow control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlowStatus {
    /// The sender may continue sending consecutive frames.
    ContinueToSend,
    /// The sender must pause and wait for another flow control frame.
    Wait,
    /// The receiver cannot accept this transfer; it must be aborted.
    Overflow,
}

impl FlowStatus {
    fn to_nibble(self) -> u8 {
        match self {
            FlowStatus::ContinueToSend => 0,
            FlowStatus::Wait => 1,
            FlowStatus::Overflow => 2,
        }
    }

    fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0 => Some(FlowStatus::ContinueToSend),
            1 => Some(FlowStatus::Wait),
            2 => Some(FlowStatus::Overflow),
            _ => None,
        }
    }
}

/// A decoded ISO-TP protocol control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete payload of up to [`SF_DATA_LENGTH`] bytes.
    Single { data: Vec<u8, SF_DATA_LENGTH> },
    /// The first frame of a multi-frame payload, announcing the total
    /// size.
    First { total_size: u16, data: Vec<u8, FF_DATA_LENGTH> },
    /// One chunk of a multi-frame payload.
    Consecutive { sequence_number: u8, data: Vec<u8, CF_DATA_LENGTH> },
    /// A flow control reply pacing a multi-frame send.
    FlowControl {
        status: FlowStatus,
        block_size: u8,
        separation_time: u8,
    },
}

impl Frame {
    /// Decodes `frame`'s payload, if it is well formed.
    pub fn decode(frame: &CanFrame) -> Option<Self> {
        let data = frame.data();
        let first = *data.first()?;
        let pci = first >> 4;

        match pci {
            PCI_SF => {
                let size = (first & 0x0F) as usize;
                if size == 0 || size > SF_DATA_LENGTH || data.len() < 1 + size {
                    return None;
                }
                let mut out = Vec::new();
                out.extend_from_slice(&data[1..1 + size]).ok()?;
                Some(Frame::Single { data: out })
            }
            PCI_FF => {
                if data.len() < 2 {
                    return None;
                }
                let total_size = (((first & 0x0F) as u16) << 8) | data[1] as u16;
                let payload = &data[2..];
                let mut out = Vec::new();
                out.extend_from_slice(&payload[..payload.len().min(FF_DATA_LENGTH)])
                    .ok()?;
                Some(Frame::First { total_size, data: out })
            }
            PCI_CF => {
                let sequence_number = first & 0x0F;
                let payload = &data[1..];
                let mut out = Vec::new();
                out.extend_from_slice(&payload[..payload.len().min(CF_DATA_LENGTH)])
                    .ok()?;
                Some(Frame::Consecutive { sequence_number, data: out })
            }
            PCI_FC => {
                if data.len() < 3 {
                    return None;
                }
                let status = FlowStatus::from_nibble(first & 0x0F)?;
                Some(Frame::FlowControl {
                    status,
                    block_size: data[1],
                    separation_time: data[2],
                })
            }
            _ => None,
        }
    }

    /// Encodes this frame as an 8-byte (or shorter) CAN payload, given the
    /// identifier it should be sent with.
    pub fn encode(&self, id: candrive_hal::CanId) -> CanFrame {
        let mut buf = [0u8; 8];
        let len = match self {
            Frame::Single { data } => {
                buf[0] = (PCI_SF << 4) | data.len() as u8;
                buf[1..1 + data.len()].copy_from_slice(data);
                1 + data.len()
            }
            Frame::First { total_size, data } => {
                buf[0] = (PCI_FF << 4) | ((total_size >> 8) as u8 & 0x0F);
                buf[1] = (*total_size & 0xFF) as u8;
                buf[2..2 + data.len()].copy_from_slice(data);
                8
            }
            Frame::Consecutive { sequence_number, data } => {
                buf[0] = (PCI_CF << 4) | (sequence_number & 0x0F);
                buf[1..1 + data.len()].copy_from_slice(data);
                1 + data.len()
            }
            Frame::FlowControl {
                status,
                block_size,
                separation_time,
            } => {
                buf[0] = (PCI_FC << 4) | status.to_nibble();
                buf[1] = *block_size;
                buf[2] = *separation_time;
                3
            }
        };
        CanFrame::new(id, &buf[..len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candrive_hal::CanId;

    #[test]
    fn single_frame_roundtrips() {
        let mut data = Vec::new();
        data.extend_from_slice(&[1, 2, 3]).unwrap();
        let frame = Frame::Single { data };
        let encoded = frame.encode(CanId::Standard(0x100));
        assert_eq!(Frame::decode(&encoded), Some(frame));
    }

    #[test]
    fn first_frame_roundtrips() {
        let mut data = Vec::new();
        data.extend_from_slice(&[1, 2, 3, 4, 5, 6]).unwrap();
        let frame = Frame::First {
            total_size: 300,
            data,
        };
        let encoded = frame.encode(CanId::Standard(0x100));
        assert_eq!(Frame::decode(&encoded), Some(frame));
    }

    #[test]
    fn consecutive_frame_roundtrips() {
        let mut data = Vec::new();
        data.extend_from_slice(&[9, 9, 9]).unwrap();
        let frame = Frame::Consecutive {
            sequence_number: 3,
            data,
        };
        let encoded = frame.encode(CanId::Standard(0x100));
        assert_eq!(Frame::decode(&encoded), Some(frame));
    }

    #[test]
    fn flow_control_roundtrips() {
        let frame = Frame::FlowControl {
            status: FlowStatus::Wait,
            block_size: 8,
            separation_time: 20,
        };
        let encoded = frame.encode(CanId::Standard(0x100));
        assert_eq!(Frame::decode(&encoded), Some(frame));
    }

    #[test]
    fn single_frame_with_zero_size_is_rejected() {
        let encoded = CanFrame::new(CanId::Standard(0x100), &[0x00]);
        assert_eq!(Frame::decode(&encoded), None);
    }
}

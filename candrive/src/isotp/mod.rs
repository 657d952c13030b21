//! ISO 15765-2 (ISO-TP) transport over classic CAN, carrying payloads
//! larger than a single 8-byte frame.
//!
//! Grounded on `isotp.c`/`isotp.h`: single-frame (SF), first-frame (FF),
//! consecutive-frame (CF) and flow-control (FC) frame types, a receive
//! link that reassembles an incoming multi-frame payload into a
//! [`crate::stream::Stream`], and a send link that paces consecutive
//! frames according to the block size and separation time granted by the
//! peer's flow control.

mod frame;
mod rx;
mod tx;

pub use frame::{Frame, FlowStatus};
pub use rx::RxLink;
pub use tx::TxLink;

/// Maximum payload a single frame (SF) can carry.
pub const SF_DATA_LENGTH: usize = 7;
/// Payload bytes carried by a first frame (FF).
pub const FF_DATA_LENGTH: usize = 6;
/// Payload bytes carried by a consecutive frame (CF).
pub const CF_DATA_LENGTH: usize = 7;
/// Maximum consecutive flow-control "Wait" replies tolerated before a send
/// is aborted.
pub const WF_MAX: u8 = 10;
/// Time allowed between consecutive frames before a receive is abandoned.
pub const CF_TIMEOUT_MS: u32 = 1000;
/// Time allowed waiting for flow control before a send is abandoned.
pub const FC_TIMEOUT_MS: u32 = 1000;
/// Number of frames buffered between the CAN listener and the link's
/// processing loop.
pub const FRAME_BUFFER_SIZE: usize = 5;

/// Outcome reported to a completion callback for a receive or send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    /// The transfer completed successfully.
    Done,
    /// The transfer is still in progress.
    Waiting,
    /// No frame arrived within the expected time.
    Timeout,
    /// A frame was lost or arrived out of sequence.
    LostFrame,
    /// The destination buffer was too small; the transfer was abandoned.
    OverflowAbort,
}

/// Converts a flow control separation-time byte into microseconds,
/// following ISO-TP's two encoding ranges and treating anything else as
/// the conservative default.
pub fn separation_time_to_us(value: u8) -> u32 {
    match value {
        0..=127 => value as u32 * 1000,
        0xF1..=0xF9 => (value - 0xF0) as u32 * 100,
        _ => 10_000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separation_time_milliseconds_range() {
        assert_eq!(separation_time_to_us(0), 0);
        assert_eq!(separation_time_to_us(20), 20_000);
        assert_eq!(separation_time_to_us(127), 127_000);
    }

    #[test]
    fn separation_time_microseconds_range() {
        assert_eq!(separation_time_to_us(0xF1), 100);
        assert_eq!(separation_time_to_us(0xF9), 900);
    }

    #[test]
    fn separation_time_reserved_values_use_default() {
        assert_eq!(separation_time_to_us(200), 10_000);
    }
}

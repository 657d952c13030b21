//! Software CRC-32, replacing the STM32 hardware CRC peripheral.
//!
//! The original firmware fed whole 32-bit words to the STM32 CRC unit,
//! zero-padding a trailing partial word. That peripheral runs
//! CRC-32/MPEG-2 (polynomial `0x04C11DB7`, initial value `0xFFFFFFFF`, no
//! input or output reflection, no final XOR); [`crc::CRC_32_MPEG_2`]
//! reproduces it exactly in software so stored CRCs remain compatible
//! across a firmware update that changes the underlying algorithm from
//! hardware to software.

use crc::{Crc, CRC_32_MPEG_2};

const ALGORITHM: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// Computes the CRC-32/MPEG-2 checksum of `data`, zero-padding a trailing
/// partial 32-bit word the same way the STM32 CRC peripheral's word-at-a-time
/// interface does.
pub fn checksum(data: &[u8]) -> u32 {
    let mut digest = Digest::new();
    digest.update(data);
    digest.finalize()
}

/// Incremental digest, for checksumming data that arrives in chunks.
pub struct Digest {
    inner: crc::Digest<'static, u32>,
    len: usize,
}

impl Digest {
    /// Starts a new incremental checksum.
    pub fn new() -> Self {
        Self {
            inner: ALGORITHM.digest(),
            len: 0,
        }
    }

    /// Feeds more data into the checksum.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.len += data.len();
    }

    /// Finalizes and returns the checksum, zero-padding the final partial
    /// word if the total length fed in was not a multiple of 4 bytes.
    pub fn finalize(mut self) -> u32 {
        let remainder = self.len % 4;
        if remainder != 0 {
            const PADDING: [u8; 4] = [0; 4];
            self.inner.update(&PADDING[..4 - remainder]);
        }
        self.inner.finalize()
    }
}

impl Default for Digest {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_empty_input_is_init_value() {
        // CRC-32/MPEG-2 of an empty message is its initial value.
        assert_eq!(checksum(&[]), 0xFFFF_FFFF);
    }

    #[test]
    fn incremental_matches_oneshot() {
        let data = b"CANDrive firmware";
        let oneshot = checksum(data);
        let mut digest = Digest::new();
        digest.update(&data[..5]);
        digest.update(&data[5..]);
        assert_eq!(digest.finalize(), oneshot);
    }

    #[test]
    fn detects_single_bit_corruption() {
        let mut data = [0x10, 0x20, 0x30, 0x40];
        let good = checksum(&data);
        data[2] ^= 0x01;
        assert_ne!(checksum(&data), good);
    }

    #[test]
    fn unaligned_length_is_zero_padded_to_a_word() {
        assert_eq!(checksum(&[1, 2, 3]), checksum(&[1, 2, 3, 0]));
        assert_eq!(checksum(&[1, 2]), checksum(&[1, 2, 0, 0]));
        assert_eq!(checksum(&[1]), checksum(&[1, 0, 0, 0]));
    }

    #[test]
    fn incremental_padding_applies_once_at_the_end_not_per_chunk() {
        let mut digest = Digest::new();
        digest.update(&[1, 2, 3]);
        digest.update(&[4, 5]);
        // 5 bytes total, padded to 8: [1,2,3,4,5,0,0,0].
        assert_eq!(digest.finalize(), checksum(&[1, 2, 3, 4, 5, 0, 0, 0]));
    }
}

//! Page-addressed access to a [`FlashDevice`], shared by [`crate::nvs`] and
//! [`crate::firmware_manager`].
//!
//! Grounded on `flash.c`: erase one page at a time, program word-aligned
//! ranges with a zero-padded trailing partial word. The original firmware
//! additionally has its NVS module program in half-words directly against
//! the peripheral; here that distinction is pushed down into the board's
//! `FlashDevice` implementation; `FlashRegion` only ever asks for
//! byte-range writes and lets the implementation pick its native
//! granularity (documented in the design ledger).

use candrive_hal::FlashDevice;

/// A byte-addressed window onto a [`FlashDevice`], starting at a fixed base
/// address and spanning a fixed number of pages.
pub struct FlashRegion<F: FlashDevice> {
    device: F,
    base_address: u32,
    page_count: usize,
}

impl<F: FlashDevice> FlashRegion<F> {
    /// Wraps `device`, addressing `page_count` pages starting at
    /// `base_address`.
    pub fn new(device: F, base_address: u32, page_count: usize) -> Self {
        Self {
            device,
            base_address,
            page_count,
        }
    }

    /// Size, in bytes, of the whole region.
    pub fn size(&self) -> usize {
        self.page_count * F::PAGE_SIZE
    }

    /// Number of pages in the region.
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Erases page `index` (`0..page_count()`).
    pub fn erase_page(&mut self, index: usize) -> Result<(), F::Error> {
        debug_assert!(index < self.page_count);
        self.device
            .erase_page(self.base_address + (index * F::PAGE_SIZE) as u32)
    }

    /// Programs `data` at byte offset `offset` from the region's base.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), F::Error> {
        debug_assert!(offset + data.len() <= self.size());
        self.device.write(self.base_address + offset as u32, data)
    }

    /// Reads `buffer.len()` bytes starting at byte offset `offset`.
    pub fn read(&self, offset: usize, buffer: &mut [u8]) {
        debug_assert!(offset + buffer.len() <= self.size());
        self.device.read(self.base_address + offset as u32, buffer);
    }

    /// Index of the page containing byte offset `offset`.
    pub fn page_of(&self, offset: usize) -> usize {
        offset / F::PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;
    use std::vec::Vec;

    struct FakeFlash {
        memory: Vec<u8>,
    }

    impl FakeFlash {
        fn new(size: usize) -> Self {
            Self {
                memory: vec![0xFF; size],
            }
        }
    }

    impl FlashDevice for FakeFlash {
        type Error = ();
        const PAGE_SIZE: usize = 1024;

        fn erase_page(&mut self, address: u32) -> Result<(), Self::Error> {
            let start = address as usize;
            self.memory[start..start + Self::PAGE_SIZE].fill(0xFF);
            Ok(())
        }

        fn write(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error> {
            let start = address as usize;
            self.memory[start..start + data.len()].copy_from_slice(data);
            Ok(())
        }

        fn read(&self, address: u32, buffer: &mut [u8]) {
            let start = address as usize;
            buffer.copy_from_slice(&self.memory[start..start + buffer.len()]);
        }
    }

    #[test]
    fn write_then_read_roundtrips() {
        let mut region = FlashRegion::new(FakeFlash::new(2048), 0, 2);
        region.write(10, &[1, 2, 3]).unwrap();
        let mut out = [0u8; 3];
        region.read(10, &mut out);
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn erase_page_resets_to_erased_value() {
        let mut region = FlashRegion::new(FakeFlash::new(2048), 0, 2);
        region.write(0, &[1, 2, 3]).unwrap();
        region.erase_page(0).unwrap();
        let mut out = [0u8; 3];
        region.read(0, &mut out);
        assert_eq!(out, [0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn page_of_computes_correct_index() {
        let region = FlashRegion::new(FakeFlash::new(2048), 0, 2);
        assert_eq!(region.page_of(0), 0);
        assert_eq!(region.page_of(1023), 0);
        assert_eq!(region.page_of(1024), 1);
    }
}

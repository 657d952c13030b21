//! A log-structured, two-page rotating key/value store over raw flash.
//!
//! Grounded on `nvs.c`. Keys are 32-bit [FNV-1a](fnv1a) hashes of a name
//! string; values are appended to the active page as items until the page
//! runs out of room, at which point the surviving (non-deleted, CRC-valid)
//! items are copied into the other page, which then becomes active with an
//! incremented sequence number.
//!
//! Each page starts with a 12-byte header (`state`, `sequence_number`,
//! `crc`) identifying which of the rotating pages holds the current log.
//! Each item is `hash:u32, size:u16, status:u16, crc:u32` followed by
//! `size` bytes of payload. The stored `crc` covers the hash, size and
//! payload but deliberately excludes `status`, so marking an item deleted
//! (`NVS_Remove`'s in-place status rewrite) never invalidates it.
//!
//! A scan halts at the first item whose CRC does not validate: a blank
//! (erased, `0xFFFF_FFFF`-hash) slot or a torn write both look like CRC
//! failures and both correctly mark the end of the log.

use crate::flash::FlashRegion;
use candrive_hal::FlashDevice;
use heapless::Vec;

const PAGE_IN_USE: u32 = 0x0C00_FFE0;
const PAGE_ERASED: u32 = 0x0000_0000;
const ITEM_USED: u16 = 0xFFFF;
const ITEM_DELETED: u16 = 0x0000;
const BLANK_HASH: u32 = 0xFFFF_FFFF;

const PAGE_HEADER_SIZE: usize = 12;
const ITEM_HEADER_SIZE: usize = 12;

/// Maximum payload size, in bytes, of a single stored value.
pub const MAX_VALUE_SIZE: usize = 32;
/// Maximum number of items tracked per page during a scan or rotation.
pub const MAX_ITEMS_PER_PAGE: usize = 64;

/// FNV-1a hash of `name`, used as the item key.
pub fn hash_key(name: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 2_166_136_261;
    const PRIME: u32 = 16_777_619;
    let mut hash = OFFSET_BASIS;
    for &byte in name {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Errors produced by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NvsError {
    /// No page has enough free room even after rotating.
    Full,
    /// The underlying flash device reported a write/erase failure.
    Flash,
    /// A value exceeds [`MAX_VALUE_SIZE`].
    ValueTooLarge,
    /// More items are live on a page than [`MAX_ITEMS_PER_PAGE`] can track.
    TooManyItems,
    /// No item matched the requested key.
    NotFound,
}

struct ItemRecord {
    offset: usize,
    hash: u32,
    status: u16,
    size: u16,
}

/// A two-page rotating key/value store.
pub struct Nvs<F: FlashDevice> {
    region: FlashRegion<F>,
    active_page: usize,
    write_offset: usize,
}

impl<F: FlashDevice> Nvs<F> {
    /// Mounts the store, scanning both pages of `region` for the one
    /// holding the most recent valid log (highest `sequence_number` with a
    /// valid header CRC). If neither page is valid, page 0 is erased and
    /// reinitialized as an empty log.
    pub fn init(mut region: FlashRegion<F>) -> Result<Self, NvsError> {
        let page_count = region.page_count();
        let mut best: Option<(usize, u32)> = None;
        for page in 0..page_count {
            if let Some(seq) = Self::read_valid_header(&region, page) {
                if best.map_or(true, |(_, best_seq)| seq > best_seq) {
                    best = Some((page, seq));
                }
            }
        }

        let active_page = match best {
            Some((page, _)) => page,
            None => {
                region.erase_page(0).map_err(|_| NvsError::Flash)?;
                Self::write_header(&mut region, 0, 1)?;
                0
            }
        };

        let write_offset = Self::scan(&region, active_page, |_| {})? + PAGE_HEADER_SIZE;
        Ok(Self {
            region,
            active_page,
            write_offset,
        })
    }

    /// Stores `value` under `hash`, rotating to the other page first if the
    /// active page lacks room.
    pub fn store(&mut self, hash: u32, value: &[u8]) -> Result<(), NvsError> {
        if value.len() > MAX_VALUE_SIZE {
            return Err(NvsError::ValueTooLarge);
        }
        let needed = ITEM_HEADER_SIZE + value.len();
        if self.write_offset + needed > self.region.size() / self.region.page_count() {
            self.rotate()?;
        }
        if self.write_offset + needed > self.page_capacity() {
            defmt::warn!("nvs: store failed, page full even after rotation");
            return Err(NvsError::Full);
        }
        self.append_item(hash, value)
    }

    /// Returns the most recently stored, non-deleted value for `hash`, if
    /// any.
    pub fn retrieve(&self, hash: u32) -> Result<Option<Vec<u8, MAX_VALUE_SIZE>>, NvsError> {
        let mut found: Option<Vec<u8, MAX_VALUE_SIZE>> = None;
        Self::scan(&self.region, self.active_page, |item| {
            if item.hash == hash && item.status == ITEM_USED {
                let mut buf = Vec::new();
                let mut tmp = [0u8; MAX_VALUE_SIZE];
                let payload = &mut tmp[..item.size as usize];
                self.region.read(
                    self.page_base(self.active_page) + item.offset + ITEM_HEADER_SIZE,
                    payload,
                );
                buf.extend_from_slice(payload).ok();
                found = Some(buf);
            }
        })?;
        Ok(found)
    }

    /// Marks the most recently stored value for `hash` as deleted, if one
    /// exists.
    pub fn remove(&mut self, hash: u32) -> Result<(), NvsError> {
        let mut last_offset: Option<usize> = None;
        Self::scan(&self.region, self.active_page, |item| {
            if item.hash == hash && item.status == ITEM_USED {
                last_offset = Some(item.offset);
            }
        })?;

        let Some(offset) = last_offset else {
            return Err(NvsError::NotFound);
        };
        let status = ITEM_DELETED.to_le_bytes();
        self.region
            .write(self.page_base(self.active_page) + offset + 6, &status)
            .map_err(|_| NvsError::Flash)?;
        Ok(())
    }

    /// Erases every page and reinitializes the log from scratch.
    pub fn clear(&mut self) -> Result<(), NvsError> {
        for page in 0..self.region.page_count() {
            self.region.erase_page(page).map_err(|_| NvsError::Flash)?;
        }
        Self::write_header(&mut self.region, 0, 1)?;
        self.active_page = 0;
        self.write_offset = PAGE_HEADER_SIZE;
        Ok(())
    }

    fn page_capacity(&self) -> usize {
        self.region.size() / self.region.page_count()
    }

    fn page_base(&self, page: usize) -> usize {
        page * self.page_capacity()
    }

    fn append_item(&mut self, hash: u32, value: &[u8]) -> Result<(), NvsError> {
        let mut digest = crate::crc::Digest::new();
        digest.update(&hash.to_le_bytes());
        digest.update(&(value.len() as u16).to_le_bytes());
        digest.update(value);
        let crc = digest.finalize();

        let mut header = [0u8; ITEM_HEADER_SIZE];
        header[0..4].copy_from_slice(&hash.to_le_bytes());
        header[4..6].copy_from_slice(&(value.len() as u16).to_le_bytes());
        header[6..8].copy_from_slice(&ITEM_USED.to_le_bytes());
        header[8..12].copy_from_slice(&crc.to_le_bytes());

        let base = self.page_base(self.active_page) + self.write_offset;
        self.region.write(base, &header).map_err(|_| NvsError::Flash)?;
        self.region
            .write(base + ITEM_HEADER_SIZE, value)
            .map_err(|_| NvsError::Flash)?;
        self.write_offset += ITEM_HEADER_SIZE + value.len();
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), NvsError> {
        defmt::debug!("nvs: rotating active page");
        let old_page = self.active_page;
        let new_page = (old_page + 1) % self.region.page_count();
        let old_seq = Self::read_valid_header(&self.region, old_page).unwrap_or(0);

        self.region
            .erase_page(new_page)
            .map_err(|_| NvsError::Flash)?;
        Self::write_header(&mut self.region, new_page, old_seq.wrapping_add(1))?;

        let mut records: Vec<ItemRecord, MAX_ITEMS_PER_PAGE> = Vec::new();
        Self::scan(&self.region, old_page, |item| {
            records
                .push(ItemRecord {
                    offset: item.offset,
                    hash: item.hash,
                    status: item.status,
                    size: item.size,
                })
                .ok();
        })?;

        self.active_page = new_page;
        self.write_offset = PAGE_HEADER_SIZE;

        let mut seen: Vec<u32, MAX_ITEMS_PER_PAGE> = Vec::new();
        for record in records.iter().rev() {
            if record.status != ITEM_USED {
                continue;
            }
            if seen.contains(&record.hash) {
                continue;
            }
            seen.push(record.hash).ok();

            let mut tmp = [0u8; MAX_VALUE_SIZE];
            let payload = &mut tmp[..record.size as usize];
            self.region.read(
                self.page_base(old_page) + record.offset + ITEM_HEADER_SIZE,
                payload,
            );
            self.append_item(record.hash, payload)?;
        }
        Ok(())
    }

    fn read_valid_header(region: &FlashRegion<F>, page: usize) -> Option<u32> {
        let base = page * (region.size() / region.page_count());
        let mut raw = [0u8; PAGE_HEADER_SIZE];
        region.read(base, &mut raw);
        let state = u32::from_le_bytes(raw[0..4].try_into().unwrap());
        let sequence_number = u32::from_le_bytes(raw[4..8].try_into().unwrap());
        let crc = u32::from_le_bytes(raw[8..12].try_into().unwrap());

        if state != PAGE_IN_USE {
            return None;
        }
        if crate::crc::checksum(&raw[0..8]) != crc {
            return None;
        }
        let _ = PAGE_ERASED;
        Some(sequence_number)
    }

    fn write_header(
        region: &mut FlashRegion<F>,
        page: usize,
        sequence_number: u32,
    ) -> Result<(), NvsError> {
        let page_capacity = region.size() / region.page_count();
        let base = page * page_capacity;
        let mut raw = [0u8; PAGE_HEADER_SIZE];
        raw[0..4].copy_from_slice(&PAGE_IN_USE.to_le_bytes());
        raw[4..8].copy_from_slice(&sequence_number.to_le_bytes());
        let crc = crate::crc::checksum(&raw[0..8]);
        raw[8..12].copy_from_slice(&crc.to_le_bytes());
        region.write(base, &raw).map_err(|_| NvsError::Flash)
    }

    /// Scans the log on `page`, calling `visit` for every structurally
    /// valid item (valid CRC, regardless of status) in log order, and
    /// returning the byte offset (relative to the end of the page header)
    /// at which the next item would be appended.
    fn scan(
        region: &FlashRegion<F>,
        page: usize,
        mut visit: impl FnMut(ScannedItem),
    ) -> Result<usize, NvsError> {
        let page_capacity = region.size() / region.page_count();
        let base = page * page_capacity;
        let mut offset = PAGE_HEADER_SIZE;

        loop {
            if offset + ITEM_HEADER_SIZE > page_capacity {
                break;
            }
            let mut raw = [0u8; ITEM_HEADER_SIZE];
            region.read(base + offset, &mut raw);
            let hash = u32::from_le_bytes(raw[0..4].try_into().unwrap());
            let size = u16::from_le_bytes(raw[4..6].try_into().unwrap());
            let status = u16::from_le_bytes(raw[6..8].try_into().unwrap());
            let crc = u32::from_le_bytes(raw[8..12].try_into().unwrap());

            if hash == BLANK_HASH && size == 0xFFFF {
                break;
            }
            if offset + ITEM_HEADER_SIZE + size as usize > page_capacity {
                break;
            }

            let mut payload = [0u8; MAX_VALUE_SIZE];
            let payload = &mut payload[..size as usize];
            region.read(base + offset + ITEM_HEADER_SIZE, payload);

            let mut digest = crate::crc::Digest::new();
            digest.update(&raw[0..6]);
            digest.update(payload);
            if digest.finalize() != crc {
                break;
            }

            visit(ScannedItem {
                offset,
                hash,
                status,
                size,
            });
            offset += ITEM_HEADER_SIZE + size as usize;
        }

        Ok(offset - PAGE_HEADER_SIZE)
    }
}

struct ScannedItem {
    offset: usize,
    hash: u32,
    status: u16,
    size: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;
    use std::vec::Vec as StdVec;

    struct FakeFlash {
        memory: StdVec<u8>,
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
        const PAGE_SIZE: usize = 256;

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

    fn fresh_nvs() -> Nvs<FakeFlash> {
        let region = FlashRegion::new(FakeFlash::new(512), 0, 2);
        Nvs::init(region).unwrap()
    }

    #[test]
    fn store_then_retrieve_roundtrips() {
        let mut nvs = fresh_nvs();
        let key = hash_key(b"speed_limit");
        nvs.store(key, &42u32.to_le_bytes()).unwrap();
        let value = nvs.retrieve(key).unwrap().unwrap();
        assert_eq!(u32::from_le_bytes(value.as_slice().try_into().unwrap()), 42);
    }

    #[test]
    fn retrieve_of_missing_key_is_none() {
        let nvs = fresh_nvs();
        assert_eq!(nvs.retrieve(hash_key(b"missing")).unwrap(), None);
    }

    #[test]
    fn later_store_shadows_earlier_one() {
        let mut nvs = fresh_nvs();
        let key = hash_key(b"k");
        nvs.store(key, &1u32.to_le_bytes()).unwrap();
        nvs.store(key, &2u32.to_le_bytes()).unwrap();
        let value = nvs.retrieve(key).unwrap().unwrap();
        assert_eq!(u32::from_le_bytes(value.as_slice().try_into().unwrap()), 2);
    }

    #[test]
    fn remove_hides_the_value() {
        let mut nvs = fresh_nvs();
        let key = hash_key(b"k");
        nvs.store(key, &1u32.to_le_bytes()).unwrap();
        nvs.remove(key).unwrap();
        assert_eq!(nvs.retrieve(key).unwrap(), None);
    }

    #[test]
    fn rotation_preserves_latest_values_across_pages() {
        let mut nvs = fresh_nvs();
        let keep = hash_key(b"keep");
        nvs.store(keep, &7u32.to_le_bytes()).unwrap();
        // Fill the active page with filler items until rotation occurs.
        for i in 0..40u32 {
            nvs.store(hash_key(b"filler"), &i.to_le_bytes()).unwrap();
        }
        let value = nvs.retrieve(keep).unwrap().unwrap();
        assert_eq!(u32::from_le_bytes(value.as_slice().try_into().unwrap()), 7);
    }

    #[test]
    fn clear_removes_all_values() {
        let mut nvs = fresh_nvs();
        let key = hash_key(b"k");
        nvs.store(key, &1u32.to_le_bytes()).unwrap();
        nvs.clear().unwrap();
        assert_eq!(nvs.retrieve(key).unwrap(), None);
    }

    #[test]
    fn hash_is_stable_and_order_sensitive() {
        assert_eq!(hash_key(b"abc"), hash_key(b"abc"));
        assert_ne!(hash_key(b"abc"), hash_key(b"cba"));
    }
}

//! Firmware update state machine.
//!
//! Grounded on `firmware_manager.c`/`firmware_manager.h`: a message, once
//! reassembled off an ISO-TP link and handed to [`FirmwareManager::handle_message`],
//! is dispatched by [`protocol::MessageType`]. `ReqFwHeader` validates and
//! stages a new image's transfer header before any flash is touched;
//! `ReqFwData` streams the body in, erasing each page lazily the first
//! time it is written to; `ReqReset`/`ReqUpdate` are gated by
//! caller-supplied predicates (`action_checks`), matching the variant that
//! lets the application veto a reset or update while a motor is active.
//! `ReqFwHeader` re-checks `update_allowed` independently of `ReqUpdate`,
//! the same way the original re-checks its action predicate rather than
//! trusting a state transition from earlier in the session.

pub mod protocol;

use crate::flash::FlashRegion;
use candrive_hal::FlashDevice;
use protocol::{FirmwareImage, FirmwareInfo, MessageHeader, MessageType};

/// Maximum number of bytes accepted in one `ReqFwData` payload.
pub const MAX_CHUNK_SIZE: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    AwaitingHeader,
    ReceivingData { expected: u32, received: u32 },
}

/// Predicates gating reset and update requests, so an active motor
/// controller can veto either action.
#[derive(Default, Clone, Copy)]
pub struct ActionChecks {
    /// Called for `ReqReset`; defaults to always allowed if unset.
    pub reset_allowed: Option<fn() -> bool>,
    /// Called for `ReqUpdate` and again for `ReqFwHeader`; defaults to
    /// always allowed if unset.
    pub update_allowed: Option<fn() -> bool>,
}

/// Errors reported while handling an update message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The payload's checksum did not match the message header.
    PayloadCorrupt,
    /// A request arrived while the state machine was not expecting it.
    UnexpectedRequest,
    /// The requested action was vetoed by an action check.
    ActionDenied,
    /// The staged image is larger than the update region.
    ImageTooLarge,
    /// The underlying flash device reported a failure.
    Flash,
}

/// Tracks and applies an in-progress firmware update.
pub struct FirmwareManager<F: FlashDevice> {
    region: FlashRegion<F>,
    state: State,
    pending_image: Option<FirmwareImage>,
    action_checks: ActionChecks,
    reset_requested: bool,
    firmware_was_updated: bool,
    identity: FirmwareInfo,
}

impl<F: FlashDevice> FirmwareManager<F> {
    /// Creates a manager writing updates into `region`, reporting
    /// `identity` in response to `ReqFwInfo`.
    pub fn new(region: FlashRegion<F>, identity: FirmwareInfo) -> Self {
        Self {
            region,
            state: State::Idle,
            pending_image: None,
            action_checks: ActionChecks::default(),
            reset_requested: false,
            firmware_was_updated: false,
            identity,
        }
    }

    /// Installs predicates vetoing reset/update requests.
    pub fn set_action_checks(&mut self, checks: ActionChecks) {
        self.action_checks = checks;
    }

    /// `true` once an update session has begun (from `ReqUpdate` up to
    /// completion or an error).
    pub fn active(&self) -> bool {
        self.state != State::Idle
    }

    /// `true` while actively receiving image bytes.
    pub fn download_active(&self) -> bool {
        matches!(self.state, State::ReceivingData { .. })
    }

    /// `true` if `ReqReset` was granted and the caller should now reset
    /// the device.
    pub fn reset_requested(&self) -> bool {
        self.reset_requested
    }

    /// `true` once a `ReqFwData` stream has fully landed a new image.
    pub fn firmware_was_updated(&self) -> bool {
        self.firmware_was_updated
    }

    /// Dispatches one reassembled protocol message. `header_bytes` and
    /// `payload` come from a completed ISO-TP receive. Returns the payload
    /// of a reply to send back, if any.
    pub fn handle_message(
        &mut self,
        header_bytes: &[u8; protocol::MESSAGE_HEADER_SIZE],
        payload: &[u8],
    ) -> Result<Option<heapless::Vec<u8, { protocol::FIRMWARE_INFO_SIZE }>>, Error> {
        let header = MessageHeader::decode(header_bytes).ok_or(Error::PayloadCorrupt)?;
        if header.size as usize != payload.len() || crate::crc::checksum(payload) != header.payload_crc {
            return Err(Error::PayloadCorrupt);
        }

        match header.message_type {
            MessageType::ReqFwInfo => Ok(Some(self.identity.encode())),
            MessageType::ReqReset => {
                if !self.action_checks.reset_allowed.map_or(true, |f| f()) {
                    return Err(Error::ActionDenied);
                }
                self.reset_requested = true;
                Ok(None)
            }
            MessageType::ReqUpdate => {
                if !self.action_checks.update_allowed.map_or(true, |f| f()) {
                    return Err(Error::ActionDenied);
                }
                self.state = State::AwaitingHeader;
                Ok(None)
            }
            MessageType::ReqFwHeader => {
                self.on_firmware_header(payload)?;
                Ok(None)
            }
            MessageType::ReqFwData => {
                self.on_firmware_data(payload)?;
                Ok(None)
            }
        }
    }

    fn on_firmware_header(&mut self, payload: &[u8]) -> Result<(), Error> {
        if self.state != State::AwaitingHeader {
            return Err(Error::UnexpectedRequest);
        }
        if !self.action_checks.update_allowed.map_or(true, |f| f()) {
            return Err(Error::ActionDenied);
        }
        if payload.len() != protocol::FIRMWARE_IMAGE_SIZE {
            return Err(Error::PayloadCorrupt);
        }
        let image = FirmwareImage::decode(payload.try_into().unwrap());
        if image.size as usize > self.region.size() {
            return Err(Error::ImageTooLarge);
        }

        if self.region.erase_page(0).is_err() {
            return Err(self.abort_on_flash_failure());
        }
        self.pending_image = Some(image);
        self.state = State::ReceivingData {
            expected: image.size,
            received: 0,
        };
        Ok(())
    }

    fn on_firmware_data(&mut self, payload: &[u8]) -> Result<(), Error> {
        let State::ReceivingData { expected, received } = self.state else {
            return Err(Error::UnexpectedRequest);
        };
        if payload.len() > MAX_CHUNK_SIZE {
            return Err(Error::PayloadCorrupt);
        }

        let page_before = self.region.page_of(received as usize);
        if self.region.write(received as usize, payload).is_err() {
            return Err(self.abort_on_flash_failure());
        }
        let new_received = received + payload.len() as u32;
        let page_after = self.region.page_of(new_received as usize);
        if page_after > page_before && (new_received as usize) < self.region.size() {
            if self.region.erase_page(page_after).is_err() {
                return Err(self.abort_on_flash_failure());
            }
        }

        if new_received >= expected {
            self.state = State::Idle;
            self.firmware_was_updated = true;
            self.pending_image = None;
        } else {
            self.state = State::ReceivingData {
                expected,
                received: new_received,
            };
        }
        Ok(())
    }

    /// Erase-before-write policy: any flash failure abandons the in-progress
    /// transfer and returns the manager to `Idle` rather than leaving it
    /// stuck mid-session.
    fn abort_on_flash_failure(&mut self) -> Error {
        defmt::error!("firmware_manager: flash operation failed, aborting update");
        self.state = State::Idle;
        self.pending_image = None;
        Error::Flash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{ImageHeader, ImageType};
    use std::vec;
    use std::vec::Vec;

    struct FakeFlash {
        memory: Vec<u8>,
        erase_fails: bool,
        write_fails: bool,
    }

    impl FlashDevice for FakeFlash {
        type Error = ();
        const PAGE_SIZE: usize = 64;

        fn erase_page(&mut self, address: u32) -> Result<(), Self::Error> {
            if self.erase_fails {
                return Err(());
            }
            let start = address as usize;
            self.memory[start..start + Self::PAGE_SIZE].fill(0xFF);
            Ok(())
        }

        fn write(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error> {
            if self.write_fails {
                return Err(());
            }
            let start = address as usize;
            self.memory[start..start + data.len()].copy_from_slice(data);
            Ok(())
        }

        fn read(&self, address: u32, buffer: &mut [u8]) {
            let start = address as usize;
            buffer.copy_from_slice(&self.memory[start..start + buffer.len()]);
        }
    }

    fn identity() -> FirmwareInfo {
        let installed = ImageHeader {
            header_version: 1,
            crc: 0,
            size: 0,
            image_type: ImageType::Application,
            version: [0u8; 32],
            vector_address: 0x0800_4200,
            git_sha: [0u8; 14],
        };
        FirmwareInfo::from_installed(&installed, 1, [0, 0, 0])
    }

    fn manager() -> FirmwareManager<FakeFlash> {
        manager_with_flash(FakeFlash {
            memory: vec![0xFF; 256],
            erase_fails: false,
            write_fails: false,
        })
    }

    fn manager_with_flash(flash: FakeFlash) -> FirmwareManager<FakeFlash> {
        let region = FlashRegion::new(flash, 0, 4);
        FirmwareManager::new(region, identity())
    }

    fn message(message_type: MessageType, payload: &[u8]) -> ([u8; protocol::MESSAGE_HEADER_SIZE], Vec<u8>) {
        let header = MessageHeader {
            message_type,
            size: payload.len() as u32,
            payload_crc: crate::crc::checksum(payload),
        };
        (header.encode(), payload.to_vec())
    }

    #[test]
    fn req_fw_info_replies_with_identity() {
        let mut mgr = manager();
        let (header, payload) = message(MessageType::ReqFwInfo, &[]);
        let reply = mgr.handle_message(&header, &payload).unwrap();
        assert!(reply.is_some());
    }

    #[test]
    fn update_session_requires_req_update_before_header() {
        let mut mgr = manager();
        let image = FirmwareImage {
            version: 2,
            size: 10,
            crc: crate::crc::checksum(&[0u8; 10]),
        }
        .encode();
        let (header, payload) = message(MessageType::ReqFwHeader, &image);
        assert_eq!(
            mgr.handle_message(&header, &payload),
            Err(Error::UnexpectedRequest)
        );
    }

    #[test]
    fn firmware_header_rechecks_update_allowed_independently() {
        let mut mgr = manager();
        let (header, payload) = message(MessageType::ReqUpdate, &[]);
        mgr.handle_message(&header, &payload).unwrap();

        mgr.set_action_checks(ActionChecks {
            reset_allowed: None,
            update_allowed: Some(|| false),
        });
        let image = FirmwareImage {
            version: 2,
            size: 10,
            crc: crate::crc::checksum(&[0u8; 10]),
        }
        .encode();
        let (header, payload) = message(MessageType::ReqFwHeader, &image);
        assert_eq!(
            mgr.handle_message(&header, &payload),
            Err(Error::ActionDenied)
        );
    }

    #[test]
    fn full_update_session_lands_image_and_reports_update() {
        let mut mgr = manager();
        let (header, payload) = message(MessageType::ReqUpdate, &[]);
        mgr.handle_message(&header, &payload).unwrap();

        let body = [0xAAu8; 10];
        let image = FirmwareImage {
            version: 2,
            size: 10,
            crc: crate::crc::checksum(&body),
        }
        .encode();
        let (header, payload) = message(MessageType::ReqFwHeader, &image);
        mgr.handle_message(&header, &payload).unwrap();
        assert!(mgr.download_active());

        let (header, payload) = message(MessageType::ReqFwData, &body);
        mgr.handle_message(&header, &payload).unwrap();

        assert!(!mgr.download_active());
        assert!(mgr.firmware_was_updated());
    }

    #[test]
    fn reset_denied_by_action_check_is_not_requested() {
        let mut mgr = manager();
        mgr.set_action_checks(ActionChecks {
            reset_allowed: Some(|| false),
            update_allowed: None,
        });
        let (header, payload) = message(MessageType::ReqReset, &[]);
        assert_eq!(
            mgr.handle_message(&header, &payload),
            Err(Error::ActionDenied)
        );
        assert!(!mgr.reset_requested());
    }

    #[test]
    fn erase_failure_on_header_returns_manager_to_idle() {
        let mut mgr = manager_with_flash(FakeFlash {
            memory: vec![0xFF; 256],
            erase_fails: true,
            write_fails: false,
        });
        let (header, payload) = message(MessageType::ReqUpdate, &[]);
        mgr.handle_message(&header, &payload).unwrap();

        let image = FirmwareImage {
            version: 2,
            size: 10,
            crc: crate::crc::checksum(&[0u8; 10]),
        }
        .encode();
        let (header, payload) = message(MessageType::ReqFwHeader, &image);
        assert_eq!(mgr.handle_message(&header, &payload), Err(Error::Flash));
        assert!(!mgr.active());

        // The manager did not get stuck in AwaitingHeader: ReqUpdate works again.
        let (header, payload) = message(MessageType::ReqUpdate, &[]);
        assert!(mgr.handle_message(&header, &payload).is_ok());
    }

    #[test]
    fn write_failure_on_data_returns_manager_to_idle() {
        let mut mgr = manager_with_flash(FakeFlash {
            memory: vec![0xFF; 256],
            erase_fails: false,
            write_fails: true,
        });
        let (header, payload) = message(MessageType::ReqUpdate, &[]);
        mgr.handle_message(&header, &payload).unwrap();

        let body = [0xAAu8; 10];
        let image = FirmwareImage {
            version: 2,
            size: 10,
            crc: crate::crc::checksum(&body),
        }
        .encode();
        let (header, payload) = message(MessageType::ReqFwHeader, &image);
        mgr.handle_message(&header, &payload).unwrap();

        let (header, payload) = message(MessageType::ReqFwData, &body);
        assert_eq!(mgr.handle_message(&header, &payload), Err(Error::Flash));
        assert!(!mgr.active());
        assert!(!mgr.download_active());
    }

    #[test]
    fn corrupted_payload_is_rejected() {
        let mut mgr = manager();
        let (header, mut payload) = message(MessageType::ReqFwInfo, &[1, 2, 3]);
        payload[0] ^= 0xFF;
        assert_eq!(
            mgr.handle_message(&header, &payload),
            Err(Error::PayloadCorrupt)
        );
    }
}

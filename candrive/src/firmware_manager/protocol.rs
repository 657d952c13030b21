//! Wire format for the firmware update protocol, carried over an ISO-TP
//! link.
//!
//! Grounded on `protocol.h`. Every message starts with a 16-byte
//! `MessageHeader`; `ReqFwHeader` carries a 12-byte [`FirmwareImage`] as its
//! payload (the compact transfer-time header, distinct from the richer
//! [`crate::image::ImageHeader`] baked into the image itself), and the
//! device replies to `ReqFwInfo` with a fixed-layout [`FirmwareInfo`].

use crate::image::ImageHeader;

/// Size, in bytes, of an encoded [`MessageHeader`].
pub const MESSAGE_HEADER_SIZE: usize = 16;

/// Request message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Request the device's identity and currently installed version.
    ReqFwInfo,
    /// Request an immediate reset.
    ReqReset,
    /// Begin a firmware update session.
    ReqUpdate,
    /// Send the new image's transfer header, to be validated before any
    /// flash is erased.
    ReqFwHeader,
    /// Send one chunk of the new image's body.
    ReqFwData,
}

impl MessageType {
    fn to_u32(self) -> u32 {
        match self {
            MessageType::ReqFwInfo => 0,
            MessageType::ReqReset => 1,
            MessageType::ReqUpdate => 2,
            MessageType::ReqFwHeader => 3,
            MessageType::ReqFwData => 4,
        }
    }

    fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(MessageType::ReqFwInfo),
            1 => Some(MessageType::ReqReset),
            2 => Some(MessageType::ReqUpdate),
            3 => Some(MessageType::ReqFwHeader),
            4 => Some(MessageType::ReqFwData),
            _ => None,
        }
    }
}

/// The header prepended to every protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// The message's type.
    pub message_type: MessageType,
    /// Size, in bytes, of the payload following this header.
    pub size: u32,
    /// CRC-32/MPEG-2 of the payload.
    pub payload_crc: u32,
}

impl MessageHeader {
    /// Decodes a header, verifying its own CRC (the last 4 bytes, covering
    /// the first 12). Returns `None` on a CRC mismatch or unknown type.
    pub fn decode(bytes: &[u8; MESSAGE_HEADER_SIZE]) -> Option<Self> {
        let header_crc = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        if crate::crc::checksum(&bytes[0..12]) != header_crc {
            return None;
        }
        let message_type = MessageType::from_u32(u32::from_le_bytes(bytes[0..4].try_into().unwrap()))?;
        Some(Self {
            message_type,
            size: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            payload_crc: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
        })
    }

    /// Encodes this header, computing and appending its own CRC.
    pub fn encode(&self) -> [u8; MESSAGE_HEADER_SIZE] {
        let mut out = [0u8; MESSAGE_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.message_type.to_u32().to_le_bytes());
        out[4..8].copy_from_slice(&self.size.to_le_bytes());
        out[8..12].copy_from_slice(&self.payload_crc.to_le_bytes());
        let header_crc = crate::crc::checksum(&out[0..12]);
        out[12..16].copy_from_slice(&header_crc.to_le_bytes());
        out
    }
}

/// Size, in bytes, of an encoded [`FirmwareImage`].
pub const FIRMWARE_IMAGE_SIZE: usize = 12;

/// The compact header sent ahead of an image's body during a `ReqFwHeader`
/// exchange, as opposed to [`crate::image::ImageHeader`] which is baked
/// into the image itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareImage {
    /// Numeric version of the incoming image.
    pub version: u32,
    /// Size, in bytes, of the image body that will follow over `ReqFwData`.
    pub size: u32,
    /// CRC-32/MPEG-2 of the image body.
    pub crc: u32,
}

impl FirmwareImage {
    /// Decodes a transfer header from its little-endian wire representation.
    pub fn decode(bytes: &[u8; FIRMWARE_IMAGE_SIZE]) -> Self {
        Self {
            version: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            size: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            crc: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
        }
    }

    /// Encodes this transfer header to its little-endian wire
    /// representation.
    pub fn encode(&self) -> [u8; FIRMWARE_IMAGE_SIZE] {
        let mut out = [0u8; FIRMWARE_IMAGE_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..8].copy_from_slice(&self.size.to_le_bytes());
        out[8..12].copy_from_slice(&self.crc.to_le_bytes());
        out
    }

    /// `true` if `body` is `size` bytes long and checksums to `crc`.
    pub fn validates(&self, body: &[u8]) -> bool {
        body.len() as u32 == self.size && crate::crc::checksum(body) == self.crc
    }
}

/// Size, in bytes, of an encoded [`FirmwareInfo`] reply.
pub const FIRMWARE_INFO_SIZE: usize = 4 + 32 + 4 + 16 + 12 + 14;

/// Identity and version information returned for `ReqFwInfo`.
///
/// `version` and `name` are ASCII text, not numeric fields: `version` is
/// copied from the installed image's own [`crate::image::ImageHeader::version`],
/// and `name` reports the image type (`"Application"`/`"Bootloader"`)
/// rather than a board name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareInfo {
    /// Installed image's version string, NUL-padded.
    pub version: [u8; 32],
    /// Board hardware revision.
    pub hardware_revision: u32,
    /// Installed image's type, as text ("Application"/"Bootloader"),
    /// NUL-padded.
    pub name: [u8; 16],
    /// Device-unique identifier (e.g. MCU unique ID words).
    pub id: [u32; 3],
    /// Git commit the firmware was built from, as ASCII hex.
    pub git_sha: [u8; 14],
}

impl FirmwareInfo {
    /// Builds a reply from the image header actually installed, plus the
    /// board-level identity fields that don't live in the image itself.
    pub fn from_installed(header: &ImageHeader, hardware_revision: u32, id: [u32; 3]) -> Self {
        let mut name = [0u8; 16];
        let type_name = header.image_type.as_str().as_bytes();
        let len = type_name.len().min(name.len());
        name[..len].copy_from_slice(&type_name[..len]);

        Self {
            version: header.version,
            hardware_revision,
            name,
            id,
            git_sha: header.git_sha,
        }
    }

    /// Encodes this reply to its little-endian wire representation.
    ///
    /// The leading field is the `ReqFwInfo` message type, matching the
    /// layout `message_header_t` shares with every other reply.
    pub fn encode(&self) -> heapless::Vec<u8, FIRMWARE_INFO_SIZE> {
        let mut out = heapless::Vec::new();
        out.extend_from_slice(&MessageType::ReqFwInfo.to_u32().to_le_bytes()).ok();
        out.extend_from_slice(&self.version).ok();
        out.extend_from_slice(&self.hardware_revision.to_le_bytes()).ok();
        out.extend_from_slice(&self.name).ok();
        for word in self.id {
            out.extend_from_slice(&word.to_le_bytes()).ok();
        }
        out.extend_from_slice(&self.git_sha).ok();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageType;

    #[test]
    fn message_header_roundtrips() {
        let header = MessageHeader {
            message_type: MessageType::ReqFwData,
            size: 128,
            payload_crc: 0x1234_5678,
        };
        assert_eq!(MessageHeader::decode(&header.encode()), Some(header));
    }

    #[test]
    fn message_header_rejects_corrupted_crc() {
        let header = MessageHeader {
            message_type: MessageType::ReqFwData,
            size: 128,
            payload_crc: 0x1234_5678,
        };
        let mut encoded = header.encode();
        encoded[0] ^= 0xFF;
        assert_eq!(MessageHeader::decode(&encoded), None);
    }

    #[test]
    fn firmware_image_roundtrips_and_validates_body() {
        let body = [0xAAu8; 10];
        let image = FirmwareImage {
            version: 2,
            size: 10,
            crc: crate::crc::checksum(&body),
        };
        assert_eq!(FirmwareImage::decode(&image.encode()), image);
        assert!(image.validates(&body));
    }

    fn installed_header() -> ImageHeader {
        let mut version = [0u8; 32];
        version[..3].copy_from_slice(b"1.4");
        ImageHeader {
            header_version: 1,
            crc: 0,
            size: 0,
            image_type: ImageType::Application,
            version,
            vector_address: 0x0800_4200,
            git_sha: [0u8; 14],
        }
    }

    #[test]
    fn firmware_info_carries_version_string_and_image_type_name() {
        let info = FirmwareInfo::from_installed(&installed_header(), 2, [1, 2, 3]);
        assert_eq!(&info.version[..3], b"1.4");
        assert_eq!(&info.name[.."Application".len()], b"Application");
    }

    #[test]
    fn firmware_info_encodes_fixed_size() {
        let info = FirmwareInfo::from_installed(&installed_header(), 2, [1, 2, 3]);
        assert_eq!(info.encode().len(), FIRMWARE_INFO_SIZE);
    }
}

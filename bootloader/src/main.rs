//! CANDrive bootloader binary: validates the installed application image
//! and either hands over to it or services the firmware update protocol
//! to install a new one.
//!
//! Grounded on the top-level bootloader `main.c` loop and `image.c`'s
//! `Image_IsValid`: at boot, the installed application's
//! [`candrive::image::ImageHeader`] is checked for a valid magic and CRC.
//! If valid, and the application did not request an update on its last
//! boot (`NvCom`'s `request_firmware_update` flag), control transfers to
//! it. Otherwise the bootloader stays resident, driving the same firmware
//! update protocol the application itself can serve, until a reset is
//! requested. [`run`] implements that loop in full; [`main`] is
//! deliberately thin — board bring-up is a board support package's job,
//! the same scope boundary drawn in `candrive-application`.

#![no_std]
#![no_main]

use candrive::can_interface::CanInterface;
use candrive::firmware_manager::protocol::FirmwareInfo;
use candrive::firmware_manager::{protocol, ActionChecks, FirmwareManager};
use candrive::flash::FlashRegion;
use candrive::image::ImageHeader;
use candrive::isotp::{RxLink, TxLink, FRAME_BUFFER_SIZE};
use candrive::nvcom::{NvCom, RestartInformation};
use candrive::supervisor::Supervisor;
use candrive::systime::SysTime;

use candrive_hal::{
    BackupRegisters, CanController, CanId, FlashDevice, IndependentWatchdog, SystemClock,
};

use cortex_m_rt::entry;

use panic_halt as _;

/// Identifier firmware update requests arrive on.
const FW_REQUEST_ID: u16 = 0x001;
/// Identifier firmware update responses (and flow control) go out on.
const FW_RESPONSE_ID: u16 = 0x002;

/// Consecutive watchdog-caused restarts tolerated before `run` halts rather
/// than risk bricking the device in a reset loop.
const MAX_WATCHDOG_RESTARTS: u16 = 3;

/// Number of pages reserved for [`candrive::nvs`]-style bootloader state
/// at the base of flash. The bootloader itself keeps no persistent
/// key/value store; this only reserves the same layout the application
/// assumes so the two images agree on where the application region starts.
const RESERVED_PAGE_COUNT: usize = 2;
/// Number of pages making up the application region the bootloader writes
/// updates into and validates before jumping.
const APPLICATION_PAGE_COUNT: usize = 64;

/// Maximum payload one ISO-TP transfer on the firmware link carries.
const FW_LINK_PAYLOAD_CAPACITY: usize = 256;
/// Worst-case size of one reassembled protocol request (header plus a
/// single `ReqFwData` chunk).
const ASSEMBLY_BUFFER_SIZE: usize = protocol::MESSAGE_HEADER_SIZE + 128;

/// Everything a board support package must hand [`run`] to bring the
/// bootloader to life.
pub struct BootloaderHardware<C, F, B, W, Clk>
where
    C: CanController,
    F: FlashDevice + Clone,
    B: BackupRegisters,
    W: IndependentWatchdog,
    Clk: SystemClock,
{
    /// The CAN controller peripheral.
    pub can: C,
    /// The on-chip flash, holding the application region this bootloader
    /// validates and updates.
    pub flash: F,
    /// Battery-backed register file.
    pub backup_registers: B,
    /// The independent watchdog peripheral.
    pub watchdog: W,
    /// The monotonic system clock.
    pub clock: Clk,
    /// Board hardware revision, reported over `ReqFwInfo`.
    pub hardware_revision: u32,
    /// Device-unique identifier words, reported over `ReqFwInfo`.
    pub device_id: [u32; 3],
}

/// What the main loop decided to do after checking the installed image.
enum Disposition {
    /// Jump to the validated application.
    JumpToApplication,
    /// Stay resident and service the update protocol.
    StayResident,
}

/// Bytes read per iteration while streaming the image through the CRC,
/// kept well off the stack rather than buffering the whole region.
const CRC_CHUNK_SIZE: usize = 256;

fn check_installed_image<F: FlashDevice>(region: &FlashRegion<F>) -> Option<ImageHeader> {
    let mut header_bytes = [0u8; candrive::image::HEADER_SIZE];
    region.read(0, &mut header_bytes);
    let header = ImageHeader::decode(&header_bytes)?;

    let tail_len = header.size as usize;
    if tail_len == 0 || 12 + tail_len > region.size() {
        return None;
    }

    let mut digest = candrive::crc::Digest::new();
    let mut chunk = [0u8; CRC_CHUNK_SIZE];
    let mut remaining = tail_len;
    let mut offset = 12;
    while remaining > 0 {
        let take = remaining.min(CRC_CHUNK_SIZE);
        region.read(offset, &mut chunk[..take]);
        digest.update(&chunk[..take]);
        offset += take;
        remaining -= take;
    }

    if digest.finalize() == header.crc {
        Some(header)
    } else {
        None
    }
}

/// Runs the bootloader's cooperative main loop. Never returns.
pub fn run<C, F, B, W, Clk>(hardware: BootloaderHardware<C, F, B, W, Clk>) -> !
where
    C: CanController,
    F: FlashDevice + Clone,
    B: BackupRegisters,
    W: IndependentWatchdog,
    Clk: SystemClock,
{
    let BootloaderHardware {
        can,
        flash,
        mut backup_registers,
        watchdog,
        clock,
        hardware_revision,
        device_id,
    } = hardware;

    let watchdog_caused_reset = backup_registers.reset_flags().watchdog;
    backup_registers.clear_reset_flags();

    let mut nvcom = NvCom::new(&mut backup_registers);
    let mut restart_info = nvcom.get_data();
    if nvcom.is_cold_restart() {
        nvcom.set_warm();
        restart_info = RestartInformation::default();
    } else if watchdog_caused_reset {
        restart_info.watchdog_restart_count = restart_info.watchdog_restart_count.saturating_add(1);
    } else {
        restart_info.watchdog_restart_count = 0;
    }
    nvcom.set_data(restart_info);

    if restart_info.watchdog_restart_count >= MAX_WATCHDOG_RESTARTS {
        defmt::error!("candrive-bootloader: {} consecutive watchdog restarts, halting", restart_info.watchdog_restart_count);
        panic!("restart loop: watchdog restart count reached limit");
    }

    let requested_update = nvcom.get_data().request_firmware_update;

    let application_base = (RESERVED_PAGE_COUNT * F::PAGE_SIZE) as u32;
    let application_region = FlashRegion::new(flash.clone(), application_base, APPLICATION_PAGE_COUNT);
    let installed = check_installed_image(&application_region);

    let disposition = match (&installed, requested_update) {
        (Some(_), false) => Disposition::JumpToApplication,
        _ => Disposition::StayResident,
    };

    if let Disposition::JumpToApplication = disposition {
        // A board support package performs the actual jump here: relocate
        // `VTOR` to the application's vector table (at `installed_image`'s
        // `vector_address`), reload the stack pointer from its first word,
        // and branch to its reset vector.
        defmt::info!("candrive-bootloader: installed image valid, handing over to application");
    }

    let mut data = nvcom.get_data();
    data.request_firmware_update = false;
    nvcom.set_data(data);

    let identity = match &installed {
        Some(header) => FirmwareInfo::from_installed(header, hardware_revision, device_id),
        None => FirmwareInfo::from_installed(
            &ImageHeader {
                header_version: 0,
                crc: 0,
                size: 0,
                image_type: candrive::image::ImageType::Application,
                version: [0u8; 32],
                vector_address: 0,
                git_sha: [0u8; 14],
            },
            hardware_revision,
            device_id,
        ),
    };

    let mut firmware_manager = FirmwareManager::new(application_region, identity);
    firmware_manager.set_action_checks(ActionChecks::default());

    let systime = SysTime::new(&clock);
    let mut bus = CanInterface::new(can);
    let mut fw_rx = RxLink::<FW_LINK_PAYLOAD_CAPACITY, FRAME_BUFFER_SIZE>::new(
        CanId::Standard(FW_REQUEST_ID),
        CanId::Standard(FW_RESPONSE_ID),
        0,
        None,
    );
    let mut fw_tx = TxLink::<FW_LINK_PAYLOAD_CAPACITY, FRAME_BUFFER_SIZE>::new(
        CanId::Standard(FW_REQUEST_ID),
        CanId::Standard(FW_RESPONSE_ID),
        None,
    );

    let mut supervisor = Supervisor::new(watchdog);
    let link_watchdog = supervisor.watchdog_handle();

    let mut assembly = [0u8; ASSEMBLY_BUFFER_SIZE];
    let mut assembly_filled = 0usize;

    loop {
        let now_ms = systime.now_ms();

        bus.poll(&mut [&mut fw_rx, &mut fw_tx]);
        fw_rx.process(&mut bus, now_ms);
        fw_tx.process(&mut bus, now_ms);
        supervisor.feed_watchdog(link_watchdog);
        supervisor.update(false, 12_000, now_ms);

        let read = fw_rx.receive(&mut assembly[assembly_filled..]);
        assembly_filled += read;
        if assembly_filled >= protocol::MESSAGE_HEADER_SIZE {
            let header_bytes: [u8; protocol::MESSAGE_HEADER_SIZE] =
                assembly[..protocol::MESSAGE_HEADER_SIZE].try_into().unwrap();
            if let Some(header) = protocol::MessageHeader::decode(&header_bytes) {
                let total = protocol::MESSAGE_HEADER_SIZE + header.size as usize;
                if assembly_filled >= total {
                    let payload = &assembly[protocol::MESSAGE_HEADER_SIZE..total];
                    if let Ok(Some(reply)) = firmware_manager.handle_message(&header_bytes, payload) {
                        fw_tx.send(&mut bus, &reply, now_ms);
                    }
                    assembly.copy_within(total..assembly_filled, 0);
                    assembly_filled -= total;
                }
            } else {
                assembly_filled = 0;
            }
        }

        if firmware_manager.reset_requested() || firmware_manager.firmware_was_updated() {
            let mut data = nvcom.get_data();
            data.firmware_was_updated = firmware_manager.firmware_was_updated();
            nvcom.set_data(data);
            // A board support package performs the actual core reset here,
            // which re-enters this loop from the top and re-validates the
            // (possibly just-installed) image.
        }
    }
}

#[entry]
fn main() -> ! {
    defmt::info!("candrive-bootloader: awaiting board support package");
    loop {
        cortex_m::asm::wfi();
    }
}

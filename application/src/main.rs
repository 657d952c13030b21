//! CANDrive application binary: drives two motors from CAN control frames
//! and services the firmware update protocol so the application itself
//! can hand off into an update without a separate reboot into the
//! bootloader's own copy of the protocol.
//!
//! Grounded on the top-level `app/main.c` cooperative loop: poll the CAN
//! controller, advance every protocol link, tick the motor controller and
//! supervisor, then poll the console. [`run`] implements that loop in
//! full; [`main`] itself is deliberately thin. Board bring-up (clock
//! tree, pin muxing, peripheral construction) is the job of a concrete
//! board support package providing the `candrive_hal` trait
//! implementations — none ships here, the same way `mcan` leaves chip
//! selection to its caller. A board crate is expected to construct
//! [`ApplicationHardware`] and call [`run`].

#![no_std]
#![no_main]

use candrive::can_interface::{CanInterface, Listener};
use candrive::config::Config;
use candrive::console::{Action as ConsoleAction, CommandTable, LineEditor};
use candrive::firmware_manager::protocol::FirmwareInfo;
use candrive::firmware_manager::{protocol, ActionChecks, FirmwareManager};
use candrive::flash::FlashRegion;
use candrive::image::ImageHeader;
use candrive::isotp::{RxLink, TxLink, FRAME_BUFFER_SIZE};
use candrive::motor::Motor;
use candrive::motor_controller::{Command as MotorCommand, MotorController};
use candrive::nvcom::{NvCom, RestartInformation};
use candrive::nvs::Nvs;
use candrive::pid::Pid;
use candrive::signal_handler::{decode_control_frame, encode_status_frame, MotorStatus};
use candrive::supervisor::Supervisor;
use candrive::systime::SysTime;

use candrive_hal::{
    AdcChannel, BackupRegisters, CanController, CanFrame, CanId, FlashDevice, IndependentWatchdog,
    OutputPin, PwmOutput, QuadratureTimer, SystemClock, Usart,
};

use cortex_m_rt::entry;

use panic_halt as _;

/// Identifier the host sends control and firmware-protocol requests on.
const CONTROL_RX_ID: u16 = 0x200;
/// Identifier status frames are published on, offset by motor index.
const STATUS_TX_ID_BASE: u16 = 0x210;
/// Identifier firmware update requests arrive on.
const FW_REQUEST_ID: u16 = 0x001;
/// Identifier firmware update responses (and flow control) go out on.
const FW_RESPONSE_ID: u16 = 0x002;

/// Number of pages reserved for [`candrive::nvs`] at the base of flash.
const NVS_PAGE_COUNT: usize = 2;
/// Number of pages available to stage an incoming firmware image.
const FIRMWARE_PAGE_COUNT: usize = 64;

/// Maximum payload one ISO-TP transfer on the firmware link carries.
const FW_LINK_PAYLOAD_CAPACITY: usize = 256;
/// Worst-case size of one reassembled protocol request (header plus a
/// single `ReqFwData` chunk).
const ASSEMBLY_BUFFER_SIZE: usize = protocol::MESSAGE_HEADER_SIZE + 128;

const STATUS_PERIOD_MS: u32 = 20;

/// Consecutive watchdog-caused restarts tolerated before `run` halts rather
/// than risk bricking the device in a reset loop.
const MAX_WATCHDOG_RESTARTS: u16 = 3;

/// Everything a board support package must hand [`run`] to bring the
/// application to life.
pub struct ApplicationHardware<C, F, B, W, Clk, P, Adc, T, InA, InB, U>
where
    C: CanController,
    F: FlashDevice + Clone,
    B: BackupRegisters,
    W: IndependentWatchdog,
    Clk: SystemClock,
    P: PwmOutput,
    Adc: AdcChannel,
    T: QuadratureTimer,
    InA: OutputPin,
    InB: OutputPin,
    U: Usart,
{
    /// The CAN controller peripheral.
    pub can: C,
    /// The on-chip flash, shared between [`candrive::nvs`] and the
    /// firmware update staging region.
    pub flash: F,
    /// Battery-backed register file.
    pub backup_registers: B,
    /// The independent watchdog peripheral.
    pub watchdog: W,
    /// The monotonic system clock.
    pub clock: Clk,
    /// Per-motor peripherals, in index order.
    pub motors: [(P, Adc, T, InA, InB); 2],
    /// The supply-voltage sense ADC channel, fed to [`Supervisor::update`].
    pub vsense: Adc,
    /// Converts a raw [`Self::vsense`] sample to millivolts; board specific
    /// (divider ratio, reference voltage).
    pub vsense_counts_to_mv: fn(u16) -> u32,
    /// Converts a raw motor current-sense ADC sample to milliamps; board
    /// specific, mirroring `SenseVoltageToCurrent`'s calibration.
    pub current_counts_to_ma: fn(u16) -> i32,
    /// The diagnostic console's serial port.
    pub usart: U,
    /// Board hardware revision, reported over `ReqFwInfo`.
    pub hardware_revision: u32,
    /// Device-unique identifier words, reported over `ReqFwInfo`.
    pub device_id: [u32; 3],
    /// The installed application image's own header, baked in at build
    /// time and reported over `ReqFwInfo`.
    pub installed_image: ImageHeader,
}

struct ControlListener {
    id: CanId,
    pending: Option<[MotorCommand; 2]>,
}

impl Listener for ControlListener {
    fn on_frame(&mut self, frame: &CanFrame) {
        if frame.id() == self.id {
            if let Some(commands) = decode_control_frame(frame) {
                self.pending = Some(commands);
            }
        }
    }
}

/// Registers the diagnostic commands matching `RegisterConsoleCommands`.
///
/// Handlers here are free functions (`fn(&str) -> bool`, not closures) and
/// so cannot reach the motor controller or firmware manager directly; a
/// board support package that needs real command effects routes them
/// through a critical-section cell it owns, the same way the original
/// reaches module state through file-scope statics.
fn diagnostic_console_table() -> CommandTable {
    let mut table = CommandTable::new();
    table.register("rpm", |_args| true).ok();
    table.register("coast", |_args| true).ok();
    table.register("brake", |_args| true).ok();
    table.register("reset", |_args| true).ok();
    table
}

/// Runs the application's cooperative main loop. Never returns.
pub fn run<C, F, B, W, Clk, P, Adc, T, InA, InB, U>(
    hardware: ApplicationHardware<C, F, B, W, Clk, P, Adc, T, InA, InB, U>,
) -> !
where
    C: CanController,
    F: FlashDevice + Clone,
    B: BackupRegisters,
    W: IndependentWatchdog,
    Clk: SystemClock,
    P: PwmOutput,
    Adc: AdcChannel,
    T: QuadratureTimer,
    InA: OutputPin,
    InB: OutputPin,
    U: Usart,
{
    let ApplicationHardware {
        can,
        flash,
        mut backup_registers,
        watchdog,
        clock,
        motors: [m0, m1],
        mut vsense,
        vsense_counts_to_mv,
        current_counts_to_ma,
        mut usart,
        hardware_revision,
        device_id,
        installed_image,
    } = hardware;

    let watchdog_caused_reset = backup_registers_reset_flags_indicate_watchdog(&backup_registers);
    backup_registers.clear_reset_flags();

    let mut nvcom = NvCom::new(&mut backup_registers);
    let mut restart_info = nvcom.get_data();
    if nvcom.is_cold_restart() {
        nvcom.set_warm();
        restart_info = RestartInformation::default();
    } else {
        restart_info.total_restart_count = restart_info.total_restart_count.saturating_add(1);
        if watchdog_caused_reset {
            restart_info.watchdog_restart_count = restart_info.watchdog_restart_count.saturating_add(1);
        } else {
            restart_info.watchdog_restart_count = 0;
        }
    }
    nvcom.set_data(restart_info);

    if restart_info.watchdog_restart_count >= MAX_WATCHDOG_RESTARTS {
        defmt::error!("candrive-application: {} consecutive watchdog restarts, halting", restart_info.watchdog_restart_count);
        panic!("restart loop: watchdog restart count reached limit");
    }

    let (nvs_region, firmware_region) = split_flash_regions(flash);
    let nvs = Nvs::init(nvs_region).unwrap_or_else(|_| panic!("NVS region unreadable"));
    let config = Config::load(&nvs).unwrap_or_default();

    let (cpr0, cpr1) = if config.is_valid() {
        (config.counts_per_revolution_m1, config.counts_per_revolution_m2)
    } else {
        (1, 1)
    };
    let motor0 = Motor::new(m0.0, m0.1, m0.2, m0.3, m0.4, cpr0);
    let motor1 = Motor::new(m1.0, m1.1, m1.2, m1.3, m1.4, cpr1);
    let speed_limit = if config.is_valid() { config.speed_limit_rpm as i32 } else { 0 };
    let pid0 = Pid::new(200, 10, 0, 1000, -speed_limit.max(1), speed_limit.max(1));
    let pid1 = Pid::new(200, 10, 0, 1000, -speed_limit.max(1), speed_limit.max(1));
    let mut motor_controller = MotorController::new([motor0, motor1], [pid0, pid1]);

    let mut supervisor = Supervisor::new(watchdog);
    let control_watchdog = supervisor.watchdog_handle();
    let link_watchdog = supervisor.watchdog_handle();

    let systime = SysTime::new(&clock);
    let mut bus = CanInterface::new(can);

    let mut control = ControlListener {
        id: CanId::Standard(CONTROL_RX_ID),
        pending: None,
    };
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

    let identity = FirmwareInfo::from_installed(&installed_image, hardware_revision, device_id);
    let mut firmware_manager = FirmwareManager::new(firmware_region, identity);
    firmware_manager.set_action_checks(ActionChecks::default());

    let console_table = diagnostic_console_table();
    let mut console_editor = LineEditor::new();

    let mut assembly = [0u8; ASSEMBLY_BUFFER_SIZE];
    let mut assembly_filled = 0usize;
    let mut last_status_ms = systime.now_ms();
    let mut supply_mv = 0u32;

    loop {
        let now_ms = systime.now_ms();

        bus.poll(&mut [&mut control, &mut fw_rx, &mut fw_tx]);

        if let Some(commands) = control.pending.take() {
            motor_controller.command(0, commands[0]);
            motor_controller.command(1, commands[1]);
            supervisor.report_activity(false, now_ms);
        }
        motor_controller.update(now_ms);
        supervisor.feed_watchdog(control_watchdog);

        fw_rx.process(&mut bus, now_ms);
        fw_tx.process(&mut bus, now_ms);
        supervisor.feed_watchdog(link_watchdog);

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

        if let Ok(counts) = vsense.read() {
            supply_mv = vsense_counts_to_mv(counts);
        }

        if systime.elapsed_ms(last_status_ms) >= STATUS_PERIOD_MS {
            last_status_ms = now_ms;
            for index in 0..2 {
                let rpm = motor_controller.motor(index).rpm();
                let current_ma = motor_controller
                    .motor_mut(index)
                    .sense_current_ma(current_counts_to_ma)
                    .unwrap_or(0);
                let frame = encode_status_frame(
                    CanId::Standard(STATUS_TX_ID_BASE + index as u16),
                    index as u8,
                    MotorStatus { rpm, current_ma },
                );
                bus.transmit(frame.id(), frame.data()).ok();
            }
        }

        while let Ok(byte) = usart.read() {
            if let Some(action) = console_editor.push(byte, &console_table) {
                match action {
                    ConsoleAction::Echo => {}
                    ConsoleAction::Result(_ok) => {}
                }
            }
        }

        supervisor.update(false, supply_mv, now_ms);

        if firmware_manager.reset_requested() {
            let mut data = nvcom.get_data();
            data.firmware_was_updated = firmware_manager.firmware_was_updated();
            nvcom.set_data(data);
            // A board support package performs the actual core reset here.
        }
    }
}

/// Splits one flash device into the NVS region and the firmware update
/// staging region. Requires `F: Clone`: board support packages implement
/// [`FlashDevice`] on a zero-sized handle to a peripheral singleton (the
/// state lives in the hardware, not the Rust value), so cloning the
/// handle to give each region its own is free and correct; it would be
/// wrong for a `FlashDevice` that owned unique in-memory state, which
/// none of this workspace's implementations do.
fn split_flash_regions<F: FlashDevice + Clone>(flash: F) -> (FlashRegion<F>, FlashRegion<F>) {
    let firmware_base = (NVS_PAGE_COUNT * F::PAGE_SIZE) as u32;
    let nvs_region = FlashRegion::new(flash.clone(), 0, NVS_PAGE_COUNT);
    let firmware_region = FlashRegion::new(flash, firmware_base, FIRMWARE_PAGE_COUNT);
    (nvs_region, firmware_region)
}

fn backup_registers_reset_flags_indicate_watchdog<B: BackupRegisters>(registers: &B) -> bool {
    registers.reset_flags().watchdog
}

#[entry]
fn main() -> ! {
    defmt::info!("candrive-application: awaiting board support package");
    loop {
        cortex_m::asm::wfi();
    }
}

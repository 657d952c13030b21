//! Watchdog aggregation, supply-voltage supervision and the overall
//! activity state machine.
//!
//! Grounded on `firmware/src/modules/system_monitor/system_monitor.c`
//! (the Vsense-aware variant): every cooperating module registers a
//! watchdog handle and must feed it each tick; the hardware watchdog is
//! only refreshed once all handles have fed within the period. Supply
//! voltage is filtered through an [`crate::filter::Filter`] and compared
//! against a window with hysteresis on the low/ok boundary. The emergency
//! input always wins; otherwise the state degrades to `Inactive` once no
//! activity has been reported for `CONTROL_INACTIVITY_PERIOD_MS`.

use crate::filter::Filter;
use crate::systime::elapsed;
use candrive_hal::IndependentWatchdog;

const WATCHDOG_PERIOD_MS: u32 = 200;
const MAX_WATCHDOG_HANDLES: usize = 32;
const CONTROL_INACTIVITY_PERIOD_MS: u32 = 200;
const VSENSE_UPDATE_PERIOD_MS: u32 = 100;

const VSENSE_OFF_MV: u32 = 1000;
const VSENSE_MIN_MV: u32 = 10_000;
const VSENSE_MAX_MV: u32 = 14_000;
const VSENSE_HYSTERESIS_MV: u32 = 100;

/// Supply-voltage window classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VsenseStatus {
    /// No sample has been classified yet.
    #[default]
    Unknown,
    /// Within the normal operating window.
    Ok,
    /// Below [`VSENSE_MIN_MV`] (but above off).
    Low,
    /// Above [`VSENSE_MAX_MV`].
    High,
    /// Below [`VSENSE_OFF_MV`]; supply is effectively disconnected.
    Off,
}

/// Overall supervised activity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// No motor activity has been reported recently.
    #[default]
    Inactive,
    /// Activity was reported within the inactivity window.
    Active,
    /// The emergency input is asserted.
    Emergency,
    /// Supply voltage is outside the acceptable window.
    Fail,
}

/// A handle identifying one watchdog participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogHandle(u32);

/// Aggregates watchdog handles, Vsense monitoring and activity state.
pub struct Supervisor<W: IndependentWatchdog> {
    watchdog: W,
    number_of_handles: u32,
    fed_flags: u32,
    state: State,
    control_activity_timer_ms: u32,
    vsense_filter: Filter,
    vsense_status: VsenseStatus,
    vsense_timer_ms: u32,
}

impl<W: IndependentWatchdog> Supervisor<W> {
    /// Starts the hardware watchdog and returns an otherwise-inactive
    /// supervisor.
    pub fn new(mut watchdog: W) -> Self {
        watchdog.start(WATCHDOG_PERIOD_MS);
        Self {
            watchdog,
            number_of_handles: 0,
            fed_flags: 0,
            state: State::Inactive,
            control_activity_timer_ms: 0,
            vsense_filter: Filter::uninitialized(),
            vsense_status: VsenseStatus::Unknown,
            vsense_timer_ms: 0,
        }
    }

    /// Allocates a new watchdog handle, already counted as fed.
    pub fn watchdog_handle(&mut self) -> WatchdogHandle {
        debug_assert!((self.number_of_handles as usize) < MAX_WATCHDOG_HANDLES);
        let handle = WatchdogHandle(self.number_of_handles);
        self.number_of_handles += 1;
        self.feed_watchdog(handle);
        handle
    }

    /// Marks `handle` as having fed this period.
    pub fn feed_watchdog(&mut self, handle: WatchdogHandle) {
        debug_assert!(handle.0 < self.number_of_handles);
        self.fed_flags |= 1 << handle.0;
    }

    /// Reports motor control activity, updating the activity timer and, if
    /// the emergency input is not asserted and the supply is known-good,
    /// moving to [`State::Active`].
    pub fn report_activity(&mut self, emergency: bool, now_ms: u32) {
        if !emergency && matches!(self.vsense_status, VsenseStatus::Unknown | VsenseStatus::Ok) {
            self.state = State::Active;
        }
        self.control_activity_timer_ms = now_ms;
    }

    /// Current supervised state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Current supply-voltage classification.
    pub fn vsense_status(&self) -> VsenseStatus {
        self.vsense_status
    }

    /// Advances watchdog refresh, Vsense filtering/classification and the
    /// activity state machine. `emergency` reflects the emergency input;
    /// `supply_mv` a fresh supply-voltage sample, in millivolts.
    pub fn update(&mut self, emergency: bool, supply_mv: u32, now_ms: u32) {
        debug_assert!(self.number_of_handles > 0);

        if self.fed_flags == self.required_flags() {
            self.watchdog.feed();
            self.fed_flags = 0;
        }

        if elapsed(self.vsense_timer_ms, now_ms) >= VSENSE_UPDATE_PERIOD_MS {
            self.vsense_timer_ms = now_ms;
            self.update_vsense(supply_mv);
        }

        let previous_state = self.state;
        if emergency {
            self.state = State::Emergency;
        } else if !matches!(self.vsense_status, VsenseStatus::Ok | VsenseStatus::Unknown) {
            self.state = State::Fail;
        } else if self.state != State::Inactive
            && elapsed(self.control_activity_timer_ms, now_ms) > CONTROL_INACTIVITY_PERIOD_MS
        {
            self.state = State::Inactive;
        }
        if self.state != previous_state {
            defmt::info!("supervisor: {} -> {}", previous_state, self.state);
        }
    }

    fn required_flags(&self) -> u32 {
        if self.number_of_handles >= 32 {
            u32::MAX
        } else {
            (1u32 << self.number_of_handles) - 1
        }
    }

    fn update_vsense(&mut self, supply_mv: u32) {
        if !self.vsense_filter.is_initialized() {
            self.vsense_filter.init(supply_mv, Filter::alpha(0.5));
        } else {
            self.vsense_filter.process(supply_mv);
        }
        let filtered = self.vsense_filter.output();

        self.vsense_status = if filtered < VSENSE_OFF_MV {
            VsenseStatus::Off
        } else if filtered < VSENSE_MIN_MV {
            VsenseStatus::Low
        } else if filtered > VSENSE_MAX_MV {
            VsenseStatus::High
        } else if filtered > VSENSE_MIN_MV + VSENSE_HYSTERESIS_MV {
            VsenseStatus::Ok
        } else {
            self.vsense_status
        };
    }
}

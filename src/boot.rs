//! Power-on boot decision (component C4).
//!
//! Runs before the USB peripheral is brought up: reads the persistent boot
//! flag and, if it doesn't force a decision outright, the button and the
//! presence of a valid application image, then decides whether to enter DFU
//! mode or jump straight to the resident application. The decision itself is
//! a pure function so it can be unit-tested without any hardware; the I/O it
//! depends on lives behind [`BootPlatform`].

/// Persistent boot-flag value, read once from a fixed RAM word at reset and
/// cleared immediately after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum BootFlag {
    /// Enter DFU mode unconditionally, ignoring button and application state.
    ForceDfu,
    /// Jump to the application immediately if present, skipping the button wait.
    SkipWait,
    /// No flag was set; fall through to the button/application check.
    Normal,
}

/// Outcome of [`decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum BootAction {
    /// Bring up USB and run the DFU engine.
    EnterDfu,
    /// Jump to the resident application at `APP_BASE`.
    JumpToApplication,
    /// Restart the boot sequence from scratch.
    HardReset,
}

/// Requested blink cadence for the startup LED, communicating which branch of
/// the boot decision was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum BlinkCadence {
    /// Steady blink while waiting in DFU mode for a host to attach.
    WaitingForHost,
    /// Fast blink while a download is in progress.
    Downloading,
    /// Off: about to jump to the application.
    Off,
}

/// Decides what to do at power-on, given the flag, application presence, and
/// button state. Pure: no I/O, no platform access.
pub fn decide(flag: BootFlag, code_present: bool, button_held: bool) -> BootAction {
    match flag {
        BootFlag::ForceDfu => BootAction::EnterDfu,
        BootFlag::SkipWait => {
            if code_present {
                BootAction::JumpToApplication
            } else {
                // No USB/DFU setup runs on this path; without a valid image
                // to jump to, the only option is to restart the boot sequence.
                BootAction::HardReset
            }
        }
        BootFlag::Normal => {
            if !code_present {
                BootAction::EnterDfu
            } else if button_held {
                BootAction::EnterDfu
            } else {
                BootAction::JumpToApplication
            }
        }
    }
}

/// Platform collaborator of the boot decider (external contract C4 relies on).
///
/// Everything here is a single blocking call; there is no async surface
/// because the boot decision runs once, before the USB peripheral (and any
/// interrupt-driven state) exists.
pub trait BootPlatform {
    /// Reads the persistent boot-flag RAM word and clears it.
    fn persistent_boot_flag(&mut self) -> BootFlag;

    /// Whether a valid application image is present at `APP_BASE` (typically
    /// a check of the initial stack pointer / reset vector).
    fn check_user_code_present(&self) -> bool;

    /// Whether the boot-select button is currently held.
    fn read_button(&self) -> bool;

    /// Drives the startup LED at the given cadence. Called repeatedly by the
    /// idle/blink loop external to this core (see module docs).
    fn blink(&mut self, cadence: BlinkCadence);

    /// Disables interrupts and restarts the boot sequence. Never returns.
    fn system_hard_reset(&mut self) -> !;
}

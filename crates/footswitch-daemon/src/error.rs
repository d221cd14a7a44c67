//! Fatal error taxonomy and exit status mapping.

use std::io;

use thiserror::Error;

use crate::device::MAX_DEVICES;

/// Everything that can kill the daemon.
///
/// None of these are retried or recovered locally; each one propagates to
/// the top-level handler in `main`, which logs it and exits with the mapped
/// status. The distinguished codes for the classification failures are part
/// of the daemon's contract with service managers.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Enumerating the input device nodes failed outright.
    #[error("failed to enumerate input devices: {0}")]
    Discovery(#[source] io::Error),

    /// No device matched the foot switch vendor/product ids.
    #[error("foot switch not found")]
    SwitchNotFound,

    /// More qualifying devices than the daemon is willing to monitor.
    #[error("too many input devices (limit {MAX_DEVICES})")]
    TooManyDevices,

    /// The exclusive grab on the foot switch was denied.
    #[error("failed to grab foot switch: {0}")]
    Grab(#[source] io::Error),

    /// The uinput virtual keyboard could not be registered.
    #[error("failed to create virtual keyboard: {0}")]
    OutputCreation(#[source] io::Error),

    /// Draining a device's event stream failed.
    #[error("failed to read input events: {0}")]
    Read(#[source] io::Error),

    /// Writing to the virtual keyboard failed.
    #[error("failed to emit key event: {0}")]
    Write(#[source] io::Error),

    /// The readiness wait itself failed.
    #[error("event wait failed: {0}")]
    Multiplex(#[source] nix::errno::Errno),
}

impl DaemonError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            DaemonError::SwitchNotFound => 2,
            DaemonError::TooManyDevices => 3,
            _ => 1,
        }
    }
}

//! Input device discovery and classification.
//!
//! At startup every `/dev/input/event*` node is opened and sorted into one
//! of three buckets: the foot switch (matched by vendor/product id), a
//! keyboard (anything that can type the letter A), or noise that is closed
//! again immediately. The foot switch is grabbed for exclusive access
//! before it is registered; the daemon refuses to run with a pedal it
//! cannot own. There is no re-scan: devices plugged in later are never
//! picked up.

use std::fs;
use std::os::unix::io::AsRawFd;

use evdev::raw_stream::RawDevice;
use evdev::Key;
use nix::fcntl::{fcntl, FcntlArg, OFlag};

use crate::error::DaemonError;
use crate::reader::EventReader;

/// Upper bound on monitored devices, foot switch included.
pub const MAX_DEVICES: usize = 5;

/// Vendor/product id pair identifying the foot switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchId {
    pub vendor: u16,
    pub product: u16,
}

/// What a registered device is monitored as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    FootSwitch,
    Keyboard,
}

/// One monitored input source. Owns its device handle and per-device
/// reader; destroyed only on process exit.
pub struct Registration {
    pub device: RawDevice,
    pub role: DeviceRole,
    pub reader: EventReader,
    pub name: String,
}

/// Decide what role a device node plays, if any.
///
/// The foot switch is matched strictly by its id pair. Everything else
/// counts as a keyboard when it can produce KEY_A; deliberately loose, the
/// daemon only needs to know "real typing can come from here".
fn classify(id: SwitchId, supports_key_a: bool, switch_id: SwitchId) -> Option<DeviceRole> {
    if id == switch_id {
        Some(DeviceRole::FootSwitch)
    } else if supports_key_a {
        Some(DeviceRole::Keyboard)
    } else {
        None
    }
}

/// Check the outcome of a scan against the registration invariants. The
/// missing-switch check comes first; a blown cap is only reported for a
/// scan that did find the pedal.
fn verify_census(switch_seen: bool, registered: usize) -> Result<(), DaemonError> {
    if !switch_seen {
        return Err(DaemonError::SwitchNotFound);
    }
    if registered > MAX_DEVICES {
        return Err(DaemonError::TooManyDevices);
    }
    Ok(())
}

/// Scan `/dev/input` and build the registration set.
pub fn scan_devices(switch_id: SwitchId) -> Result<Vec<Registration>, DaemonError> {
    let mut registrations = Vec::new();
    let mut switch_seen = false;

    for entry in fs::read_dir("/dev/input").map_err(DaemonError::Discovery)? {
        let entry = entry.map_err(DaemonError::Discovery)?;
        let path = entry.path();

        // Only look at event* devices
        if !path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("event"))
            .unwrap_or(false)
        {
            continue;
        }

        // One registration past the cap is enough to prove the invariant
        // is broken; stop opening devices at that point.
        if registrations.len() > MAX_DEVICES {
            break;
        }

        let mut device = match RawDevice::open(&path) {
            Ok(device) => device,
            Err(e) => {
                tracing::debug!("could not open {}: {}", path.display(), e);
                continue;
            }
        };

        let input_id = device.input_id();
        let id = SwitchId {
            vendor: input_id.vendor(),
            product: input_id.product(),
        };
        let name = device.name().unwrap_or("unknown").to_string();
        let supports_key_a = device
            .supported_keys()
            .map(|keys| keys.contains(Key::KEY_A))
            .unwrap_or(false);

        match classify(id, supports_key_a, switch_id) {
            Some(DeviceRole::FootSwitch) if switch_seen => {
                tracing::warn!(
                    "ignoring second foot switch '{}' at {}",
                    name,
                    path.display()
                );
            }
            Some(role) => {
                if role == DeviceRole::FootSwitch {
                    device.grab().map_err(DaemonError::Grab)?;
                    switch_seen = true;
                    tracing::info!("grabbed foot switch '{}' at {}", name, path.display());
                } else {
                    tracing::info!("monitoring keyboard '{}' at {}", name, path.display());
                }
                set_nonblocking(&device).map_err(DaemonError::Discovery)?;
                registrations.push(Registration {
                    device,
                    role,
                    reader: EventReader::new(),
                    name,
                });
            }
            None => {
                tracing::debug!("ignoring '{}' at {}", name, path.display());
            }
        }
    }

    verify_census(switch_seen, registrations.len())?;
    Ok(registrations)
}

/// Put the descriptor in non-blocking mode so a drain can stop cleanly at
/// "no more events" instead of stalling the loop.
fn set_nonblocking(device: &RawDevice) -> std::io::Result<()> {
    let fd = device.as_raw_fd();
    let current = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(current | OFlag::O_NONBLOCK))?;
    Ok(())
}

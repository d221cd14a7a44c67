//! Virtual keyboard output via uinput.
//!
//! The synthetic device declares only the keys the mapping table can
//! produce. Every key event is written together with a trailing SYN_REPORT
//! so readers of the virtual device always see complete packets.

use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, EventType, InputEvent, Key};

use crate::error::DaemonError;
use crate::remapper::event_value;

/// Sink for remapped key events.
///
/// The virtual keyboard is the real implementation; tests substitute a
/// recorder.
pub trait KeySink {
    /// Emit one key transition, paired with its synchronization report.
    fn send_key(&mut self, key: Key, value: i32) -> Result<(), DaemonError>;

    /// Emit a full press-then-release pair for `key`.
    fn send_tap(&mut self, key: Key) -> Result<(), DaemonError> {
        self.send_key(key, event_value::PRESS)?;
        self.send_key(key, event_value::RELEASE)
    }
}

/// The uinput-backed synthetic keyboard.
pub struct VirtualKeyboard {
    device: VirtualDevice,
}

impl VirtualKeyboard {
    /// Register the virtual device under `name` with the given capability
    /// set. Called exactly once, after classification succeeds.
    pub fn create(name: &str, keys: &AttributeSet<Key>) -> Result<Self, DaemonError> {
        let device = VirtualDeviceBuilder::new()
            .map_err(DaemonError::OutputCreation)?
            .name(name)
            .with_keys(keys)
            .map_err(DaemonError::OutputCreation)?
            .build()
            .map_err(DaemonError::OutputCreation)?;

        tracing::info!("created virtual keyboard '{}'", name);

        Ok(Self { device })
    }
}

impl KeySink for VirtualKeyboard {
    fn send_key(&mut self, key: Key, value: i32) -> Result<(), DaemonError> {
        let event = InputEvent::new(EventType::KEY, key.code(), value);
        let report = InputEvent::new(EventType::SYNCHRONIZATION, 0, 0);
        self.device.emit(&[event, report]).map_err(DaemonError::Write)
    }
}

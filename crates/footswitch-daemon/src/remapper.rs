//! The foot switch to keyboard remapping state machine.
//!
//! Three pedal buttons each map to a (modifier, auxiliary) key pair.
//! Holding a button holds the modifier, so the pedal can take part in
//! chords with the mouse or the real keyboard. Releasing it releases the
//! modifier and, when the real keyboard stayed quiet for the whole hold,
//! fires the auxiliary key as a tap. One shared flag decides between the
//! two intents.

use evdev::{AttributeSet, EventType, InputEvent, Key};

use crate::error::DaemonError;
use crate::injector::KeySink;

/// Event value constants for key events.
pub mod event_value {
    /// Key release event value
    pub const RELEASE: i32 = 0;
    /// Key press event value
    pub const PRESS: i32 = 1;
    /// Key repeat event value (autorepeat)
    #[allow(dead_code)]
    pub const REPEAT: i32 = 2;
}

/// One pedal button and the key pair it drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonMapping {
    /// Button code reported by the foot switch.
    pub button: Key,
    /// Held for as long as the button is held.
    pub modifier: Key,
    /// Tapped on release when the keyboard stayed quiet.
    pub auxiliary: Key,
}

/// Immutable button-to-key-pair table, fixed for the process lifetime.
#[derive(Debug, Clone)]
pub struct MappingTable {
    entries: Vec<ButtonMapping>,
}

impl MappingTable {
    /// The standard three-button layout. Which modifier sits on the right
    /// button differs between installations, so it is a parameter.
    pub fn standard(right_modifier: Key) -> Self {
        Self {
            entries: vec![
                ButtonMapping {
                    button: Key::BTN_LEFT,
                    modifier: Key::KEY_LEFTCTRL,
                    auxiliary: Key::KEY_ESC,
                },
                ButtonMapping {
                    button: Key::BTN_RIGHT,
                    modifier: right_modifier,
                    auxiliary: Key::KEY_TAB,
                },
                ButtonMapping {
                    button: Key::BTN_MIDDLE,
                    modifier: Key::KEY_LEFTALT,
                    auxiliary: Key::BTN_RIGHT,
                },
            ],
        }
    }

    /// Look up the mapping for a raw button code.
    pub fn lookup(&self, code: u16) -> Option<&ButtonMapping> {
        self.entries.iter().find(|entry| entry.button.code() == code)
    }

    /// Every key the virtual keyboard must be able to emit.
    pub fn capability_keys(&self) -> AttributeSet<Key> {
        let mut keys = AttributeSet::new();
        for entry in &self.entries {
            keys.insert(entry.modifier);
            keys.insert(entry.auxiliary);
        }
        keys
    }
}

/// Shared remapping state for both device roles.
///
/// `key_pressed` is the suppression flag: raised by any keyboard key event,
/// consumed by the next pedal release. All access happens on the one event
/// loop thread, so plain fields are enough.
pub struct PedalRemapper {
    mapping: MappingTable,
    key_pressed: bool,
}

impl PedalRemapper {
    pub fn new(mapping: MappingTable) -> Self {
        Self {
            mapping,
            key_pressed: false,
        }
    }

    /// Whether keyboard activity is pending consumption.
    pub fn keyboard_active(&self) -> bool {
        self.key_pressed
    }

    /// Handle one event from the foot switch.
    ///
    /// A press emits the mapped modifier down. A release emits it up and
    /// then either taps the auxiliary key (the keyboard stayed quiet) or
    /// consumes the suppression flag (the user was typing, so the pedal
    /// acted as a bare modifier).
    pub fn handle_switch_event(
        &mut self,
        event: &InputEvent,
        output: &mut impl KeySink,
    ) -> Result<(), DaemonError> {
        if event.event_type() != EventType::KEY {
            return Ok(());
        }
        let entry = match self.mapping.lookup(event.code()) {
            Some(entry) => *entry,
            None => return Ok(()),
        };

        match event.value() {
            event_value::PRESS => output.send_key(entry.modifier, event_value::PRESS),
            event_value::RELEASE => {
                output.send_key(entry.modifier, event_value::RELEASE)?;
                if self.key_pressed {
                    // The pedal was held as a plain modifier; consume the
                    // flag and skip the tap.
                    self.key_pressed = false;
                    Ok(())
                } else {
                    output.send_tap(entry.auxiliary)
                }
            }
            // Autorepeat never reaches the virtual keyboard.
            _ => Ok(()),
        }
    }

    /// Handle one event from any keyboard: key activity of any kind, press
    /// or release, raises the suppression flag.
    pub fn handle_keyboard_event(&mut self, event: &InputEvent) {
        if event.event_type() == EventType::KEY {
            self.key_pressed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records emitted (key, value) pairs instead of writing to uinput.
    struct RecordingSink {
        sent: Vec<(Key, i32)>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self { sent: Vec::new() }
        }
    }

    impl KeySink for RecordingSink {
        fn send_key(&mut self, key: Key, value: i32) -> Result<(), DaemonError> {
            self.sent.push((key, value));
            Ok(())
        }
    }

    fn remapper() -> PedalRemapper {
        PedalRemapper::new(MappingTable::standard(Key::KEY_LEFTSHIFT))
    }

    fn switch_event(button: Key, value: i32) -> InputEvent {
        InputEvent::new(EventType::KEY, button.code(), value)
    }

    fn keyboard_event(key: Key, value: i32) -> InputEvent {
        InputEvent::new(EventType::KEY, key.code(), value)
    }

    #[test]
    fn test_flag_starts_false() {
        assert!(!remapper().keyboard_active());
    }

    #[test]
    fn test_press_emits_modifier_down() {
        let mut remapper = remapper();
        let mut sink = RecordingSink::new();

        remapper
            .handle_switch_event(&switch_event(Key::BTN_LEFT, event_value::PRESS), &mut sink)
            .unwrap();

        assert_eq!(sink.sent, vec![(Key::KEY_LEFTCTRL, 1)]);
    }

    #[test]
    fn test_release_without_typing_taps_auxiliary() {
        let mut remapper = remapper();
        let mut sink = RecordingSink::new();

        remapper
            .handle_switch_event(&switch_event(Key::BTN_LEFT, event_value::PRESS), &mut sink)
            .unwrap();
        remapper
            .handle_switch_event(&switch_event(Key::BTN_LEFT, event_value::RELEASE), &mut sink)
            .unwrap();

        assert_eq!(
            sink.sent,
            vec![
                (Key::KEY_LEFTCTRL, 1),
                (Key::KEY_LEFTCTRL, 0),
                (Key::KEY_ESC, 1),
                (Key::KEY_ESC, 0),
            ]
        );
    }

    #[test]
    fn test_release_after_typing_skips_tap() {
        let mut remapper = remapper();
        let mut sink = RecordingSink::new();

        remapper
            .handle_switch_event(&switch_event(Key::BTN_RIGHT, event_value::PRESS), &mut sink)
            .unwrap();
        remapper.handle_keyboard_event(&keyboard_event(Key::KEY_A, event_value::PRESS));
        remapper
            .handle_switch_event(&switch_event(Key::BTN_RIGHT, event_value::RELEASE), &mut sink)
            .unwrap();

        // Modifier up only, no Tab; the flag is consumed by the release.
        assert_eq!(sink.sent, vec![(Key::KEY_LEFTSHIFT, 1), (Key::KEY_LEFTSHIFT, 0)]);
        assert!(!remapper.keyboard_active());
    }

    #[test]
    fn test_flag_is_consumed_by_a_single_release() {
        let mut remapper = remapper();
        let mut sink = RecordingSink::new();

        remapper.handle_keyboard_event(&keyboard_event(Key::KEY_A, event_value::PRESS));
        remapper
            .handle_switch_event(&switch_event(Key::BTN_LEFT, event_value::RELEASE), &mut sink)
            .unwrap();
        assert!(!remapper.keyboard_active());

        // The next full cycle fires the tap again.
        sink.sent.clear();
        remapper
            .handle_switch_event(&switch_event(Key::BTN_LEFT, event_value::PRESS), &mut sink)
            .unwrap();
        remapper
            .handle_switch_event(&switch_event(Key::BTN_LEFT, event_value::RELEASE), &mut sink)
            .unwrap();
        assert_eq!(
            sink.sent,
            vec![
                (Key::KEY_LEFTCTRL, 1),
                (Key::KEY_LEFTCTRL, 0),
                (Key::KEY_ESC, 1),
                (Key::KEY_ESC, 0),
            ]
        );
    }

    #[test]
    fn test_keyboard_release_also_raises_flag() {
        let mut remapper = remapper();
        remapper.handle_keyboard_event(&keyboard_event(Key::KEY_B, event_value::RELEASE));
        assert!(remapper.keyboard_active());
    }

    #[test]
    fn test_keyboard_ignores_non_key_events() {
        let mut remapper = remapper();
        let syn = InputEvent::new(EventType::SYNCHRONIZATION, 0, 0);
        remapper.handle_keyboard_event(&syn);
        assert!(!remapper.keyboard_active());
    }

    #[test]
    fn test_switch_ignores_non_key_events() {
        let mut remapper = remapper();
        let mut sink = RecordingSink::new();
        let syn = InputEvent::new(EventType::SYNCHRONIZATION, 0, 0);

        remapper.handle_switch_event(&syn, &mut sink).unwrap();

        assert!(sink.sent.is_empty());
    }

    #[test]
    fn test_switch_ignores_unmapped_codes() {
        let mut remapper = remapper();
        let mut sink = RecordingSink::new();

        remapper
            .handle_switch_event(&switch_event(Key::BTN_SIDE, event_value::PRESS), &mut sink)
            .unwrap();

        assert!(sink.sent.is_empty());
    }

    #[test]
    fn test_autorepeat_is_ignored() {
        let mut remapper = remapper();
        let mut sink = RecordingSink::new();

        remapper
            .handle_switch_event(&switch_event(Key::BTN_LEFT, event_value::REPEAT), &mut sink)
            .unwrap();

        assert!(sink.sent.is_empty());
        assert!(!remapper.keyboard_active());
    }

    #[test]
    fn test_middle_button_taps_right_mouse_button() {
        let mut remapper = remapper();
        let mut sink = RecordingSink::new();

        remapper
            .handle_switch_event(&switch_event(Key::BTN_MIDDLE, event_value::PRESS), &mut sink)
            .unwrap();
        remapper
            .handle_switch_event(&switch_event(Key::BTN_MIDDLE, event_value::RELEASE), &mut sink)
            .unwrap();

        assert_eq!(
            sink.sent,
            vec![
                (Key::KEY_LEFTALT, 1),
                (Key::KEY_LEFTALT, 0),
                (Key::BTN_RIGHT, 1),
                (Key::BTN_RIGHT, 0),
            ]
        );
    }

    #[test]
    fn test_right_button_modifier_is_configurable() {
        let mut remapper = PedalRemapper::new(MappingTable::standard(Key::KEY_LEFTALT));
        let mut sink = RecordingSink::new();

        remapper
            .handle_switch_event(&switch_event(Key::BTN_RIGHT, event_value::PRESS), &mut sink)
            .unwrap();

        assert_eq!(sink.sent, vec![(Key::KEY_LEFTALT, 1)]);
    }

    #[test]
    fn test_capability_keys_cover_the_table() {
        let keys = MappingTable::standard(Key::KEY_LEFTSHIFT).capability_keys();

        for key in [
            Key::KEY_LEFTCTRL,
            Key::KEY_ESC,
            Key::KEY_LEFTSHIFT,
            Key::KEY_TAB,
            Key::KEY_LEFTALT,
            Key::BTN_RIGHT,
        ] {
            assert!(keys.contains(key), "missing {:?}", key);
        }
    }
}

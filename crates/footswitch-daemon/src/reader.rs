//! Event stream draining and the post-overrun resync protocol.
//!
//! The kernel's per-device event buffer is finite; when a reader falls
//! behind, the device reports `SYN_DROPPED` and the stream can no longer be
//! trusted event for event. This module reconstructs the device state
//! instead: the rest of the truncated packet is thrown away, the current
//! key state is queried directly, and the difference against the last known
//! state is replayed through the handler as synthetic transitions. The
//! handler cannot tell these from live events, which is the point.

use std::collections::{BTreeSet, VecDeque};
use std::io;

use evdev::raw_stream::RawDevice;
use evdev::{EventType, InputEvent, InputEventKind, Synchronization};

use crate::error::DaemonError;
use crate::remapper::event_value;

/// Where structured events come from.
///
/// `RawDevice` is the production implementation; tests script their own.
pub trait EventSource {
    /// Fetch the next batch of pending events. `WouldBlock` means the
    /// stream is drained for now.
    fn fetch(&mut self) -> io::Result<Vec<InputEvent>>;

    /// Snapshot of the key codes the device currently reports as pressed.
    fn key_state(&mut self) -> io::Result<BTreeSet<u16>>;
}

impl EventSource for RawDevice {
    fn fetch(&mut self) -> io::Result<Vec<InputEvent>> {
        Ok(self.fetch_events()?.collect())
    }

    fn key_state(&mut self) -> io::Result<BTreeSet<u16>> {
        Ok(self.get_key_state()?.iter().map(|key| key.code()).collect())
    }
}

/// Drain states. `Resyncing` is entered on `SYN_DROPPED` and returns to
/// `Normal` unless the state query itself fails.
enum ReadState {
    Normal,
    Resyncing,
    WouldBlock,
    Failed(io::Error),
}

/// Per-device reader: buffers fetched batches and shadows the device's key
/// state so a resync can tell what was missed.
pub struct EventReader {
    queue: VecDeque<InputEvent>,
    pressed: BTreeSet<u16>,
}

impl EventReader {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            pressed: BTreeSet::new(),
        }
    }

    /// Deliver every currently available event to `handler`.
    ///
    /// Returns once the source reports "would block". Read failures and
    /// handler failures both abort the drain.
    pub fn drain<S, F>(&mut self, source: &mut S, mut handler: F) -> Result<(), DaemonError>
    where
        S: EventSource,
        F: FnMut(InputEvent) -> Result<(), DaemonError>,
    {
        let mut state = ReadState::Normal;
        loop {
            state = match state {
                ReadState::Normal => match self.next_event(source) {
                    Ok(Some(event)) if is_dropped_marker(&event) => ReadState::Resyncing,
                    Ok(Some(event)) => {
                        self.track(&event);
                        handler(event)?;
                        ReadState::Normal
                    }
                    Ok(None) => ReadState::WouldBlock,
                    Err(e) => ReadState::Failed(e),
                },
                ReadState::Resyncing => {
                    self.resync(source, &mut handler)?;
                    ReadState::Normal
                }
                ReadState::WouldBlock => return Ok(()),
                ReadState::Failed(e) => return Err(DaemonError::Read(e)),
            };
        }
    }

    /// Next buffered event, refilling from the source when the buffer runs
    /// dry. `None` means nothing more is available right now.
    fn next_event<S: EventSource>(&mut self, source: &mut S) -> io::Result<Option<InputEvent>> {
        if let Some(event) = self.queue.pop_front() {
            return Ok(Some(event));
        }
        match source.fetch() {
            Ok(batch) => {
                self.queue.extend(batch);
                Ok(self.queue.pop_front())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Shadow the device's key state as events stream past.
    fn track(&mut self, event: &InputEvent) {
        if event.event_type() != EventType::KEY {
            return;
        }
        match event.value() {
            event_value::PRESS => {
                self.pressed.insert(event.code());
            }
            event_value::RELEASE => {
                self.pressed.remove(&event.code());
            }
            _ => {}
        }
    }

    /// Replay the transitions lost in a buffer overrun.
    fn resync<S, F>(&mut self, source: &mut S, handler: &mut F) -> Result<(), DaemonError>
    where
        S: EventSource,
        F: FnMut(InputEvent) -> Result<(), DaemonError>,
    {
        tracing::debug!("event buffer overrun, resynchronizing");

        // The rest of the truncated packet is garbage; drop it.
        while let Some(event) = self.queue.pop_front() {
            if is_report_marker(&event) {
                break;
            }
        }

        let actual = source.key_state().map_err(DaemonError::Read)?;

        // Releases we never saw, then presses we never saw, in code order.
        let missed_releases: Vec<u16> = self.pressed.difference(&actual).copied().collect();
        for code in missed_releases {
            self.pressed.remove(&code);
            handler(InputEvent::new(EventType::KEY, code, event_value::RELEASE))?;
        }
        let missed_presses: Vec<u16> = actual.difference(&self.pressed).copied().collect();
        for code in missed_presses {
            self.pressed.insert(code);
            handler(InputEvent::new(EventType::KEY, code, event_value::PRESS))?;
        }

        Ok(())
    }
}

fn is_dropped_marker(event: &InputEvent) -> bool {
    event.kind() == InputEventKind::Synchronization(Synchronization::SYN_DROPPED)
}

fn is_report_marker(event: &InputEvent) -> bool {
    event.kind() == InputEventKind::Synchronization(Synchronization::SYN_REPORT)
}

//! Canonicalization of the raw server event stream.

use battbench_event_log::{Event, EventKind};

/// X keycodes are offset by 8 from kernel key codes.
const KEYCODE_OFFSET: u8 = 8;

/// Vendor button ordinals the server uses for wheel motion.
const WHEEL_UP: u8 = 4;
const WHEEL_DOWN: u8 = 5;

/// The raw event categories delivered by the record extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    KeyPress,
    KeyRelease,
    ButtonPress,
    ButtonRelease,
    MotionNotify,
}

/// One event as it arrives from the server, before canonicalization.
#[derive(Debug, Clone, Copy)]
pub struct RawEvent {
    pub kind: RawKind,
    /// Server timestamp in milliseconds (absolute, not log-relative).
    pub time_ms: u32,
    pub x_root: i32,
    pub y_root: i32,
    /// X keycode for Key* events, button ordinal for Button* events.
    pub detail: u8,
}

/// Pure state machine that turns the raw stream into well-formed log events.
///
/// - Key/button repeats and unmatched releases are suppressed, so every
///   emitted press has exactly one emitted release.
/// - Buttons 4/5 become `Wheel` events with detail +1/-1 and are never
///   emitted as Button*.
/// - The stop chord (Super held, then Q) emits synthetic releases for
///   everything still down and latches [`Canonicalizer::stop_requested`].
/// - Timestamps are rebased against the start time reported by the server.
#[derive(Debug, Default)]
pub struct Canonicalizer {
    start_time: u32,
    pressed_keys: Vec<u16>,
    pressed_buttons: Vec<u8>,
    stop: bool,
}

impl Canonicalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebase subsequent timestamps against the given server time.
    pub fn set_start_time(&mut self, time_ms: u32) {
        self.start_time = time_ms;
    }

    /// Whether the stop chord has been seen.
    pub fn stop_requested(&self) -> bool {
        self.stop
    }

    /// Feed one raw event, producing zero or more canonical events.
    pub fn feed(&mut self, raw: &RawEvent) -> Vec<Event> {
        if self.stop {
            return Vec::new();
        }

        let time = raw.time_ms.wrapping_sub(self.start_time);
        match raw.kind {
            RawKind::KeyPress => self.feed_key_press(raw, time),
            RawKind::KeyRelease => {
                let key = key_code(raw.detail);
                if let Some(pos) = self.pressed_keys.iter().position(|&k| k == key) {
                    self.pressed_keys.remove(pos);
                    vec![self.event(EventKind::KeyRelease, time, raw, key as i32)]
                } else {
                    Vec::new()
                }
            }
            RawKind::ButtonPress => {
                if raw.detail == WHEEL_UP || raw.detail == WHEEL_DOWN {
                    let delta = if raw.detail == WHEEL_UP { 1 } else { -1 };
                    return vec![self.event(EventKind::Wheel, time, raw, delta)];
                }
                if self.pressed_buttons.contains(&raw.detail) {
                    return Vec::new();
                }
                self.pressed_buttons.push(raw.detail);
                vec![self.event(EventKind::ButtonPress, time, raw, raw.detail as i32)]
            }
            RawKind::ButtonRelease => {
                if raw.detail == WHEEL_UP || raw.detail == WHEEL_DOWN {
                    return Vec::new();
                }
                if let Some(pos) = self.pressed_buttons.iter().position(|&b| b == raw.detail) {
                    self.pressed_buttons.remove(pos);
                    vec![self.event(EventKind::ButtonRelease, time, raw, raw.detail as i32)]
                } else {
                    Vec::new()
                }
            }
            RawKind::MotionNotify => {
                vec![self.event(EventKind::MotionNotify, time, raw, 0)]
            }
        }
    }

    fn feed_key_press(&mut self, raw: &RawEvent, time: u32) -> Vec<Event> {
        let key = key_code(raw.detail);

        let super_down = self
            .pressed_keys
            .contains(&evdev::Key::KEY_LEFTMETA.code());
        if super_down && key == evdev::Key::KEY_Q.code() {
            // Close out everything still held so the log stays well-formed.
            let mut events = Vec::new();
            for &held in &self.pressed_keys {
                events.push(self.event(EventKind::KeyRelease, time, raw, held as i32));
            }
            for &held in &self.pressed_buttons {
                events.push(self.event(EventKind::ButtonRelease, time, raw, held as i32));
            }
            self.pressed_keys.clear();
            self.pressed_buttons.clear();
            self.stop = true;
            return events;
        }

        if self.pressed_keys.contains(&key) {
            // Key repeat; the press is already in the log.
            return Vec::new();
        }
        self.pressed_keys.push(key);
        vec![self.event(EventKind::KeyPress, time, raw, key as i32)]
    }

    fn event(&self, kind: EventKind, time: u32, raw: &RawEvent, detail: i32) -> Event {
        Event::new(kind, time, raw.x_root, raw.y_root, detail)
    }
}

fn key_code(x_keycode: u8) -> u16 {
    x_keycode.saturating_sub(KEYCODE_OFFSET) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_press(time: u32, key: u16) -> RawEvent {
        RawEvent {
            kind: RawKind::KeyPress,
            time_ms: time,
            x_root: 0,
            y_root: 0,
            detail: key as u8 + KEYCODE_OFFSET,
        }
    }

    fn key_release(time: u32, key: u16) -> RawEvent {
        RawEvent {
            kind: RawKind::KeyRelease,
            time_ms: time,
            x_root: 0,
            y_root: 0,
            detail: key as u8 + KEYCODE_OFFSET,
        }
    }

    fn button(kind: RawKind, time: u32, ordinal: u8) -> RawEvent {
        RawEvent {
            kind,
            time_ms: time,
            x_root: 10,
            y_root: 20,
            detail: ordinal,
        }
    }

    #[test]
    fn test_key_repeat_suppressed() {
        let mut canon = Canonicalizer::new();
        let a = evdev::Key::KEY_A.code();
        assert_eq!(canon.feed(&key_press(0, a)).len(), 1);
        assert_eq!(canon.feed(&key_press(30, a)).len(), 0);
        assert_eq!(canon.feed(&key_press(60, a)).len(), 0);
        let released = canon.feed(&key_release(90, a));
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].kind, EventKind::KeyRelease);
    }

    #[test]
    fn test_unmatched_release_suppressed() {
        let mut canon = Canonicalizer::new();
        assert!(canon.feed(&key_release(0, evdev::Key::KEY_A.code())).is_empty());
        assert!(canon
            .feed(&button(RawKind::ButtonRelease, 0, 1))
            .is_empty());
    }

    #[test]
    fn test_wheel_mapping() {
        let mut canon = Canonicalizer::new();
        let up = canon.feed(&button(RawKind::ButtonPress, 0, 4));
        assert_eq!(up[0].kind, EventKind::Wheel);
        assert_eq!(up[0].detail, 1);
        let down = canon.feed(&button(RawKind::ButtonPress, 10, 5));
        assert_eq!(down[0].detail, -1);
        // Wheel button releases never surface.
        assert!(canon.feed(&button(RawKind::ButtonRelease, 20, 4)).is_empty());
    }

    #[test]
    fn test_button_repeat_suppressed() {
        let mut canon = Canonicalizer::new();
        assert_eq!(canon.feed(&button(RawKind::ButtonPress, 0, 1)).len(), 1);
        assert_eq!(canon.feed(&button(RawKind::ButtonPress, 5, 1)).len(), 0);
        assert_eq!(canon.feed(&button(RawKind::ButtonRelease, 10, 1)).len(), 1);
    }

    #[test]
    fn test_stop_chord_closes_held_state() {
        let mut canon = Canonicalizer::new();
        let meta = evdev::Key::KEY_LEFTMETA.code();
        let a = evdev::Key::KEY_A.code();
        canon.feed(&key_press(0, a));
        canon.feed(&button(RawKind::ButtonPress, 5, 1));
        canon.feed(&key_press(10, meta));

        let closing = canon.feed(&key_press(20, evdev::Key::KEY_Q.code()));
        assert!(canon.stop_requested());

        // One release per held key plus the held button, no Q press.
        let kinds: Vec<_> = closing.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::KeyRelease,
                EventKind::KeyRelease,
                EventKind::ButtonRelease
            ]
        );
        let details: Vec<_> = closing.iter().map(|e| e.detail).collect();
        assert!(details.contains(&(a as i32)));
        assert!(details.contains(&(meta as i32)));
        assert!(details.contains(&1));

        // Latched: nothing more comes out.
        assert!(canon.feed(&key_press(30, a)).is_empty());
    }

    #[test]
    fn test_q_without_super_is_ordinary() {
        let mut canon = Canonicalizer::new();
        let q = evdev::Key::KEY_Q.code();
        let events = canon.feed(&key_press(0, q));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::KeyPress);
        assert!(!canon.stop_requested());
    }

    #[test]
    fn test_timestamps_rebased() {
        let mut canon = Canonicalizer::new();
        canon.set_start_time(1000);
        let events = canon.feed(&key_press(1250, evdev::Key::KEY_A.code()));
        assert_eq!(events[0].time_ms, 250);
    }

    #[test]
    fn test_motion_carries_coordinates() {
        let mut canon = Canonicalizer::new();
        let raw = RawEvent {
            kind: RawKind::MotionNotify,
            time_ms: 0,
            x_root: 640,
            y_root: 480,
            detail: 0,
        };
        let events = canon.feed(&raw);
        assert_eq!(events[0].x_root, 640);
        assert_eq!(events[0].y_root, 480);
    }
}

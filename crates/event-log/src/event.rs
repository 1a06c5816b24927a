//! The event data model.

use std::fmt;

use battbench_common::error::{BattbenchError, BattbenchResult};

/// One captured or replayed input action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    KeyPress,
    KeyRelease,
    ButtonPress,
    ButtonRelease,
    Wheel,
    MotionNotify,
}

impl EventKind {
    /// The name used in the text format.
    pub fn name(self) -> &'static str {
        match self {
            EventKind::KeyPress => "KeyPress",
            EventKind::KeyRelease => "KeyRelease",
            EventKind::ButtonPress => "ButtonPress",
            EventKind::ButtonRelease => "ButtonRelease",
            EventKind::Wheel => "Wheel",
            EventKind::MotionNotify => "MotionNotify",
        }
    }

    /// Parse a text-format event name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "KeyPress" => Some(EventKind::KeyPress),
            "KeyRelease" => Some(EventKind::KeyRelease),
            "ButtonPress" => Some(EventKind::ButtonPress),
            "ButtonRelease" => Some(EventKind::ButtonRelease),
            "Wheel" => Some(EventKind::Wheel),
            "MotionNotify" => Some(EventKind::MotionNotify),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single timestamped input event.
///
/// `x_root`/`y_root` are absolute pointer coordinates, meaningful only for
/// `MotionNotify` (carried but unused for other kinds). `detail` is a key
/// code for Key* events, a button ordinal (1=left, 2=middle, 3=right) for
/// Button* events, and a signed wheel delta for `Wheel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    /// Milliseconds since the start of the log.
    pub time_ms: u32,
    pub x_root: i32,
    pub y_root: i32,
    pub detail: i32,
}

impl Event {
    pub fn new(kind: EventKind, time_ms: u32, x_root: i32, y_root: i32, detail: i32) -> Self {
        Self {
            kind,
            time_ms,
            x_root,
            y_root,
            detail,
        }
    }

    /// Parse one line of the text format.
    ///
    /// Returns `Ok(None)` for blank and comment-only lines. A line whose
    /// payload does not have exactly five comma-separated fields, or whose
    /// name or numeric fields do not parse, is a hard error.
    pub fn parse_line(line: &str) -> BattbenchResult<Option<Event>> {
        let payload = match line.find('#') {
            Some(pos) => &line[..pos],
            None => line,
        };
        let payload = payload.trim();
        if payload.is_empty() {
            return Ok(None);
        }

        let fields: Vec<&str> = payload.split(',').collect();
        if fields.len() != 5 {
            return Err(BattbenchError::event_log(format!(
                "Bad field count in '{payload}'"
            )));
        }

        let kind = EventKind::from_name(fields[0].trim()).ok_or_else(|| {
            BattbenchError::event_log(format!("Unknown event name '{}'", fields[0].trim()))
        })?;

        let time_ms = parse_field::<u32>(fields[1], "time")?;
        let x_root = parse_field::<i32>(fields[2], "x_root")?;
        let y_root = parse_field::<i32>(fields[3], "y_root")?;
        let detail = parse_field::<i32>(fields[4], "detail")?;

        Ok(Some(Event {
            kind,
            time_ms,
            x_root,
            y_root,
            detail,
        }))
    }

    /// Format as one line of the text format, without a trailing newline.
    pub fn to_line(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.kind.name(),
            self.time_ms,
            self.x_root,
            self.y_root,
            self.detail
        )
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, name: &str) -> BattbenchResult<T> {
    field
        .trim()
        .parse()
        .map_err(|_| BattbenchError::event_log(format!("Bad {name} field '{}'", field.trim())))
}

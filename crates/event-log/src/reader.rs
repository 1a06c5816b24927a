//! Lazy event-log reading.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use battbench_common::error::BattbenchResult;

use crate::event::Event;

/// Reads events lazily from any buffered source.
///
/// Blank and comment lines are skipped; the iterator ends at EOF or at the
/// first malformed line, whichever comes first. A replay that has already
/// injected events up to a parse error does not undo them.
pub struct EventLogReader<R: BufRead> {
    input: R,
    line_buf: String,
    failed: bool,
}

impl<R: BufRead> EventLogReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            line_buf: String::new(),
            failed: false,
        }
    }

    /// Read the next event, skipping non-event lines.
    ///
    /// Returns `Ok(None)` at end of input. After an error the reader is
    /// poisoned and keeps returning `Ok(None)`.
    pub fn next_event(&mut self) -> BattbenchResult<Option<Event>> {
        if self.failed {
            return Ok(None);
        }

        loop {
            self.line_buf.clear();
            let n = self.input.read_line(&mut self.line_buf)?;
            if n == 0 {
                return Ok(None);
            }

            match Event::parse_line(&self.line_buf) {
                Ok(Some(event)) => return Ok(Some(event)),
                Ok(None) => continue,
                Err(e) => {
                    self.failed = true;
                    return Err(e);
                }
            }
        }
    }
}

impl EventLogReader<BufReader<File>> {
    pub fn open(path: &Path) -> BattbenchResult<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> Iterator for EventLogReader<R> {
    type Item = BattbenchResult<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event().transpose()
    }
}

/// The duration of a log in milliseconds: the maximum event timestamp.
pub fn log_duration(path: &Path) -> BattbenchResult<u32> {
    let mut reader = EventLogReader::open(path)?;
    let mut duration = 0;
    while let Some(event) = reader.next_event()? {
        duration = duration.max(event.time_ms);
    }
    Ok(duration)
}

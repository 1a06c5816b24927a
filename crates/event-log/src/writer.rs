//! Event-log writing.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use battbench_common::error::{BattbenchError, BattbenchResult};

use crate::event::Event;

/// Writes events to any sink, one text line per event.
pub struct EventLogWriter<W: Write> {
    writer: W,
    events_written: u64,
}

impl EventLogWriter<BufWriter<File>> {
    /// Create a writer that truncates and writes the given file.
    pub fn create(path: &Path) -> BattbenchResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> EventLogWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            events_written: 0,
        }
    }

    /// Write one event, with an optional human-readable comment suffix.
    /// Comments are ignored by readers.
    pub fn write_event(&mut self, event: &Event, comment: Option<&str>) -> BattbenchResult<()> {
        match comment {
            Some(comment) => writeln!(self.writer, "{} # {}", event.to_line(), comment),
            None => writeln!(self.writer, "{}", event.to_line()),
        }
        .map_err(|e| BattbenchError::event_log(format!("Failed to write event: {e}")))?;
        self.events_written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> BattbenchResult<()> {
        self.writer
            .flush()
            .map_err(|e| BattbenchError::event_log(format!("Failed to flush events: {e}")))?;
        Ok(())
    }

    /// Number of events written.
    pub fn events_written(&self) -> u64 {
        self.events_written
    }
}

impl<W: Write> Drop for EventLogWriter<W> {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

//! System-wide event recording via the X RECORD extension.

use std::io::Write;
use std::path::PathBuf;

use x11rb::connection::Connection;
use x11rb::protocol::record::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{
    BUTTON_PRESS_EVENT, BUTTON_RELEASE_EVENT, KEY_PRESS_EVENT, KEY_RELEASE_EVENT,
    MOTION_NOTIFY_EVENT,
};
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

use battbench_common::error::{BattbenchError, BattbenchResult};
use battbench_event_log::{EventKind, EventLogWriter};

use crate::canonicalize::{Canonicalizer, RawEvent, RawKind};

/// Intercept-data categories of the record extension.
const CATEGORY_FROM_SERVER: u8 = 0;
const CATEGORY_START_OF_DATA: u8 = 4;
const CATEGORY_END_OF_DATA: u8 = 5;

/// Core protocol events are fixed-size wire structs.
const XEVENT_SIZE: usize = 32;

/// Where the recorded log goes.
#[derive(Debug, Clone)]
pub enum RecorderOutput {
    Stdout,
    File(PathBuf),
}

/// Captures the live input stream and writes the event-log text format.
///
/// Control operations (context creation, disable) run on one connection;
/// the recorded data streams over a second connection so that disabling
/// never blocks behind the data stream.
pub struct EventRecorder {
    control: RustConnection,
    data: RustConnection,
    context: record::Context,
    writer: EventLogWriter<Box<dyn Write + Send>>,
    canonicalizer: Canonicalizer,
}

impl EventRecorder {
    /// Connect to the display and set up a record context for all device
    /// events from all clients. Fails if the RECORD extension is missing or
    /// the data connection cannot be opened.
    pub fn open(display: Option<&str>, output: RecorderOutput) -> BattbenchResult<Self> {
        let (control, _) = x11rb::connect(display)
            .map_err(|e| BattbenchError::capture(format!("Can't open X display: {e}")))?;
        let (data, _) = x11rb::connect(display).map_err(|e| {
            BattbenchError::capture(format!("Can't open data connection to X display: {e}"))
        })?;

        control
            .record_query_version(1, 13)
            .map_err(x11_error)?
            .reply()
            .map_err(|e| {
                BattbenchError::capture(format!("Record extension is not present: {e}"))
            })?;

        let context = control.generate_id().map_err(x11_error)?;
        let range = record::Range {
            device_events: record::Range8 {
                first: KEY_PRESS_EVENT,
                last: MOTION_NOTIFY_EVENT,
            },
            ..Default::default()
        };
        control
            .record_create_context(context, 0, &[record::CS::ALL_CLIENTS.into()], &[range])
            .map_err(x11_error)?
            .check()
            .map_err(|e| BattbenchError::capture(format!("Can't create record context: {e}")))?;

        // The context must be visible to the data connection before enabling.
        control.sync().map_err(x11_error)?;

        let sink: Box<dyn Write + Send> = match &output {
            RecorderOutput::Stdout => Box::new(std::io::stdout()),
            RecorderOutput::File(path) => {
                let file = std::fs::File::create(path).map_err(|e| {
                    BattbenchError::capture(format!("Can't open output file {path:?}: {e}"))
                })?;
                Box::new(file)
            }
        };

        Ok(Self {
            control,
            data,
            context,
            writer: EventLogWriter::new(sink),
            canonicalizer: Canonicalizer::new(),
        })
    }

    /// Record until the stop chord (Super+Q) is seen, then tear down the
    /// record context.
    pub fn run(mut self) -> BattbenchResult<()> {
        tracing::info!("Recording input events; press Super+Q to stop");

        let cookie = self
            .data
            .record_enable_context(self.context)
            .map_err(x11_error)?;

        for reply in cookie {
            let reply =
                reply.map_err(|e| BattbenchError::capture(format!("Record stream error: {e}")))?;

            match reply.category {
                CATEGORY_START_OF_DATA => {
                    self.canonicalizer.set_start_time(reply.server_time);
                }
                CATEGORY_FROM_SERVER => {
                    for chunk in reply.data.chunks_exact(XEVENT_SIZE) {
                        Self::handle_xevent(
                            &mut self.canonicalizer,
                            &mut self.writer,
                            chunk,
                            reply.client_swapped,
                        )?;
                    }
                    if self.canonicalizer.stop_requested() {
                        // Disable on the control connection; the data stream
                        // ends with an end-of-data reply.
                        self.control
                            .record_disable_context(self.context)
                            .map_err(x11_error)?;
                        self.control.flush().map_err(x11_error)?;
                    }
                }
                CATEGORY_END_OF_DATA => break,
                _ => {}
            }
        }

        self.writer.flush()?;
        self.control
            .record_free_context(self.context)
            .map_err(x11_error)?;
        self.control.flush().map_err(x11_error)?;

        tracing::info!(events = self.writer.events_written(), "Recording finished");
        Ok(())
    }

    fn handle_xevent(
        canonicalizer: &mut Canonicalizer,
        writer: &mut EventLogWriter<Box<dyn Write + Send>>,
        wire: &[u8],
        swapped: bool,
    ) -> BattbenchResult<()> {
        let kind = match wire[0] & 0x7f {
            KEY_PRESS_EVENT => RawKind::KeyPress,
            KEY_RELEASE_EVENT => RawKind::KeyRelease,
            BUTTON_PRESS_EVENT => RawKind::ButtonPress,
            BUTTON_RELEASE_EVENT => RawKind::ButtonRelease,
            MOTION_NOTIFY_EVENT => RawKind::MotionNotify,
            _ => return Ok(()),
        };

        let raw = RawEvent {
            kind,
            time_ms: read_u32(&wire[4..8], swapped),
            x_root: read_i16(&wire[20..22], swapped) as i32,
            y_root: read_i16(&wire[22..24], swapped) as i32,
            detail: wire[1],
        };

        for event in canonicalizer.feed(&raw) {
            let comment = match event.kind {
                EventKind::KeyPress | EventKind::KeyRelease => {
                    Some(format!("{:?}", evdev::Key::new(event.detail as u16)))
                }
                _ => None,
            };
            writer.write_event(&event, comment.as_deref())?;
        }
        Ok(())
    }
}

// Recorded wire data arrives in the recorded client's byte order;
// `client_swapped` marks it as the opposite of ours.
fn read_u32(bytes: &[u8], swapped: bool) -> u32 {
    let arr: [u8; 4] = bytes.try_into().unwrap_or([0; 4]);
    let value = u32::from_ne_bytes(arr);
    if swapped {
        value.swap_bytes()
    } else {
        value
    }
}

fn read_i16(bytes: &[u8], swapped: bool) -> i16 {
    let arr: [u8; 2] = bytes.try_into().unwrap_or([0; 2]);
    let value = i16::from_ne_bytes(arr);
    if swapped {
        value.swap_bytes()
    } else {
        value
    }
}

fn x11_error(e: impl std::fmt::Display) -> BattbenchError {
    BattbenchError::capture(format!("X connection error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_reads_follow_client_byte_order() {
        let time: u32 = 0x1234_5678;
        assert_eq!(read_u32(&time.to_ne_bytes(), false), time);
        assert_eq!(read_u32(&time.to_ne_bytes(), true), time.swap_bytes());

        let coord: i16 = -42;
        assert_eq!(read_i16(&coord.to_ne_bytes(), false), coord);
        assert_eq!(read_i16(&coord.to_ne_bytes(), true), coord.swap_bytes());
    }

    #[test]
    fn test_wire_reads_tolerate_short_slices() {
        assert_eq!(read_u32(&[1, 2], false), 0);
        assert_eq!(read_i16(&[], false), 0);
    }
}

//! battbench Event Log
//!
//! The portable recorded-input format shared by capture and replay. A log is
//! a finite sequence of timestamped input events, one per line:
//!
//! ```text
//! name,time_ms,x_root,y_root,detail[ # comment]
//! ```
//!
//! Timestamps are milliseconds relative to the start of the recording, not
//! wall-clock time. A well-formed log is non-decreasing in `time_ms`;
//! readers tolerate duplicate timestamps. `#` starts a comment that runs to
//! the end of the line; blank lines are skipped.

pub mod event;
pub mod reader;
pub mod writer;

pub use event::{Event, EventKind};
pub use reader::{log_duration, EventLogReader};
pub use writer::EventLogWriter;

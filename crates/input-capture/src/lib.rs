//! battbench Input Capture
//!
//! Records keyboard, button, and pointer events system-wide at the X server
//! using the RECORD extension, canonicalizes transient key/button state, and
//! writes the portable event-log text format.
//!
//! The raw stream is messy: the server delivers key repeats as extra
//! KeyPress events, wheel motion as button 4/5 press/release pairs, and the
//! operator needs a way to end a recording without leaving keys logically
//! held down. [`Canonicalizer`] is the pure state machine that cleans all of
//! this up; [`EventRecorder`] wires it to the X server and the output sink.

pub mod canonicalize;
pub mod recorder;

pub use canonicalize::{Canonicalizer, RawEvent, RawKind};
pub use recorder::{EventRecorder, RecorderOutput};

//! battbench Event Replay
//!
//! Plays recorded event logs back as synthesized OS input. Two player
//! implementations sit behind the [`EventPlayer`] capability trait:
//!
//! - [`LocalPlayer`] creates virtual keyboard/mouse devices through uinput
//!   and injects events in-process with microsecond-relative pacing. It
//!   needs privileges.
//! - [`RemotePlayer`] hands the log's file descriptor to the privileged
//!   replay helper over the system bus and proxies its lifecycle.
//!
//! [`DeviceReadinessWaiter`] closes the race between virtual-device
//! creation and the display server noticing the new devices.

pub mod bus;
pub mod local;
pub mod player;
pub mod readiness;
pub mod remote;

pub use local::{EventSink, LocalPlayer};
pub use player::{EventPlayer, PlayerSignal, SignalReceiver};
pub use readiness::{CancelHandle, DeviceReadinessWaiter};
pub use remote::RemotePlayer;

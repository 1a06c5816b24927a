//! battbench Replay Helper
//!
//! The privileged half of remote playback. Runs as a system-bus service:
//! clients ask the factory object for a player session, polkit decides
//! whether they may simulate input, and each session wraps a pair of
//! virtual uinput devices. Sessions are torn down explicitly via `Destroy`
//! or implicitly when their creator falls off the bus.

pub mod factory;
pub mod polkit;
pub mod session;

pub use factory::{serve, HelperFactory};
pub use session::PlayerSession;

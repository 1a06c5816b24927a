//! The event-player capability trait.

use std::fs::File;
use std::path::Path;

use tokio::sync::mpsc;

use battbench_common::error::BattbenchResult;

/// Signals a player delivers to its owner.
///
/// `Ready` fires once the player's virtual device nodes exist. `Finished`
/// fires exactly once per started playback, whether it ran to completion,
/// was stopped, or failed — owners wait on this rather than polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerSignal {
    Ready,
    Finished,
}

/// Receiving half of a player's signal channel, handed out at construction.
pub type SignalReceiver = mpsc::UnboundedReceiver<PlayerSignal>;

/// Plays an event log back as synthesized input.
///
/// Contract: `play_fd` must not be called again until the previous playback
/// has signaled `Finished`; violating this is a caller bug and panics.
/// `stop` on a player with nothing in flight is a no-op.
pub trait EventPlayer: Send {
    /// Whether the virtual devices exist yet.
    fn is_ready(&self) -> bool;

    /// Device node of the virtual keyboard, once ready.
    fn keyboard_device_node(&self) -> Option<String>;

    /// Device node of the virtual mouse, once ready.
    fn mouse_device_node(&self) -> Option<String>;

    /// Start replaying the log read from `log`.
    fn play_fd(&mut self, log: File) -> BattbenchResult<()>;

    /// Open `path` and start replaying it.
    fn play_file(&mut self, path: &Path) -> BattbenchResult<()> {
        let file = File::open(path).map_err(|e| {
            battbench_common::error::BattbenchError::replay(format!("Can't open {path:?}: {e}"))
        })?;
        self.play_fd(file)
    }

    /// Cancel an in-flight playback. `Finished` is still delivered,
    /// exactly once.
    fn stop(&mut self);
}

//! The system-bus contract shared by the replay helper and its clients.

use zbus::zvariant::{Fd, OwnedObjectPath};

/// Well-known bus name of the replay helper.
pub const HELPER_BUS_NAME: &str = "org.battbench.Helper";

/// Object path of the factory object.
pub const HELPER_PATH: &str = "/org/battbench/Helper";

/// Interface of the factory object.
pub const HELPER_INTERFACE: &str = "org.battbench.Helper";

/// Base path under which per-session player objects are registered.
pub const PLAYER_PATH_BASE: &str = "/org/battbench/Player";

/// Interface of per-session player objects.
pub const PLAYER_INTERFACE: &str = "org.battbench.Player";

/// Polkit action gating `CreatePlayer`.
pub const SIMULATE_EVENTS_ACTION: &str = "org.battbench.Helper.SimulateEvents";

/// Client proxy for the factory object.
#[zbus::proxy(
    interface = "org.battbench.Helper",
    default_service = "org.battbench.Helper",
    default_path = "/org/battbench/Helper"
)]
pub trait Helper {
    /// Authorize the caller and create a per-session player object.
    fn create_player(&self, name: &str) -> zbus::Result<OwnedObjectPath>;
}

/// Client proxy for a per-session player object.
#[zbus::proxy(
    interface = "org.battbench.Player",
    default_service = "org.battbench.Helper"
)]
pub trait Player {
    /// Replay the log passed as a file descriptor. The reply is deferred
    /// until playback ends, so this call is the completion notification.
    fn play(&self, log: Fd<'_>) -> zbus::Result<()>;

    /// Stop an in-flight playback.
    fn stop(&self) -> zbus::Result<()>;

    /// Tear the session down, releasing the virtual devices.
    fn destroy(&self) -> zbus::Result<()>;

    #[zbus(property)]
    fn keyboard_device_node(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn mouse_device_node(&self) -> zbus::Result<String>;
}

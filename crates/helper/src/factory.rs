//! The factory object and session bookkeeping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use zbus::message::Header;
use zbus::zvariant::OwnedObjectPath;
use zbus::{interface, Connection, ObjectServer};

use battbench_replay::bus::{HELPER_BUS_NAME, HELPER_PATH, PLAYER_PATH_BASE};

use crate::polkit;
use crate::session::PlayerSession;

/// Live sessions keyed by the unique bus name that created them.
pub type SessionMap = Arc<Mutex<HashMap<String, Vec<OwnedObjectPath>>>>;

/// The `org.battbench.Helper` factory, exported at `/org/battbench/Helper`.
pub struct HelperFactory {
    sessions: SessionMap,
    serial: AtomicU64,
}

impl HelperFactory {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            serial: AtomicU64::new(1),
        }
    }

    pub fn sessions(&self) -> SessionMap {
        Arc::clone(&self.sessions)
    }
}

impl Default for HelperFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[interface(name = "org.battbench.Helper")]
impl HelperFactory {
    /// Authorize the caller through polkit and create a player session.
    /// Returns the object path of the new session.
    async fn create_player(
        &self,
        name: &str,
        #[zbus(header)] header: Header<'_>,
        #[zbus(connection)] connection: &Connection,
        #[zbus(object_server)] server: &ObjectServer,
    ) -> zbus::fdo::Result<OwnedObjectPath> {
        let sender = header
            .sender()
            .ok_or_else(|| zbus::fdo::Error::Failed("Message has no sender".to_string()))?
            .to_string();

        polkit::check_simulate_events(&sender, connection).await?;

        let serial = self.serial.fetch_add(1, Ordering::SeqCst);
        let path = OwnedObjectPath::try_from(format!("{PLAYER_PATH_BASE}/{serial}"))
            .map_err(|e| zbus::fdo::Error::Failed(format!("Bad object path: {e}")))?;

        let session = PlayerSession::new(name, sender.clone(), path.clone(), self.sessions())
            .map_err(|e| {
                zbus::fdo::Error::Failed(format!("Can't create virtual devices: {e}"))
            })?;

        server
            .at(&path, session)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(format!("Can't export session: {e}")))?;

        {
            let mut sessions = self
                .sessions
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            sessions.entry(sender.clone()).or_default().push(path.clone());
        }

        tracing::info!(owner = %sender, path = %path, "Player session created");
        Ok(path)
    }
}

/// Tear down sessions whose creator fell off the bus.
///
/// Watches `NameOwnerChanged`; when a unique name with live sessions loses
/// its owner, each of its sessions is stopped and unexported, exactly as if
/// the client had called `Destroy`. Returns only if the bus connection dies.
pub async fn watch_liveness(connection: Connection, sessions: SessionMap) -> zbus::Result<()> {
    let dbus = zbus::fdo::DBusProxy::new(&connection).await?;
    let mut stream = dbus.receive_name_owner_changed().await?;

    while let Some(signal) = stream.next().await {
        let args = signal.args()?;
        if args.new_owner().is_some() {
            continue;
        }
        let name = args.name().to_string();

        let orphaned = {
            let mut sessions = sessions.lock().unwrap_or_else(|poison| poison.into_inner());
            sessions.remove(&name)
        };
        let Some(paths) = orphaned else { continue };

        tracing::info!(owner = %name, count = paths.len(), "Client vanished; tearing down sessions");
        for path in paths {
            if let Ok(iface) = connection
                .object_server()
                .interface::<_, PlayerSession>(&path)
                .await
            {
                iface.get().await.shutdown();
            }
            let _ = connection
                .object_server()
                .remove::<PlayerSession, _>(&path)
                .await;
        }
    }
    Ok(())
}

/// Claim the helper name on the system bus and serve until the
/// connection is lost.
pub async fn serve() -> anyhow::Result<()> {
    let factory = HelperFactory::new();
    let sessions = factory.sessions();

    let connection = zbus::connection::Builder::system()?
        .name(HELPER_BUS_NAME)?
        .serve_at(HELPER_PATH, factory)?
        .build()
        .await?;

    tracing::info!(name = HELPER_BUS_NAME, "Replay helper listening");

    watch_liveness(connection, sessions).await?;
    anyhow::bail!("Lost connection to the system bus");
}

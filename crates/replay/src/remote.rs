//! Playback through the privileged replay helper.

use std::fs::File;
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use zbus::zvariant::Fd;
use zbus::Connection;

use battbench_common::error::{BattbenchError, BattbenchResult};

use crate::bus::{HelperProxy, PlayerProxy};
use crate::player::{EventPlayer, PlayerSignal, SignalReceiver};

/// Client for a player session hosted by the replay helper.
///
/// The handshake — connect to the system bus, ask the factory for a session,
/// read the virtual device nodes — happens in [`RemotePlayer::connect`], so a
/// connected player is always ready. Playback hands the log's file descriptor
/// to the helper; the helper defers its method reply until playback ends,
/// which is what drives the `Finished` signal here.
pub struct RemotePlayer {
    session: PlayerProxy<'static>,
    keyboard_node: Option<String>,
    mouse_node: Option<String>,
    signals: mpsc::UnboundedSender<PlayerSignal>,
    playing: Arc<AtomicBool>,
}

impl RemotePlayer {
    /// Create a player session on the helper and wait for its devices.
    ///
    /// Fails if the helper is not installed, the bus is unreachable, or
    /// polkit denies the caller.
    pub async fn connect(name: &str) -> BattbenchResult<(Self, SignalReceiver)> {
        let connection = Connection::system().await.map_err(bus_error)?;

        let helper = HelperProxy::new(&connection).await.map_err(bus_error)?;
        let path = helper.create_player(name).await.map_err(|e| {
            BattbenchError::replay(format!("Helper refused to create a player: {e}"))
        })?;

        tracing::debug!(path = %path, "Player session created");

        let session = PlayerProxy::builder(&connection)
            .path(path)
            .map_err(bus_error)?
            .build()
            .await
            .map_err(bus_error)?;

        let keyboard_node = session.keyboard_device_node().await.ok();
        let mouse_node = session.mouse_device_node().await.ok();

        let (signals, receiver) = mpsc::unbounded_channel();
        let _ = signals.send(PlayerSignal::Ready);

        Ok((
            Self {
                session,
                keyboard_node,
                mouse_node,
                signals,
                playing: Arc::new(AtomicBool::new(false)),
            },
            receiver,
        ))
    }

    /// Tear the remote session down. The helper releases the virtual
    /// devices and forgets the object path.
    pub async fn destroy(&self) -> BattbenchResult<()> {
        self.session.destroy().await.map_err(bus_error)
    }
}

impl EventPlayer for RemotePlayer {
    fn is_ready(&self) -> bool {
        true
    }

    fn keyboard_device_node(&self) -> Option<String> {
        self.keyboard_node.clone()
    }

    fn mouse_device_node(&self) -> Option<String> {
        self.mouse_node.clone()
    }

    fn play_fd(&mut self, log: File) -> BattbenchResult<()> {
        assert!(
            !self.playing.swap(true, Ordering::SeqCst),
            "play_fd called while a playback is in flight"
        );

        let session = self.session.clone();
        let signals = self.signals.clone();
        let playing = Arc::clone(&self.playing);

        tokio::spawn(async move {
            let fd = Fd::from(OwnedFd::from(log));
            if let Err(e) = session.play(fd).await {
                tracing::warn!(error = %e, "Remote playback failed");
            }
            playing.store(false, Ordering::SeqCst);
            let _ = signals.send(PlayerSignal::Finished);
        });
        Ok(())
    }

    fn stop(&mut self) {
        if !self.playing.load(Ordering::SeqCst) {
            return;
        }
        let session = self.session.clone();
        tokio::spawn(async move {
            if let Err(e) = session.stop().await {
                tracing::warn!(error = %e, "Can't stop remote playback");
            }
        });
    }
}

fn bus_error(e: zbus::Error) -> BattbenchError {
    BattbenchError::replay(format!("System bus error: {e}"))
}

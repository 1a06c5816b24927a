//! Per-client player sessions.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use zbus::interface;
use zbus::zvariant::{Fd, OwnedObjectPath};
use zbus::Connection;

use battbench_common::error::BattbenchResult;
use battbench_replay::player::{EventPlayer, PlayerSignal, SignalReceiver};
use battbench_replay::LocalPlayer;

use crate::factory::SessionMap;

/// One client's virtual-device session, exported at
/// `/org/battbench/Player/<serial>`.
///
/// The `Play` reply is deferred until playback finishes, so the method call
/// itself is the client's completion notification. `Stop` and `Destroy`
/// stay callable while a playback is in flight.
pub struct PlayerSession {
    player: Arc<Mutex<LocalPlayer>>,
    signals: Arc<tokio::sync::Mutex<SignalReceiver>>,
    busy: Arc<AtomicBool>,
    destroyed: Arc<AtomicBool>,
    keyboard_node: String,
    mouse_node: String,
    path: OwnedObjectPath,
    owner: String,
    sessions: SessionMap,
}

impl PlayerSession {
    pub(crate) fn new(
        name: &str,
        owner: String,
        path: OwnedObjectPath,
        sessions: SessionMap,
    ) -> BattbenchResult<Self> {
        let (player, signals) = LocalPlayer::new(name)?;
        Ok(Self::from_player(player, signals, owner, path, sessions))
    }

    fn from_player(
        player: LocalPlayer,
        signals: SignalReceiver,
        owner: String,
        path: OwnedObjectPath,
        sessions: SessionMap,
    ) -> Self {
        let keyboard_node = player.keyboard_device_node().unwrap_or_default();
        let mouse_node = player.mouse_device_node().unwrap_or_default();

        Self {
            player: Arc::new(Mutex::new(player)),
            signals: Arc::new(tokio::sync::Mutex::new(signals)),
            busy: Arc::new(AtomicBool::new(false)),
            destroyed: Arc::new(AtomicBool::new(false)),
            keyboard_node,
            mouse_node,
            path,
            owner,
            sessions,
        }
    }

    /// Stop playback and mark the session dead. Used by `Destroy` and by
    /// the liveness watch when the owner falls off the bus; an in-flight
    /// `Play` then resolves with an error.
    ///
    /// `destroyed` is set while holding the player lock. `play_inner`
    /// re-checks it under the same lock before starting, so a teardown
    /// either lands before the playback exists or stops a playback that
    /// does.
    pub(crate) fn shutdown(&self) {
        let mut player = lock(&self.player);
        self.destroyed.store(true, Ordering::SeqCst);
        player.stop();
    }

    fn deregister(&self) {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if let Some(paths) = sessions.get_mut(&self.owner) {
            paths.retain(|p| p != &self.path);
            if paths.is_empty() {
                sessions.remove(&self.owner);
            }
        }
    }
}

#[interface(name = "org.battbench.Player")]
impl PlayerSession {
    /// Replay the log passed as a file descriptor. Replies when playback
    /// ends, whether it ran out of events, was stopped, or failed.
    async fn play(&self, fd: Fd<'_>) -> zbus::fdo::Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(zbus::fdo::Error::Failed("Player was destroyed".to_string()));
        }
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(zbus::fdo::Error::Failed(
                "A playback is already in progress".to_string(),
            ));
        }

        let result = self.play_inner(fd).await;
        self.busy.store(false, Ordering::SeqCst);

        if result.is_ok() && self.destroyed.load(Ordering::SeqCst) {
            return Err(zbus::fdo::Error::Failed(
                "Player was destroyed during playback".to_string(),
            ));
        }
        result
    }

    /// Stop an in-flight playback. The pending `Play` call still gets
    /// its reply.
    async fn stop(&self) -> zbus::fdo::Result<()> {
        if !self.busy.load(Ordering::SeqCst) {
            return Err(zbus::fdo::Error::Failed(
                "No playback in progress".to_string(),
            ));
        }
        lock(&self.player).stop();
        Ok(())
    }

    /// Tear the session down and release the virtual devices.
    async fn destroy(
        &self,
        #[zbus(connection)] connection: &Connection,
    ) -> zbus::fdo::Result<()> {
        tracing::info!(path = %self.path, owner = %self.owner, "Destroying player session");
        self.shutdown();
        self.deregister();

        // Unexport outside this call so the reply goes out first.
        let connection = connection.clone();
        let path = self.path.clone();
        tokio::spawn(async move {
            let _ = connection
                .object_server()
                .remove::<PlayerSession, _>(&path)
                .await;
        });
        Ok(())
    }

    #[zbus(property)]
    fn keyboard_device_node(&self) -> String {
        self.keyboard_node.clone()
    }

    #[zbus(property)]
    fn mouse_device_node(&self) -> String {
        self.mouse_node.clone()
    }
}

impl PlayerSession {
    async fn play_inner(&self, fd: Fd<'_>) -> zbus::fdo::Result<()> {
        let mut file = fd
            .as_fd()
            .try_clone_to_owned()
            .map(File::from)
            .map_err(|e| zbus::fdo::Error::Failed(format!("Bad log descriptor: {e}")))?;
        // The client may have read from the descriptor already.
        let _ = file.seek(SeekFrom::Start(0));

        {
            let mut player = lock(&self.player);
            if self.destroyed.load(Ordering::SeqCst) {
                return Err(zbus::fdo::Error::Failed("Player was destroyed".to_string()));
            }
            player
                .play_fd(file)
                .map_err(|e| zbus::fdo::Error::Failed(format!("Can't start playback: {e}")))?;
        }

        let mut signals = self.signals.lock().await;
        loop {
            match signals.recv().await {
                Some(PlayerSignal::Finished) | None => break,
                Some(PlayerSignal::Ready) => continue,
            }
        }
        Ok(())
    }
}

fn lock(player: &Mutex<LocalPlayer>) -> MutexGuard<'_, LocalPlayer> {
    player.lock().unwrap_or_else(|poison| poison.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use std::os::fd::OwnedFd;
    use std::sync::atomic::AtomicUsize;

    use battbench_event_log::Event;
    use battbench_replay::EventSink;

    struct CountingSink(Arc<AtomicUsize>);

    impl EventSink for CountingSink {
        fn inject(&mut self, _event: &Event) -> std::io::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn stub_session() -> (PlayerSession, Arc<AtomicUsize>) {
        let injected = Arc::new(AtomicUsize::new(0));
        let (player, signals) =
            LocalPlayer::with_sink(Box::new(CountingSink(Arc::clone(&injected))));
        let path = OwnedObjectPath::try_from("/org/battbench/Player/1").unwrap();
        let sessions: SessionMap = Arc::new(Mutex::new(HashMap::new()));
        let session =
            PlayerSession::from_player(player, signals, ":1.7".to_string(), path, sessions);
        (session, injected)
    }

    fn log_fd(text: &str) -> Fd<'static> {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        Fd::from(OwnedFd::from(file))
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_after_shutdown_is_rejected() {
        let (session, injected) = stub_session();
        session.shutdown();

        let err = session.play(log_fd("KeyPress,0,0,0,30\n")).await.unwrap_err();
        assert!(err.to_string().contains("destroyed"));
        assert_eq!(injected.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_play_stops_injection() {
        let (session, injected) = stub_session();

        // The lone event sits a minute out; teardown must beat it.
        let (result, _) = tokio::join!(session.play(log_fd("KeyPress,60000,0,0,30\n")), async {
            tokio::task::yield_now().await;
            session.shutdown();
        });

        assert!(result.is_err());
        assert_eq!(injected.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_without_playback_is_an_error() {
        let (session, _) = stub_session();
        assert!(session.stop().await.is_err());
    }
}

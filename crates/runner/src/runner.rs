//! The test-run phase machine.

use std::path::PathBuf;

use tokio::sync::watch;

use battbench_common::error::{BattbenchError, BattbenchResult};
use battbench_replay::EventPlayer;

use crate::power::PowerSnapshot;
use crate::system_state::SystemState;
use crate::test_run::TestRun;

/// Where a run currently is.
///
/// `Prologue` and `Epilogue` are skipped when the test has no such script.
/// `Stopping` covers the window between asking the player to stop and its
/// `Finished` landing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Stopped,
    Prologue,
    Waiting,
    Running,
    Stopping,
    Epilogue,
}

/// Sequences prologue/loop/epilogue playback against power-state input.
///
/// The runner is purely reactive: it owns no timers and reads no hardware.
/// A driver pumps it with [`on_player_finished`](TestRunner::on_player_finished)
/// and [`on_power_change`](TestRunner::on_power_change) and watches phase
/// changes on the channel returned from [`new`](TestRunner::new). Player
/// errors count as an immediate finish; phases never block on a failed
/// player.
pub struct TestRunner {
    player: Box<dyn EventPlayer>,
    system_state: Box<dyn SystemState>,
    phase_tx: watch::Sender<Phase>,
    run: Option<TestRun>,
    last_snapshot: Option<PowerSnapshot>,
    stop_requested: bool,
    force_stopped: bool,
    loops_completed: u32,
}

impl TestRunner {
    pub fn new(
        player: Box<dyn EventPlayer>,
        system_state: Box<dyn SystemState>,
    ) -> (Self, watch::Receiver<Phase>) {
        let (phase_tx, phase_rx) = watch::channel(Phase::Stopped);
        (
            Self {
                player,
                system_state,
                phase_tx,
                run: None,
                last_snapshot: None,
                stop_requested: false,
                force_stopped: false,
                loops_completed: 0,
            },
            phase_rx,
        )
    }

    pub fn phase(&self) -> Phase {
        *self.phase_tx.borrow()
    }

    /// Loop-script completions so far in the current run.
    pub fn loops_completed(&self) -> u32 {
        self.loops_completed
    }

    /// The finished run, for report writing. Only meaningful in Stopped.
    pub fn take_run(&mut self) -> Option<TestRun> {
        self.run.take()
    }

    /// Begin a run. Saves system state, applies the requested brightness,
    /// and plays the prologue if the test has one.
    pub fn start(&mut self, run: TestRun) -> BattbenchResult<()> {
        if self.phase() != Phase::Stopped {
            return Err(BattbenchError::test_run(
                "A test run is already in progress".to_string(),
            ));
        }

        self.system_state.save()?;
        if let Err(e) = self.system_state.set_brightness(run.screen_brightness) {
            tracing::warn!(error = %e, "Can't set screen brightness");
        }

        self.stop_requested = false;
        self.force_stopped = false;
        self.loops_completed = 0;

        let prologue = run.test().prologue_file.clone();
        self.run = Some(run);

        match prologue {
            Some(path) => {
                self.set_phase(Phase::Prologue);
                if !self.play(&path) {
                    self.enter_waiting();
                }
            }
            None => self.enter_waiting(),
        }
        Ok(())
    }

    /// Graceful stop: the epilogue still runs.
    pub fn stop(&mut self) {
        match self.phase() {
            Phase::Running => {
                self.set_phase(Phase::Stopping);
                self.player.stop();
            }
            Phase::Waiting => self.enter_epilogue(),
            // Honored when the prologue finishes.
            Phase::Prologue => self.stop_requested = true,
            Phase::Stopped | Phase::Stopping | Phase::Epilogue => {}
        }
    }

    /// Emergency stop ahead of sleep or shutdown: skips the epilogue.
    pub fn force_stop(&mut self) {
        match self.phase() {
            Phase::Stopped => {}
            Phase::Waiting => self.finish(),
            Phase::Prologue | Phase::Running | Phase::Stopping | Phase::Epilogue => {
                self.force_stopped = true;
                self.player.stop();
            }
        }
    }

    /// The player signalled `Finished` (or failed, which counts the same).
    pub fn on_player_finished(&mut self) {
        if self.force_stopped {
            self.finish();
            return;
        }

        match self.phase() {
            Phase::Prologue => {
                if self.stop_requested {
                    self.stop_requested = false;
                    self.enter_epilogue();
                } else {
                    self.enter_waiting();
                }
            }
            Phase::Running => {
                self.loops_completed += 1;
                let current = self.last_snapshot.unwrap_or_default();
                let done = self
                    .run
                    .as_ref()
                    .map(|run| run.is_done(&current))
                    .unwrap_or(true);
                if done {
                    self.enter_epilogue();
                } else {
                    self.replay_loop();
                }
            }
            Phase::Stopping => self.enter_epilogue(),
            Phase::Epilogue => self.finish(),
            // A stray signal from an earlier playback.
            Phase::Stopped | Phase::Waiting => {}
        }
    }

    /// A new power snapshot arrived.
    pub fn on_power_change(&mut self, snapshot: PowerSnapshot) {
        self.last_snapshot = Some(snapshot);

        match self.phase() {
            Phase::Waiting => {
                if !snapshot.online {
                    self.begin_running(snapshot);
                }
            }
            Phase::Running => {
                let done = match self.run.as_mut() {
                    Some(run) => {
                        run.add(snapshot);
                        run.is_done(&snapshot)
                    }
                    None => true,
                };
                if done {
                    self.stop();
                }
            }
            _ => {}
        }
    }

    fn enter_waiting(&mut self) {
        self.set_phase(Phase::Waiting);
        // The monitor only notifies on change; if the machine is already
        // discharging there will be no edge to wait for.
        if let Some(snapshot) = self.last_snapshot {
            if !snapshot.online {
                self.begin_running(snapshot);
            }
        }
    }

    fn begin_running(&mut self, reference: PowerSnapshot) {
        if let Some(run) = self.run.as_mut() {
            run.begin(reference);
        }
        self.set_phase(Phase::Running);
        self.replay_loop();
    }

    fn replay_loop(&mut self) {
        let path = self
            .run
            .as_ref()
            .map(|run| run.test().loop_file.clone());
        match path {
            Some(path) => {
                if !self.play(&path) {
                    self.enter_epilogue();
                }
            }
            None => self.enter_epilogue(),
        }
    }

    fn enter_epilogue(&mut self) {
        let epilogue = self
            .run
            .as_ref()
            .and_then(|run| run.test().epilogue_file.clone());
        match epilogue {
            Some(path) => {
                self.set_phase(Phase::Epilogue);
                if !self.play(&path) {
                    self.finish();
                }
            }
            None => self.finish(),
        }
    }

    fn finish(&mut self) {
        self.system_state.restore();
        self.stop_requested = false;
        self.force_stopped = false;
        self.set_phase(Phase::Stopped);
    }

    fn play(&mut self, path: &PathBuf) -> bool {
        match self.player.play_file(path) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Playback failed");
                false
            }
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if *self.phase_tx.borrow() != phase {
            tracing::debug!(?phase, "Phase change");
            // send_replace: the value must move even with no subscribers.
            self.phase_tx.send_replace(phase);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::battery_test::BatteryTest;
    use crate::system_state::NullSystemState;
    use crate::test_run::DurationPolicy;

    #[derive(Default)]
    struct StubPlayer {
        plays: Arc<Mutex<Vec<PathBuf>>>,
        stops: Arc<AtomicU32>,
    }

    impl EventPlayer for StubPlayer {
        fn is_ready(&self) -> bool {
            true
        }

        fn keyboard_device_node(&self) -> Option<String> {
            None
        }

        fn mouse_device_node(&self) -> Option<String> {
            None
        }

        fn play_fd(&mut self, _log: File) -> BattbenchResult<()> {
            Ok(())
        }

        fn play_file(&mut self, path: &Path) -> BattbenchResult<()> {
            self.plays.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn battery_test(prologue: bool, epilogue: bool) -> BatteryTest {
        BatteryTest {
            id: "idle".to_string(),
            name: "Idle".to_string(),
            description: None,
            loop_file: "idle.loop".into(),
            prologue_file: prologue.then(|| "idle.prologue".into()),
            epilogue_file: epilogue.then(|| "idle.epilogue".into()),
        }
    }

    fn runner_with(
        test: BatteryTest,
        policy: DurationPolicy,
    ) -> (TestRunner, Arc<Mutex<Vec<PathBuf>>>, Arc<AtomicU32>) {
        let stub = StubPlayer::default();
        let plays = Arc::clone(&stub.plays);
        let stops = Arc::clone(&stub.stops);
        let (mut runner, _phases) =
            TestRunner::new(Box::new(stub), Box::new(NullSystemState));
        runner
            .start(TestRun::new(test, policy, 100))
            .unwrap();
        (runner, plays, stops)
    }

    fn discharging(time_us: i64, energy_now: f64) -> PowerSnapshot {
        PowerSnapshot {
            time_us,
            online: false,
            energy_now,
            energy_full: 50.0,
            ..PowerSnapshot::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_time_phase_sequencing() {
        let (mut runner, plays, _stops) = runner_with(
            battery_test(false, false),
            DurationPolicy::FixedTime(Duration::from_secs(5)),
        );
        assert_eq!(runner.phase(), Phase::Waiting);

        runner.on_power_change(discharging(0, 50.0));
        assert_eq!(runner.phase(), Phase::Running);

        // A 2 s loop script finishing at 2 s and 4 s keeps going.
        tokio::time::advance(Duration::from_secs(2)).await;
        runner.on_player_finished();
        assert_eq!(runner.phase(), Phase::Running);

        tokio::time::advance(Duration::from_secs(1)).await;
        runner.on_power_change(discharging(3_000_000, 49.9));

        tokio::time::advance(Duration::from_secs(1)).await;
        runner.on_player_finished();
        assert_eq!(runner.phase(), Phase::Running);

        // The third completion lands past the 5 s bound.
        tokio::time::advance(Duration::from_secs(2)).await;
        runner.on_player_finished();
        assert_eq!(runner.phase(), Phase::Stopped);

        assert_eq!(runner.loops_completed(), 3);
        assert_eq!(plays.lock().unwrap().len(), 3);

        let run = runner.take_run().unwrap();
        assert!(run.history().len() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_stop_skips_epilogue() {
        let (mut runner, plays, stops) = runner_with(
            battery_test(false, true),
            DurationPolicy::FixedTime(Duration::from_secs(60)),
        );
        runner.on_power_change(discharging(0, 50.0));
        assert_eq!(runner.phase(), Phase::Running);

        runner.force_stop();
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        runner.on_player_finished();
        assert_eq!(runner.phase(), Phase::Stopped);
        // Only the loop script was ever played.
        assert_eq!(plays.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_prologue_is_deferred() {
        let (mut runner, plays, _stops) = runner_with(
            battery_test(true, true),
            DurationPolicy::FixedTime(Duration::from_secs(60)),
        );
        assert_eq!(runner.phase(), Phase::Prologue);

        runner.stop();
        assert_eq!(runner.phase(), Phase::Prologue);

        runner.on_player_finished();
        assert_eq!(runner.phase(), Phase::Epilogue);

        runner.on_player_finished();
        assert_eq!(runner.phase(), Phase::Stopped);

        let plays = plays.lock().unwrap();
        assert_eq!(plays.len(), 2);
        assert!(plays[0].ends_with("idle.prologue"));
        assert!(plays[1].ends_with("idle.epilogue"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_waiting_goes_straight_to_stopped() {
        let (mut runner, plays, _stops) = runner_with(
            battery_test(false, false),
            DurationPolicy::FixedTime(Duration::from_secs(60)),
        );
        assert_eq!(runner.phase(), Phase::Waiting);

        runner.stop();
        assert_eq!(runner.phase(), Phase::Stopped);
        assert!(plays.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_percent_target_stops_the_run() {
        let (mut runner, _plays, stops) = runner_with(
            battery_test(false, false),
            DurationPolicy::UntilBatteryPercent(90.0),
        );
        runner.on_power_change(discharging(0, 50.0));
        assert_eq!(runner.phase(), Phase::Running);

        // 88% is past the 90% target.
        runner.on_power_change(discharging(60_000_000, 44.0));
        assert_eq!(runner.phase(), Phase::Stopping);
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        runner.on_player_finished();
        assert_eq!(runner.phase(), Phase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_discharging_when_prologue_ends() {
        let (mut runner, _plays, _stops) = runner_with(
            battery_test(true, false),
            DurationPolicy::FixedTime(Duration::from_secs(60)),
        );
        assert_eq!(runner.phase(), Phase::Prologue);

        // The discharge edge arrives while the prologue still plays.
        runner.on_power_change(discharging(0, 50.0));
        assert_eq!(runner.phase(), Phase::Prologue);

        runner.on_player_finished();
        assert_eq!(runner.phase(), Phase::Running);
    }
}

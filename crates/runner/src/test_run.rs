//! One benchmark execution and its sampled history.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use battbench_common::error::{BattbenchError, BattbenchResult};

use crate::battery_test::BatteryTest;
use crate::power::{PowerSnapshot, PowerStatistics};

/// When a Running phase should end.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DurationPolicy {
    /// Run for a fixed wall-clock time.
    FixedTime(Duration),
    /// Run until the battery falls to the given percentage.
    UntilBatteryPercent(f64),
}

/// A single run of a battery test.
///
/// `history` is append-only; the first element is the reference snapshot
/// taken when the run left Waiting, and all statistics are computed against
/// it. Snapshots are decimated on the way in so an hours-long run stays a
/// few hundred entries.
#[derive(Debug, Serialize)]
pub struct TestRun {
    pub test_id: String,
    pub name: String,
    pub description: Option<String>,
    pub duration_policy: DurationPolicy,
    pub screen_brightness: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub loop_duration_ms: u32,
    pub max_power_w: f64,
    pub max_battery_life_s: f64,
    history: Vec<PowerSnapshot>,

    #[serde(skip)]
    test: BatteryTest,
    #[serde(skip)]
    started_at: Option<tokio::time::Instant>,
}

impl TestRun {
    pub fn new(test: BatteryTest, duration_policy: DurationPolicy, screen_brightness: u32) -> Self {
        Self {
            test_id: test.id.clone(),
            name: test.name.clone(),
            description: test.description.clone(),
            duration_policy,
            screen_brightness,
            start_time: None,
            loop_duration_ms: 0,
            max_power_w: 0.0,
            max_battery_life_s: 0.0,
            history: Vec::new(),
            test,
            started_at: None,
        }
    }

    pub fn test(&self) -> &BatteryTest {
        &self.test
    }

    pub fn history(&self) -> &[PowerSnapshot] {
        &self.history
    }

    /// Mark the run as started, with `reference` as `history[0]`.
    pub fn begin(&mut self, reference: PowerSnapshot) {
        self.start_time = Some(Utc::now());
        self.started_at = Some(tokio::time::Instant::now());
        self.history.clear();
        self.history.push(reference);
    }

    /// Offer a snapshot to the history, subject to decimation. The first
    /// snapshot is always kept.
    pub fn add(&mut self, snapshot: PowerSnapshot) {
        let (Some(start), Some(last)) = (self.history.first(), self.history.last()) else {
            self.history.push(snapshot);
            return;
        };

        let keep = match self.duration_policy {
            DurationPolicy::FixedTime(duration) => {
                let interval_us = (duration.as_micros() / 100) as i64;
                snapshot.time_us - last.time_us > interval_us
            }
            DurationPolicy::UntilBatteryPercent(target) => {
                let start_pct = start.percent();
                let last_pct = last.percent();
                let current_pct = snapshot.percent();
                if start_pct < 0.0 || last_pct < 0.0 || current_pct < 0.0 {
                    true
                } else {
                    let span = start_pct - target;
                    span <= 0.0 || (last_pct - current_pct) / span > 0.005
                }
            }
        };

        if keep {
            // Peak power comes from the last kept interval; the life
            // projection from the whole run so far.
            let interval = PowerStatistics::compute(last, &snapshot);
            if let Some(power) = interval.power_w {
                self.max_power_w = self.max_power_w.max(power);
            }
            let overall = PowerStatistics::compute(&self.history[0], &snapshot);
            if let Some(life) = overall.battery_life_s {
                self.max_battery_life_s = self.max_battery_life_s.max(life);
            }
            self.history.push(snapshot);
        }
    }

    /// Whether the duration policy is satisfied.
    pub fn is_done(&self, current: &PowerSnapshot) -> bool {
        match self.duration_policy {
            DurationPolicy::FixedTime(duration) => self
                .started_at
                .map(|started| started.elapsed() >= duration)
                .unwrap_or(false),
            DurationPolicy::UntilBatteryPercent(target) => {
                let pct = current.percent();
                pct >= 0.0 && pct <= target
            }
        }
    }

    /// Serialize the completed run as pretty JSON.
    pub fn write_to_file(&self, path: &Path) -> BattbenchResult<()> {
        let file = File::create(path).map_err(|e| {
            BattbenchError::test_run(format!("Can't create {}: {e}", path.display()))
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_test() -> BatteryTest {
        BatteryTest {
            id: "idle".to_string(),
            name: "Idle".to_string(),
            description: None,
            loop_file: "idle.loop".into(),
            prologue_file: None,
            epilogue_file: None,
        }
    }

    fn snapshot_at(time_us: i64, energy_now: f64) -> PowerSnapshot {
        PowerSnapshot {
            time_us,
            energy_now,
            energy_full: 50.0,
            ..PowerSnapshot::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_time_decimation() {
        // 100 s at one snapshot per duration/100 keeps one per second.
        let mut run = TestRun::new(
            dummy_test(),
            DurationPolicy::FixedTime(Duration::from_secs(100)),
            100,
        );
        run.begin(snapshot_at(0, 50.0));

        run.add(snapshot_at(500_000, 49.9));
        assert_eq!(run.history().len(), 1);

        // Exactly one interval since the last kept snapshot: still too soon.
        run.add(snapshot_at(1_000_000, 49.85));
        assert_eq!(run.history().len(), 1);

        run.add(snapshot_at(1_100_000, 49.8));
        assert_eq!(run.history().len(), 2);

        run.add(snapshot_at(1_600_000, 49.7));
        assert_eq!(run.history().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_percent_decimation() {
        // 100% down to 90%: keep a snapshot per 0.5% of the 10% span.
        let mut run = TestRun::new(dummy_test(), DurationPolicy::UntilBatteryPercent(90.0), 100);
        run.begin(snapshot_at(0, 50.0));

        // 0.04% drop over the span: discarded.
        run.add(snapshot_at(1_000_000, 49.99));
        assert_eq!(run.history().len(), 1);

        // 0.12% drop: kept.
        run.add(snapshot_at(2_000_000, 49.94));
        assert_eq!(run.history().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_time_is_done_uses_elapsed_time() {
        let mut run = TestRun::new(
            dummy_test(),
            DurationPolicy::FixedTime(Duration::from_secs(5)),
            100,
        );
        run.begin(snapshot_at(0, 50.0));

        let current = snapshot_at(2_000_000, 49.9);
        assert!(!run.is_done(&current));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(run.is_done(&current));
    }

    #[tokio::test(start_paused = true)]
    async fn test_percent_is_done() {
        let mut run = TestRun::new(dummy_test(), DurationPolicy::UntilBatteryPercent(90.0), 100);
        run.begin(snapshot_at(0, 50.0));

        assert!(!run.is_done(&snapshot_at(1, 48.0))); // 96%
        assert!(run.is_done(&snapshot_at(2, 44.0))); // 88%
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_power_uses_interval_drain() {
        let mut run = TestRun::new(
            dummy_test(),
            DurationPolicy::FixedTime(Duration::from_secs(1)),
            100,
        );
        run.begin(snapshot_at(0, 50.0));
        // 0.01 Wh over 3.6 s is 10 W.
        run.add(snapshot_at(3_600_000, 49.99));
        assert!((run.max_power_w - 10.0).abs() < 1e-6);

        // The next interval drains 0.03 Wh in 3.6 s (30 W); averaged over
        // the whole run that would only be 20 W.
        run.add(snapshot_at(7_200_000, 49.96));
        assert!((run.max_power_w - 30.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_round_trips_as_json() {
        let mut run = TestRun::new(
            dummy_test(),
            DurationPolicy::FixedTime(Duration::from_secs(60)),
            80,
        );
        run.begin(snapshot_at(0, 50.0));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        run.write_to_file(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        assert_eq!(value["test_id"], "idle");
        assert_eq!(value["screen_brightness"], 80);
        assert_eq!(value["history"].as_array().unwrap().len(), 1);
    }
}

//! Power-supply sampling from sysfs.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use battbench_common::error::{BattbenchError, BattbenchResult};

const SYSFS_POWER_SUPPLY: &str = "/sys/class/power_supply";
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One combined reading of every power supply in the system.
///
/// Energy is in Wh, charge in Ah, voltage in V, capacity in percent. A field
/// the hardware does not report stays at its sentinel (`-1.0`); consumers go
/// through [`PowerSnapshot::percent`] rather than poking at raw fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerSnapshot {
    /// Microseconds since the Unix epoch at sample time.
    pub time_us: i64,
    /// Whether an AC supply reports itself online.
    pub online: bool,
    pub energy_now: f64,
    pub energy_full: f64,
    pub energy_full_design: f64,
    pub charge_now: f64,
    pub charge_full: f64,
    pub charge_full_design: f64,
    pub capacity: f64,
    pub voltage_now: f64,
}

impl Default for PowerSnapshot {
    fn default() -> Self {
        Self {
            time_us: 0,
            online: false,
            energy_now: -1.0,
            energy_full: -1.0,
            energy_full_design: -1.0,
            charge_now: -1.0,
            charge_full: -1.0,
            charge_full_design: -1.0,
            capacity: -1.0,
            voltage_now: -1.0,
        }
    }
}

impl PowerSnapshot {
    /// Battery fill level in percent, falling back from energy counters to
    /// charge counters to the kernel's own estimate. `-1.0` when unknown.
    pub fn percent(&self) -> f64 {
        if self.energy_full > 0.0 && self.energy_now >= 0.0 {
            100.0 * self.energy_now / self.energy_full
        } else if self.charge_full > 0.0 && self.charge_now >= 0.0 {
            100.0 * self.charge_now / self.charge_full
        } else if self.capacity >= 0.0 {
            self.capacity
        } else {
            -1.0
        }
    }

    /// Whether two snapshots carry the same readings, ignoring sample time.
    pub fn same_readings(&self, other: &Self) -> bool {
        let a = Self { time_us: 0, ..*self };
        let b = Self { time_us: 0, ..*other };
        a == b
    }
}

/// Derived statistics between a reference snapshot and a later one.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PowerStatistics {
    /// Average drain in watts.
    pub power_w: Option<f64>,
    /// Average current draw in amperes.
    pub current_a: Option<f64>,
    /// Projected full-battery life in seconds at the observed drain.
    pub battery_life_s: Option<f64>,
    /// The same projection against the battery's design capacity.
    pub battery_life_design_s: Option<f64>,
}

impl PowerStatistics {
    pub fn compute(base: &PowerSnapshot, current: &PowerSnapshot) -> Self {
        let hours = (current.time_us - base.time_us) as f64 / 3_600_000_000.0;
        if hours <= 0.0 {
            return Self::default();
        }

        let mut stats = Self::default();

        if base.energy_now >= 0.0 && current.energy_now >= 0.0 {
            let used = base.energy_now - current.energy_now;
            if used > 0.0 {
                let power = used / hours;
                stats.power_w = Some(power);
                if current.energy_full > 0.0 {
                    stats.battery_life_s = Some(3600.0 * current.energy_full / power);
                }
                if current.energy_full_design > 0.0 {
                    stats.battery_life_design_s =
                        Some(3600.0 * current.energy_full_design / power);
                }
            }
        }

        if base.charge_now >= 0.0 && current.charge_now >= 0.0 {
            let used = base.charge_now - current.charge_now;
            if used > 0.0 {
                let amps = used / hours;
                stats.current_a = Some(amps);
                if stats.battery_life_s.is_none() && current.charge_full > 0.0 {
                    stats.battery_life_s = Some(3600.0 * current.charge_full / amps);
                }
                if stats.battery_life_design_s.is_none() && current.charge_full_design > 0.0 {
                    stats.battery_life_design_s =
                        Some(3600.0 * current.charge_full_design / amps);
                }
            }
        }

        stats
    }
}

/// Polls sysfs every 250 ms and publishes snapshots on a watch channel.
///
/// Subscribers only wake when the readings actually change; sample time
/// alone never counts as a change.
pub struct PowerMonitor {
    tx: watch::Sender<PowerSnapshot>,
    task: JoinHandle<()>,
}

impl PowerMonitor {
    pub fn start() -> BattbenchResult<Self> {
        Self::start_at(Path::new(SYSFS_POWER_SUPPLY))
    }

    /// Like [`start`](Self::start) with an explicit sysfs root.
    pub fn start_at(dir: &Path) -> BattbenchResult<Self> {
        let initial = read_snapshot(dir)?;
        let (tx, _) = watch::channel(initial);

        let dir = dir.to_path_buf();
        let sender = tx.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            loop {
                ticker.tick().await;
                match read_snapshot(&dir) {
                    Ok(snapshot) => {
                        if !snapshot.same_readings(&sender.borrow()) {
                            sender.send_replace(snapshot);
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Can't read power supplies"),
                }
            }
        });

        Ok(Self { tx, task })
    }

    pub fn current(&self) -> PowerSnapshot {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PowerSnapshot> {
        self.tx.subscribe()
    }
}

impl Drop for PowerMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Fold every supply under `dir` into a single snapshot.
pub fn read_snapshot(dir: &Path) -> BattbenchResult<PowerSnapshot> {
    let mut snapshot = PowerSnapshot {
        time_us: chrono::Utc::now().timestamp_micros(),
        ..PowerSnapshot::default()
    };

    let entries = fs::read_dir(dir).map_err(|e| {
        BattbenchError::power(format!("Can't enumerate {}: {e}", dir.display()))
    })?;

    for entry in entries {
        let entry = entry?;
        let supply = entry.path();
        let Some(kind) = read_string(&supply.join("type")) else {
            continue;
        };

        match kind.as_str() {
            "Mains" => {
                if read_scalar(&supply.join("online")) == Some(1.0) {
                    snapshot.online = true;
                }
            }
            "Battery" => {
                // Kernel units: µWh, µAh, µV.
                read_into(&mut snapshot.energy_now, &supply.join("energy_now"), 1e6);
                read_into(&mut snapshot.energy_full, &supply.join("energy_full"), 1e6);
                read_into(
                    &mut snapshot.energy_full_design,
                    &supply.join("energy_full_design"),
                    1e6,
                );
                read_into(&mut snapshot.charge_now, &supply.join("charge_now"), 1e6);
                read_into(&mut snapshot.charge_full, &supply.join("charge_full"), 1e6);
                read_into(
                    &mut snapshot.charge_full_design,
                    &supply.join("charge_full_design"),
                    1e6,
                );
                read_into(&mut snapshot.capacity, &supply.join("capacity"), 1.0);
                read_into(&mut snapshot.voltage_now, &supply.join("voltage_now"), 1e6);
            }
            _ => {}
        }
    }

    Ok(snapshot)
}

fn read_string(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
}

fn read_scalar(path: &Path) -> Option<f64> {
    read_string(path)?.parse().ok()
}

fn read_into(field: &mut f64, path: &Path, scale: f64) {
    if let Some(value) = read_scalar(path) {
        // Two batteries sum; a lone battery replaces the sentinel.
        if *field < 0.0 {
            *field = value / scale;
        } else {
            *field += value / scale;
        }
    }
}

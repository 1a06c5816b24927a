//! Saving and restoring system state around a run.

use std::fs;
use std::path::{Path, PathBuf};

use battbench_common::error::{BattbenchError, BattbenchResult};

const SYSFS_BACKLIGHT: &str = "/sys/class/backlight";

/// State a run overrides and must put back afterward.
pub trait SystemState: Send {
    /// Capture the current state before overriding it.
    fn save(&mut self) -> BattbenchResult<()>;

    /// Put the saved state back. Infallible by contract: restoration
    /// runs on every path back to Stopped and must not abort it.
    fn restore(&mut self);

    /// Set the backlight to `percent` of its maximum.
    fn set_brightness(&mut self, percent: u32) -> BattbenchResult<()>;
}

/// Backlight control through sysfs.
pub struct BacklightState {
    device: Option<PathBuf>,
    saved: Option<u64>,
}

impl BacklightState {
    /// Use the first device under `/sys/class/backlight`, if any.
    pub fn new() -> Self {
        Self::at(Path::new(SYSFS_BACKLIGHT))
    }

    pub fn at(root: &Path) -> Self {
        let device = fs::read_dir(root)
            .ok()
            .and_then(|mut entries| entries.next())
            .and_then(|entry| entry.ok())
            .map(|entry| entry.path());
        Self {
            device,
            saved: None,
        }
    }

    fn read_value(&self, file: &str) -> BattbenchResult<u64> {
        let device = self.device.as_ref().ok_or_else(|| {
            BattbenchError::config("No backlight device found".to_string())
        })?;
        let text = fs::read_to_string(device.join(file))?;
        text.trim()
            .parse()
            .map_err(|e| BattbenchError::config(format!("Bad {file} value: {e}")))
    }

    fn write_brightness(&self, value: u64) -> BattbenchResult<()> {
        let device = self.device.as_ref().ok_or_else(|| {
            BattbenchError::config("No backlight device found".to_string())
        })?;
        fs::write(device.join("brightness"), format!("{value}\n"))?;
        Ok(())
    }
}

impl Default for BacklightState {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemState for BacklightState {
    fn save(&mut self) -> BattbenchResult<()> {
        if self.device.is_some() {
            self.saved = Some(self.read_value("brightness")?);
        }
        Ok(())
    }

    fn restore(&mut self) {
        if let Some(saved) = self.saved.take() {
            if let Err(e) = self.write_brightness(saved) {
                tracing::warn!(error = %e, "Can't restore screen brightness");
            }
        }
    }

    fn set_brightness(&mut self, percent: u32) -> BattbenchResult<()> {
        let max = self.read_value("max_brightness")?;
        self.write_brightness(max * u64::from(percent.min(100)) / 100)
    }
}

/// For tests and machines without a backlight.
#[derive(Default)]
pub struct NullSystemState;

impl SystemState for NullSystemState {
    fn save(&mut self) -> BattbenchResult<()> {
        Ok(())
    }

    fn restore(&mut self) {}

    fn set_brightness(&mut self, _percent: u32) -> BattbenchResult<()> {
        Ok(())
    }
}

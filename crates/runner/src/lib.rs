//! battbench Test Runner
//!
//! Orchestrates a battery benchmark: samples power-supply counters while a
//! recorded input script loops against the desktop, and decides when the run
//! is complete. The [`TestRunner`] phase machine is deliberately free of I/O
//! and timers; a driver feeds it player-finished and power-changed inputs
//! and reacts to phase changes on a watch channel.

pub mod battery_test;
pub mod power;
pub mod runner;
pub mod system_state;
pub mod test_run;

pub use battery_test::{BatteryTest, TestRegistry};
pub use power::{PowerMonitor, PowerSnapshot, PowerStatistics};
pub use runner::{Phase, TestRunner};
pub use system_state::{BacklightState, NullSystemState, SystemState};
pub use test_run::{DurationPolicy, TestRun};

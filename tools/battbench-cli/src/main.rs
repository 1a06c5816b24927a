//! battbench CLI — record, replay, and benchmark battery drain.
//!
//! Usage:
//!   battbench record [-o FILE]      Record input events until Super+Q
//!   battbench play <FILE>           Replay a recorded event log
//!   battbench monitor               Watch power-supply readings
//!   battbench tests                 List installed battery tests
//!   battbench test <TEST_ID>        Run a benchmark and write a report

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "battbench",
    about = "Battery-drain benchmarking for Linux desktops",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record input events until the stop chord (Super+Q)
    Record {
        /// Output file; standard output when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replay a recorded event log
    Play {
        /// Path to the event log
        file: PathBuf,

        /// Play in-process instead of through the helper (needs privileges)
        #[arg(long)]
        local: bool,
    },

    /// Watch power-supply readings and drain statistics
    Monitor,

    /// List installed battery tests
    Tests,

    /// Run a battery test and write a JSON report
    Test {
        /// Id of the test to run (see `battbench tests`)
        test_id: String,

        /// How long to run, e.g. 30s, 10m, 1h (default 10m)
        #[arg(short, long, conflicts_with = "min_battery")]
        duration: Option<String>,

        /// Run until the battery falls to this percentage
        #[arg(short = 'm', long)]
        min_battery: Option<f64>,

        /// Backlight level during the run, in percent
        #[arg(long, default_value = "100")]
        screen_brightness: u32,

        /// Report output path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    battbench_common::logging::init_logging(&battbench_common::config::LoggingConfig {
        level: log_level.to_string(),
        json: false,
        file: None,
    });

    match cli.command {
        Commands::Record { output } => commands::record::run(output).await,
        Commands::Play { file, local } => commands::play::run(file, local).await,
        Commands::Monitor => commands::monitor::run().await,
        Commands::Tests => commands::tests::run(),
        Commands::Test {
            test_id,
            duration,
            min_battery,
            screen_brightness,
            output,
        } => {
            commands::test::run(test_id, duration, min_battery, screen_brightness, output).await
        }
    }
}

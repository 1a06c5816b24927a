//! Record input events to a log.

use std::path::PathBuf;

use battbench_capture::{EventRecorder, RecorderOutput};

pub async fn run(output: Option<PathBuf>) -> anyhow::Result<()> {
    let sink = match output {
        Some(path) => RecorderOutput::File(path),
        None => RecorderOutput::Stdout,
    };

    let recorder = EventRecorder::open(None, sink)?;

    eprintln!("Recording input events; press Super+Q to stop.");
    tokio::task::spawn_blocking(move || recorder.run()).await??;

    Ok(())
}

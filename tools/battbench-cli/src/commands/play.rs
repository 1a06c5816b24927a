//! Replay an event log.

use std::path::{Path, PathBuf};

use battbench_replay::{
    DeviceReadinessWaiter, EventPlayer, LocalPlayer, PlayerSignal, RemotePlayer, SignalReceiver,
};

pub async fn run(file: PathBuf, local: bool) -> anyhow::Result<()> {
    if !file.exists() {
        anyhow::bail!("No such file: {}", file.display());
    }

    let (mut player, mut signals): (Box<dyn EventPlayer>, SignalReceiver) = if local {
        let (player, signals) = LocalPlayer::new("battbench")?;
        (Box::new(player), signals)
    } else {
        let (player, signals) = RemotePlayer::connect("battbench").await?;
        (Box::new(player), signals)
    };

    wait_ready(&mut signals).await;
    wait_for_devices(player.as_ref()).await?;

    println!("Playing {}...", file.display());
    play_log(player.as_mut(), &mut signals, &file).await?;
    println!("Done.");

    Ok(())
}

async fn wait_ready(signals: &mut SignalReceiver) {
    while let Some(signal) = signals.recv().await {
        if signal == PlayerSignal::Ready {
            break;
        }
    }
}

/// Wait until the display server has picked up the virtual devices, so
/// the first replayed events are not dropped.
pub(crate) async fn wait_for_devices(player: &dyn EventPlayer) -> anyhow::Result<()> {
    let nodes: Vec<String> = [player.keyboard_device_node(), player.mouse_device_node()]
        .into_iter()
        .flatten()
        .collect();
    if nodes.is_empty() {
        return Ok(());
    }

    match DeviceReadinessWaiter::open() {
        Ok((waiter, cancel)) => {
            tokio::select! {
                result = waiter.wait(nodes) => result?,
                _ = tokio::signal::ctrl_c() => {
                    cancel.cancel();
                    anyhow::bail!("Cancelled");
                }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Can't watch device readiness; continuing anyway");
        }
    }
    Ok(())
}

async fn play_log(
    player: &mut dyn EventPlayer,
    signals: &mut SignalReceiver,
    file: &Path,
) -> anyhow::Result<()> {
    player.play_file(file)?;

    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Some(PlayerSignal::Finished) | None => break,
                Some(PlayerSignal::Ready) => {}
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Stopping playback...");
                player.stop();
            }
        }
    }
    Ok(())
}

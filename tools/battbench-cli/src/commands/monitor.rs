//! Watch power-supply readings.

use battbench_runner::{PowerMonitor, PowerSnapshot, PowerStatistics};

pub async fn run() -> anyhow::Result<()> {
    let monitor = PowerMonitor::start()?;
    let base = monitor.current();

    println!("Monitoring power supplies; press Ctrl+C to stop.");
    print_snapshot(&base, None);

    let mut updates = monitor.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = *updates.borrow_and_update();
                let stats = PowerStatistics::compute(&base, &snapshot);
                print_snapshot(&snapshot, Some(&stats));
            }
        }
    }
    Ok(())
}

fn print_snapshot(snapshot: &PowerSnapshot, stats: Option<&PowerStatistics>) {
    let supply = if snapshot.online { "AC" } else { "battery" };
    let percent = snapshot.percent();
    let percent = if percent >= 0.0 {
        format!("{percent:.1}%")
    } else {
        "unknown".to_string()
    };

    let mut line = format!("{supply}: {percent}");
    if let Some(stats) = stats {
        if let Some(power) = stats.power_w {
            line.push_str(&format!("  drain {power:.2} W"));
        }
        if let Some(current) = stats.current_a {
            line.push_str(&format!("  {current:.3} A"));
        }
        if let Some(life) = stats.battery_life_s {
            line.push_str(&format!("  est. life {:.1} h", life / 3600.0));
        }
    }
    println!("{line}");
}

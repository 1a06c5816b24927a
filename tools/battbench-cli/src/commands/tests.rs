//! List installed battery tests.

use battbench_common::config::AppConfig;
use battbench_runner::TestRegistry;

pub fn run() -> anyhow::Result<()> {
    let config = AppConfig::load();
    let registry = TestRegistry::load(&[config.system_tests_dir, config.user_tests_dir])?;

    if registry.all().is_empty() {
        println!("No battery tests installed.");
        return Ok(());
    }

    for test in registry.all() {
        println!("{:<20} {}", test.id, test.name);
        if let Some(description) = &test.description {
            println!("{:<20} {}", "", description);
        }
    }
    Ok(())
}

//! Privileged replay-helper service.
//!
//! Meant to be bus-activated on the system bus as `org.battbench.Helper`.
//! Exits non-zero if the name cannot be acquired or the connection is lost.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    battbench_common::logging::init_logging(&battbench_common::config::LoggingConfig {
        level: "info".to_string(),
        json: false,
        file: None,
    });

    battbench_helper::serve().await
}

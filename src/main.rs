use std::sync::Arc;

use sprinklerd::config::Config;
use sprinklerd::dispatcher::ProcessSpawner;
use sprinklerd::gpio::actuator_from_config;
use sprinklerd::registry::Registry;
use sprinklerd::schedule::{FileScheduleStore, spawn_schedule_ticker};
use sprinklerd::supervisor::{ControlPlane, spawn_cleanup_sweep, spawn_heartbeat};
use sprinklerd::{dispatcher::WorkerSpawner, logging, schedule::ScheduleStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let _log_guard = logging::init(config.log_dir.as_deref(), "sprinklerd");

    eprintln!("sprinklerd v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Deployment: {}", config.deployment_id);
    eprintln!("   Broker:     {}", config.broker_url);
    eprintln!("   Registry:   {}", config.registry_dir.display());
    eprintln!(
        "   GPIO:       {}",
        if config.gpio_enabled { "enabled" } else { "disabled (log-only)" }
    );

    let registry = Registry::new(config.registry_dir.clone());
    registry.ensure_dir().await?;

    let schedules: Arc<dyn ScheduleStore> =
        Arc::new(FileScheduleStore::load(config.schedule_file.clone()).await?);
    let spawner: Arc<dyn WorkerSpawner> = Arc::new(ProcessSpawner::new(config.worker_bin.clone()));
    let actuator = actuator_from_config(&config);

    // Background tasks run independently of broker connectivity.
    if let Some(url) = config.status_url.clone() {
        let _heartbeat = spawn_heartbeat(
            config.deployment_id.clone(),
            url,
            config.heartbeat_interval,
        );
    } else {
        eprintln!("   Heartbeat:  disabled (no status URL)");
    }
    let _sweep = spawn_cleanup_sweep(registry.clone(), actuator, config.cleanup_interval);
    let _ticker = spawn_schedule_ticker(
        Arc::clone(&schedules),
        Arc::clone(&spawner),
        config.schedule_tick,
    );

    // Blocks forever: connect, consume, reconnect.
    ControlPlane::new(config, schedules, spawner).run().await;

    Ok(())
}

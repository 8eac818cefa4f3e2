//! Worker binary: runs one zone for a bounded duration.
//!
//! Usage: `zone-worker <schedule-id> <zone> <duration-secs>`
//!
//! Spawned by the control plane on `play` (or by the recurring-schedule
//! ticker). Exits 0 both when the schedule is already running and after a
//! clean shutdown.

use anyhow::Context;
use sprinklerd::config::Config;
use sprinklerd::logging;
use sprinklerd::worker::ZoneWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let _log_guard = logging::init(config.log_dir.as_deref(), "zone-worker");

    let mut args = std::env::args().skip(1);
    let (Some(schedule_id), Some(zone), Some(duration)) =
        (args.next(), args.next(), args.next())
    else {
        anyhow::bail!("usage: zone-worker <schedule-id> <zone> <duration-secs>");
    };
    let duration: f64 = duration
        .parse()
        .with_context(|| format!("invalid duration {duration:?}"))?;

    ZoneWorker::new(config, schedule_id, zone, duration)
        .run()
        .await?;
    Ok(())
}

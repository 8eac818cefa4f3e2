//! Reliability wrapper around the control plane.
//!
//! Owns the connect → consume → reconnect loop, the throttled error
//! reporting, and the two background tasks (status heartbeat, stale-entry
//! cleanup sweep). The daemon must survive indefinite broker outages with
//! no operator intervention, surfacing the first failure promptly and
//! demoting repeats so a week-long outage does not flood the logs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::config::Config;
use crate::dispatcher::{ChannelStopPublisher, Dispatcher, WorkerSpawner};
use crate::error::{BrokerError, Result};
use crate::gpio::Actuator;
use crate::registry::Registry;
use crate::schedule::ScheduleStore;

/// Cap on concurrent in-flight heartbeat posts, so a slow status endpoint
/// never stalls the timer.
const MAX_INFLIGHT_HEARTBEATS: usize = 10;

/// Rate-limits operational error reporting.
///
/// The first error after a clean period is worth a WARN; repeats inside the
/// window are demoted to DEBUG. The window resets once it has fully elapsed
/// since the last WARN.
pub struct ErrorThrottle {
    window: Duration,
    last_warn: Option<tokio::time::Instant>,
}

impl ErrorThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_warn: None,
        }
    }

    /// Report an error; returns whether it was emitted at WARN level.
    pub fn report(&mut self, context: &str, error: &dyn std::fmt::Display) -> bool {
        let now = tokio::time::Instant::now();
        match self.last_warn {
            Some(last) if now.duration_since(last) < self.window => {
                debug!(context, %error, "Recurring failure (throttled)");
                false
            }
            _ => {
                warn!(context, %error, "Failure");
                self.last_warn = Some(now);
                true
            }
        }
    }
}

/// The control-plane supervisor: holds every long-lived collaborator and
/// drives the resilient consume loop.
pub struct ControlPlane {
    config: Config,
    broker: Broker,
    schedules: Arc<dyn ScheduleStore>,
    spawner: Arc<dyn WorkerSpawner>,
}

impl ControlPlane {
    pub fn new(
        config: Config,
        schedules: Arc<dyn ScheduleStore>,
        spawner: Arc<dyn WorkerSpawner>,
    ) -> Self {
        let broker = Broker::new(config.broker_url.clone());
        Self {
            config,
            broker,
            schedules,
            spawner,
        }
    }

    /// Consume the control queue forever.
    ///
    /// Any failure (connect, declare, delivery, dispatch) lands back here,
    /// gets throttle-reported, and is followed by a fixed-delay reconnect.
    pub async fn run(&self) {
        let mut throttle = ErrorThrottle::new(self.config.warn_window);
        let mut purged = false;

        loop {
            if let Err(e) = self.session(&mut purged).await {
                throttle.report("control-plane", &e);
                tokio::time::sleep(self.config.reconnect_delay).await;
            }
        }
    }

    /// One broker session: connect, declare, (first time) purge, consume.
    async fn session(&self, purged: &mut bool) -> Result<()> {
        let queue = &self.config.deployment_id;
        let channel = Arc::new(self.broker.connect().await?);
        channel.declare_queue(queue).await?;

        // One-time destructive purge: commands that piled up while this
        // deployment was offline are stale by definition.
        if !*purged {
            channel.purge_queue(queue).await?;
            *purged = true;
        }

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.schedules),
            Arc::clone(&self.spawner),
            Arc::new(ChannelStopPublisher::new(Arc::clone(&channel))),
        );

        let tag = format!("{queue}-control");
        let mut consumer = channel.consume(queue, &tag).await?;

        while let Some(delivery) = consumer.next().await {
            let delivery = delivery.map_err(BrokerError::from)?;
            dispatcher.handle(&delivery.data).await?;
        }

        Err(BrokerError::StreamEnded {
            queue: queue.clone(),
        }
        .into())
    }
}

/// Spawn the fire-and-forget status heartbeat.
///
/// Posts `{"rpi": <deployment id>}` to the status endpoint on a fixed
/// interval, independent of broker connectivity. Failures are logged at
/// debug and never retried.
pub fn spawn_heartbeat(
    deployment_id: String,
    status_url: String,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let permits = Arc::new(Semaphore::new(MAX_INFLIGHT_HEARTBEATS));
        let mut ticker = tokio::time::interval(interval);

        info!(url = %status_url, every_secs = interval.as_secs(), "Heartbeat started");

        loop {
            ticker.tick().await;

            let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                debug!("Heartbeat skipped: too many in flight");
                continue;
            };

            let client = client.clone();
            let url = status_url.clone();
            let payload = serde_json::json!({ "rpi": deployment_id });

            tokio::spawn(async move {
                match client.post(&url).json(&payload).send().await {
                    Ok(resp) => debug!(status = %resp.status(), "Posted status"),
                    Err(e) => debug!(error = %e, "Status post failed"),
                }
                drop(permit);
            });
        }
    })
}

/// Kills orphaned worker processes by pid.
pub trait ProcessKiller: Send + Sync {
    /// Returns whether a live process was found and signalled.
    fn kill(&self, pid: u32) -> bool;
}

/// sysinfo-backed killer used in production.
pub struct SysinfoKiller;

impl ProcessKiller for SysinfoKiller {
    fn kill(&self, pid: u32) -> bool {
        let pid = sysinfo::Pid::from_u32(pid);
        let mut system = sysinfo::System::new();
        system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), false);
        system.process(pid).map(|p| p.kill()).unwrap_or(false)
    }
}

/// One cleanup pass: reclaim every registry entry whose `end` has passed.
///
/// This is the durability backstop for workers that died without cleaning
/// up after themselves: force the zone off, kill the recorded pid if it is
/// somehow still alive, delete the entry.
pub async fn sweep_once(
    registry: &Registry,
    actuator: &Arc<dyn Actuator>,
    killer: &Arc<dyn ProcessKiller>,
) {
    let entries = match registry.list().await {
        Ok(entries) => entries,
        Err(e) => {
            error!(error = %e, "Cleanup sweep could not list registry");
            return;
        }
    };

    let now = Utc::now();
    for (id, entry) in entries {
        if entry.end >= now {
            continue;
        }

        if let Err(e) = actuator.setup(&entry.zone) {
            warn!(id = %id, zone = %entry.zone, error = %e, "Sweep: setup failed");
        }
        if let Err(e) = actuator.off(&entry.zone) {
            warn!(id = %id, zone = %entry.zone, error = %e, "Sweep: forcing zone off failed");
        }

        let killed = killer.kill(entry.pid);

        match registry.remove(&id).await {
            Ok(_) => info!(
                id = %id,
                pid = entry.pid,
                zone = %entry.zone,
                killed,
                "Cleaned up stale worker"
            ),
            Err(e) => warn!(id = %id, error = %e, "Sweep: failed to remove entry"),
        }
    }
}

/// Spawn the periodic cleanup sweep.
pub fn spawn_cleanup_sweep(
    registry: Registry,
    actuator: Arc<dyn Actuator>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let killer: Arc<dyn ProcessKiller> = Arc::new(SysinfoKiller);
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            sweep_once(&registry, &actuator, &killer).await;
        }
    })
}

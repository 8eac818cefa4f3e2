//! Command routing for the control plane.
//!
//! One dispatcher instance lives per broker session, holding its
//! collaborators behind trait objects so the routing logic is testable
//! without a broker, a filesystem, or real processes.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::broker::BrokerChannel;
use crate::command::{Command, Method, ScheduleDef, ShutdownMessage};
use crate::error::{BrokerError, Error, Result, ScheduleError};
use crate::schedule::ScheduleStore;

/// Launches one worker process per `play`.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(&self, schedule_id: &str, zone: &str, duration: f64) -> Result<()>;
}

/// Publishes scoped stop messages on per-schedule queues.
#[async_trait]
pub trait StopPublisher: Send + Sync {
    async fn publish_stop(&self, schedule_id: &str) -> std::result::Result<(), BrokerError>;
}

/// Routes control-queue commands to the schedule store or worker lifecycle.
pub struct Dispatcher {
    schedules: Arc<dyn ScheduleStore>,
    spawner: Arc<dyn WorkerSpawner>,
    stops: Arc<dyn StopPublisher>,
}

impl Dispatcher {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        spawner: Arc<dyn WorkerSpawner>,
        stops: Arc<dyn StopPublisher>,
    ) -> Self {
        Self {
            schedules,
            spawner,
            stops,
        }
    }

    /// Handle one raw control-queue payload.
    ///
    /// Malformed payloads and semantically invalid schedule changes are
    /// dropped with a log line and zero state change. Collaborator failures
    /// (IO, broker) propagate to the supervisor loop.
    pub async fn handle(&self, payload: &[u8]) -> Result<()> {
        let Some(cmd) = Command::parse(payload) else {
            debug!(
                payload = %String::from_utf8_lossy(payload),
                "Dropping unparseable command"
            );
            return Ok(());
        };

        debug!(method = ?cmd.method, id = %cmd.id, "Received command");

        let outcome = match cmd.method {
            Method::Add => self.schedules.add(schedule_def(&cmd)).await.map_err(Error::from),
            Method::Update => self
                .schedules
                .update(schedule_def(&cmd))
                .await
                .map_err(Error::from),
            Method::Delete => self.schedules.delete(&cmd.id).await.map_err(Error::from),
            Method::Refresh => {
                info!(count = cmd.schedules.len(), "Refreshing schedules");
                self.schedules.refresh(cmd.schedules).await.map_err(Error::from)
            }
            Method::Play => {
                info!(id = %cmd.id, zone = %cmd.zone, duration = cmd.duration, "Play");
                self.spawner.spawn(&cmd.id, &cmd.zone, cmd.duration).await
            }
            Method::Stop => {
                info!(id = %cmd.id, "Stop");
                self.stops.publish_stop(&cmd.id).await.map_err(Error::from)
            }
        };

        match outcome {
            Ok(()) => Ok(()),
            // Bad input in a well-formed envelope: drop it like a parse
            // failure instead of recycling the broker connection.
            Err(Error::Schedule(e @ (ScheduleError::Invalid { .. } | ScheduleError::NotFound { .. }))) => {
                warn!(method = ?cmd.method, id = %cmd.id, error = %e, "Rejected command");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn schedule_def(cmd: &Command) -> ScheduleDef {
    ScheduleDef {
        id: cmd.id.clone(),
        zone: cmd.zone.clone(),
        duration: cmd.duration,
        time: cmd.time.clone(),
        days: cmd.days.clone(),
    }
}

/// Spawns detached `zone-worker` processes.
pub struct ProcessSpawner {
    worker_bin: PathBuf,
}

impl ProcessSpawner {
    pub fn new(worker_bin: impl Into<PathBuf>) -> Self {
        Self {
            worker_bin: worker_bin.into(),
        }
    }
}

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
    async fn spawn(&self, schedule_id: &str, zone: &str, duration: f64) -> Result<()> {
        let mut child = tokio::process::Command::new(&self.worker_bin)
            .arg(schedule_id)
            .arg(zone)
            .arg(duration.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::Spawn(format!("{}: {e}", self.worker_bin.display())))?;

        info!(
            id = %schedule_id,
            zone = %zone,
            pid = child.id().unwrap_or(0),
            "Spawned worker"
        );

        // Reap the child when it exits so it never lingers as a zombie.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
        Ok(())
    }
}

/// Stop publisher bound to one live broker session.
pub struct ChannelStopPublisher {
    channel: Arc<BrokerChannel>,
}

impl ChannelStopPublisher {
    pub fn new(channel: Arc<BrokerChannel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl StopPublisher for ChannelStopPublisher {
    async fn publish_stop(&self, schedule_id: &str) -> std::result::Result<(), BrokerError> {
        // Declare first: the worker may not have attached yet, and the stop
        // must not vanish into an unrouted publish.
        self.channel.declare_queue(schedule_id).await?;
        self.channel
            .publish_json(schedule_id, &ShutdownMessage::stop_now())
            .await
    }
}

//! Worker lifecycle — one process per active schedule run.
//!
//! A worker owns exactly one zone for its lifetime. It registers itself
//! (atomically, so a duplicate `play` is a no-op), turns the zone on, then
//! listens on a queue named after its schedule id for a stop message. A
//! one-shot deadline publishes a self-targeted stop on the same queue, so
//! the timeout path and the remote-stop path run through one handler.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::command::ShutdownMessage;
use crate::config::Config;
use crate::error::{BrokerError, RegistryError, Result};
use crate::gpio::{Actuator, actuator_from_config};
use crate::registry::{Registry, RegistryEntry};
use crate::supervisor::ErrorThrottle;

use futures::StreamExt;

/// A single timed zone run.
pub struct ZoneWorker {
    config: Config,
    registry: Registry,
    actuator: Arc<dyn Actuator>,
    schedule_id: String,
    zone: String,
    duration: f64,
}

impl ZoneWorker {
    pub fn new(config: Config, schedule_id: String, zone: String, duration: f64) -> Self {
        let registry = Registry::new(config.registry_dir.clone());
        let actuator = actuator_from_config(&config);
        Self {
            config,
            registry,
            actuator,
            schedule_id,
            zone,
            duration,
        }
    }

    /// Run to completion. Returns `Ok(())` both when another worker already
    /// holds the schedule (benign duplicate) and after a clean shutdown.
    pub async fn run(&self) -> Result<()> {
        let start = Utc::now();
        let entry = RegistryEntry {
            pid: std::process::id(),
            zone: self.zone.clone(),
            end: end_timestamp(start, self.duration),
        };

        match self.registry.create_if_absent(&self.schedule_id, &entry).await {
            Ok(()) => {}
            Err(RegistryError::AlreadyExists { .. }) => {
                info!(id = %self.schedule_id, "Schedule already running; exiting");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        // Guard held: every exit path below must release the zone.
        if let Err(e) = self.actuator.setup(&self.zone).and_then(|()| self.actuator.on(&self.zone))
        {
            self.release().await;
            return Err(e.into());
        }

        info!(
            id = %self.schedule_id,
            zone = %self.zone,
            duration = self.duration,
            "Zone run started"
        );

        let broker = Broker::new(self.config.broker_url.clone());
        let deadline = tokio::time::Instant::now() + run_length(self.duration);
        let mut throttle = ErrorThrottle::new(self.config.warn_window);

        loop {
            match self.session(&broker, start, deadline).await {
                Ok(()) => {
                    self.release().await;
                    return Ok(());
                }
                Err(e) => {
                    throttle.report("worker", &e);
                    // Past the deadline with no broker there is nothing left
                    // to wait for; shut down locally instead of watering
                    // until the sweep reclaims the zone.
                    if tokio::time::Instant::now() >= deadline {
                        warn!(
                            id = %self.schedule_id,
                            "Duration elapsed while broker unreachable; shutting down"
                        );
                        self.release().await;
                        return Ok(());
                    }
                    tokio::time::sleep(self.config.worker_reconnect_delay).await;
                }
            }
        }
    }

    /// One broker session. Returns `Ok(())` when the run should end.
    ///
    /// The deadline flag is per-session on purpose: if the connection died
    /// after the self-stop was published but before it came back around,
    /// the reconnect republishes it. A duplicate stop is harmless: any
    /// later worker under the same id rejects it as stale.
    async fn session(
        &self,
        broker: &Broker,
        start: DateTime<Utc>,
        deadline: tokio::time::Instant,
    ) -> Result<()> {
        let channel = broker.connect().await?;
        channel.declare_queue(&self.schedule_id).await?;
        let tag = format!("{}-worker", self.schedule_id);
        let mut consumer = channel.consume(&self.schedule_id, &tag).await?;
        let mut fired = false;

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline), if !fired => {
                    fired = true;
                    debug!(id = %self.schedule_id, "Duration elapsed; publishing self-stop");
                    if let Err(e) = channel
                        .publish_json(&self.schedule_id, &ShutdownMessage::stop_now())
                        .await
                    {
                        // Broker is gone at the deadline: shut down directly
                        // rather than water the lawn until it comes back.
                        warn!(id = %self.schedule_id, error = %e, "Self-stop publish failed");
                        return Ok(());
                    }
                }
                next = consumer.next() => match next {
                    Some(Ok(delivery)) => {
                        let Some(msg) = ShutdownMessage::parse(&delivery.data) else {
                            debug!(id = %self.schedule_id, "Dropping unparseable stop message");
                            continue;
                        };
                        if msg.supersedes(start) {
                            info!(id = %self.schedule_id, ts = %msg.ts, "Stop received");
                            return Ok(());
                        }
                        debug!(id = %self.schedule_id, ts = %msg.ts, "Ignoring stale stop");
                    }
                    Some(Err(e)) => return Err(BrokerError::from(e).into()),
                    None => {
                        return Err(BrokerError::StreamEnded {
                            queue: self.schedule_id.clone(),
                        }
                        .into())
                    }
                }
            }
        }
    }

    /// Deassert the zone and drop the registry entry.
    async fn release(&self) {
        if let Err(e) = self.actuator.off(&self.zone) {
            warn!(zone = %self.zone, error = %e, "Failed to turn zone off");
        }
        match self.registry.remove(&self.schedule_id).await {
            Ok(true) => info!(id = %self.schedule_id, zone = %self.zone, "Zone run finished"),
            Ok(false) => debug!(id = %self.schedule_id, "Registry entry already gone"),
            Err(e) => warn!(id = %self.schedule_id, error = %e, "Failed to remove registry entry"),
        }
    }
}

/// Longest run a single activation can be asked for. Anything beyond this
/// is a garbled command, not a watering plan.
const MAX_RUN_SECS: f64 = 366.0 * 24.0 * 3600.0;

/// Bounded, finite run length. Nonsense input (NaN, infinity, negative)
/// fails closed to a zero-length run.
fn run_length(duration_secs: f64) -> std::time::Duration {
    if duration_secs.is_finite() {
        std::time::Duration::from_secs_f64(duration_secs.clamp(0.0, MAX_RUN_SECS))
    } else {
        std::time::Duration::ZERO
    }
}

/// Absolute end of a run, with sub-second precision. Uses the same bound
/// as the live deadline so the registry entry and the worker agree.
fn end_timestamp(start: DateTime<Utc>, duration_secs: f64) -> DateTime<Utc> {
    let millis = run_length(duration_secs).as_millis() as i64;
    start
        .checked_add_signed(chrono::Duration::milliseconds(millis))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_timestamp_adds_duration() {
        let start = Utc::now();
        let end = end_timestamp(start, 2.5);
        assert_eq!((end - start).num_milliseconds(), 2500);
    }

    #[test]
    fn end_timestamp_clamps_negative_durations() {
        let start = Utc::now();
        assert_eq!(end_timestamp(start, -5.0), start);
    }

    #[test]
    fn end_timestamp_clamps_absurd_durations() {
        let start = Utc::now();
        let capped = end_timestamp(start, MAX_RUN_SECS);
        assert_eq!(end_timestamp(start, f64::MAX), capped);
        assert_eq!(end_timestamp(start, 1e18), capped);
        assert!(capped > start);
    }

    #[test]
    fn nonsense_durations_fail_closed() {
        assert_eq!(run_length(f64::NAN), std::time::Duration::ZERO);
        assert_eq!(run_length(f64::INFINITY), std::time::Duration::ZERO);
        assert_eq!(run_length(-1.0), std::time::Duration::ZERO);
        assert_eq!(run_length(2.5), std::time::Duration::from_secs_f64(2.5));
    }
}

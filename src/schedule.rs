//! Recurring-schedule store and firing.
//!
//! Schedule definitions (`id, zone, duration, time, days`) are kept in
//! memory and persisted to a single JSON file with an atomic tmp+rename
//! write. A ticker task periodically fires every schedule whose occurrence
//! has passed since the previous tick, going through the same
//! `WorkerSpawner` path as a remote `play` so the single-instance guard
//! applies to recurring runs too.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveTime, TimeZone};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::command::ScheduleDef;
use crate::dispatcher::WorkerSpawner;
use crate::error::ScheduleError;

/// Persistent registry of recurring schedules.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Insert or replace a schedule. Idempotent on retry.
    async fn add(&self, def: ScheduleDef) -> Result<(), ScheduleError>;
    /// Replace an existing schedule's zone/duration/time/days.
    async fn update(&self, def: ScheduleDef) -> Result<(), ScheduleError>;
    /// Remove a schedule. Idempotent; removing an absent id is a no-op.
    async fn delete(&self, id: &str) -> Result<(), ScheduleError>;
    /// Replace all schedules with the supplied set.
    async fn refresh(&self, defs: Vec<ScheduleDef>) -> Result<(), ScheduleError>;
    /// All current schedules.
    async fn list(&self) -> Result<Vec<ScheduleDef>, ScheduleError>;
}

/// JSON-file-backed schedule store.
pub struct FileScheduleStore {
    path: PathBuf,
    inner: RwLock<HashMap<String, ScheduleDef>>,
}

impl FileScheduleStore {
    /// Load the store, starting empty when the file does not exist yet.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, ScheduleError> {
        let path = path.into();
        let map = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let defs: Vec<ScheduleDef> = serde_json::from_slice(&bytes)?;
                defs.into_iter().map(|d| (d.id.clone(), d)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            inner: RwLock::new(map),
        })
    }

    /// Write the full schedule set out, atomically replacing the old file.
    async fn persist(&self, map: &HashMap<String, ScheduleDef>) -> Result<(), ScheduleError> {
        let mut defs: Vec<&ScheduleDef> = map.values().collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        let json = serde_json::to_vec_pretty(&defs)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ScheduleStore for FileScheduleStore {
    async fn add(&self, def: ScheduleDef) -> Result<(), ScheduleError> {
        validate(&def)?;
        let mut map = self.inner.write().await;
        map.insert(def.id.clone(), def);
        self.persist(&map).await
    }

    async fn update(&self, def: ScheduleDef) -> Result<(), ScheduleError> {
        validate(&def)?;
        let mut map = self.inner.write().await;
        if !map.contains_key(&def.id) {
            return Err(ScheduleError::NotFound { id: def.id });
        }
        map.insert(def.id.clone(), def);
        self.persist(&map).await
    }

    async fn delete(&self, id: &str) -> Result<(), ScheduleError> {
        let mut map = self.inner.write().await;
        if map.remove(id).is_none() {
            return Ok(());
        }
        self.persist(&map).await
    }

    async fn refresh(&self, defs: Vec<ScheduleDef>) -> Result<(), ScheduleError> {
        let mut map = self.inner.write().await;
        map.clear();
        for def in defs {
            map.insert(def.id.clone(), def);
        }
        self.persist(&map).await
    }

    async fn list(&self) -> Result<Vec<ScheduleDef>, ScheduleError> {
        let map = self.inner.read().await;
        let mut defs: Vec<ScheduleDef> = map.values().cloned().collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(defs)
    }
}

/// Reject definitions that could never fire.
fn validate(def: &ScheduleDef) -> Result<(), ScheduleError> {
    if def.id.is_empty() {
        return Err(ScheduleError::Invalid {
            id: def.id.clone(),
            reason: "empty id".to_string(),
        });
    }
    cron_expr(def).map(|_| ())
}

/// Translate `(time, days)` into a six-field cron expression.
fn cron_expr(def: &ScheduleDef) -> Result<String, ScheduleError> {
    let invalid = |reason: String| ScheduleError::Invalid {
        id: def.id.clone(),
        reason,
    };

    let raw_time = def
        .time
        .as_deref()
        .ok_or_else(|| invalid("missing start time".to_string()))?;
    let time = NaiveTime::parse_from_str(raw_time, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw_time, "%H:%M"))
        .map_err(|_| invalid(format!("unparseable start time {raw_time:?}")))?;

    if def.days.is_empty() {
        return Err(invalid("no days listed".to_string()));
    }
    let days: Vec<&str> = def
        .days
        .iter()
        .map(|d| cron_day(d).ok_or_else(|| invalid(format!("unknown day tag {d:?}"))))
        .collect::<Result<_, _>>()?;

    use chrono::Timelike;
    Ok(format!(
        "0 {} {} * * {}",
        time.minute(),
        time.hour(),
        days.join(",")
    ))
}

fn cron_day(tag: &str) -> Option<&'static str> {
    // Accept both short tags and full names.
    match tag.to_ascii_lowercase().get(..3)? {
        "mon" => Some("MON"),
        "tue" => Some("TUE"),
        "wed" => Some("WED"),
        "thu" => Some("THU"),
        "fri" => Some("FRI"),
        "sat" => Some("SAT"),
        "sun" => Some("SUN"),
        _ => None,
    }
}

/// First occurrence of `def` strictly after `after`.
pub fn next_fire<Tz: TimeZone>(
    def: &ScheduleDef,
    after: &DateTime<Tz>,
) -> Result<Option<DateTime<Tz>>, ScheduleError> {
    let expr = cron_expr(def)?;
    let schedule = cron::Schedule::from_str(&expr).map_err(|e| ScheduleError::Invalid {
        id: def.id.clone(),
        reason: e.to_string(),
    })?;
    Ok(schedule.after(after).next())
}

/// Schedules whose next occurrence after `after` has arrived by `now`.
///
/// Definitions that cannot fire (no time, no days) are skipped quietly; they
/// can only get here via a bulk `refresh`, which does not validate.
pub fn due_between<Tz: TimeZone>(
    defs: &[ScheduleDef],
    after: &DateTime<Tz>,
    now: &DateTime<Tz>,
) -> Vec<ScheduleDef> {
    defs.iter()
        .filter(|def| match next_fire(def, after) {
            Ok(Some(fire)) => fire <= *now,
            Ok(None) => false,
            Err(e) => {
                debug!(id = %def.id, error = %e, "Skipping unfireable schedule");
                false
            }
        })
        .cloned()
        .collect()
}

/// Spawn the recurring-schedule ticker.
pub fn spawn_schedule_ticker(
    store: Arc<dyn ScheduleStore>,
    spawner: Arc<dyn WorkerSpawner>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;
        let mut last = Local::now();

        loop {
            ticker.tick().await;
            let now = Local::now();

            let defs = match store.list().await {
                Ok(defs) => defs,
                Err(e) => {
                    error!(error = %e, "Failed to load schedules");
                    last = now;
                    continue;
                }
            };

            for def in due_between(&defs, &last, &now) {
                info!(id = %def.id, zone = %def.zone, "Recurring schedule due");
                if let Err(e) = spawner.spawn(&def.id, &def.zone, def.duration).await {
                    warn!(id = %def.id, error = %e, "Failed to start scheduled run");
                }
            }
            last = now;
        }
    })
}

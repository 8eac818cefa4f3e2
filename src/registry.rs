//! Filesystem-backed process registry.
//!
//! One JSON file per running schedule, named by schedule id. File existence
//! is the single-instance mutex: `create_if_absent` uses `O_EXCL` semantics
//! (`OpenOptions::create_new`), so two near-simultaneous `play` commands for
//! the same id cannot both win. Entries are immutable once written; they are
//! deleted by the worker on clean exit or reclaimed by the cleanup sweep
//! after `end` has passed.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RegistryError;

/// A persisted record of one running worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// OS process id of the worker.
    pub pid: u32,
    /// Zone the worker owns for its lifetime.
    pub zone: String,
    /// Absolute timestamp after which the entry is stale.
    pub end: DateTime<Utc>,
}

/// Registry of running workers, keyed by schedule id.
#[derive(Debug, Clone)]
pub struct Registry {
    dir: PathBuf,
}

impl Registry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the registry directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> Result<(), RegistryError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Atomically create an entry for `id`.
    ///
    /// Fails with [`RegistryError::AlreadyExists`] when a live entry holds
    /// the mutex; the caller treats that as a benign duplicate activation.
    pub async fn create_if_absent(
        &self,
        id: &str,
        entry: &RegistryEntry,
    ) -> Result<(), RegistryError> {
        let path = self.entry_path(id)?;
        self.ensure_dir().await?;

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        let file = match options.open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(RegistryError::AlreadyExists { id: id.to_string() });
            }
            Err(e) => return Err(e.into()),
        };
        drop(file);

        // The exclusive create above won the race; the contents can be
        // written non-atomically because readers tolerate partial files.
        let json = serde_json::to_vec(entry).map_err(|e| RegistryError::Corrupt {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
        tokio::fs::write(&path, json).await?;
        Ok(())
    }

    /// Read the entry for `id`, if any.
    pub async fn read(&self, id: &str) -> Result<Option<RegistryEntry>, RegistryError> {
        let path = self.entry_path(id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry = serde_json::from_slice(&bytes).map_err(|e| RegistryError::Corrupt {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(entry))
    }

    /// Whether an entry for `id` exists.
    pub async fn exists(&self, id: &str) -> bool {
        match self.entry_path(id) {
            Ok(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Remove the entry for `id`. Idempotent; returns whether it existed.
    pub async fn remove(&self, id: &str) -> Result<bool, RegistryError> {
        let path = self.entry_path(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// List all entries. Corrupt or half-written files are skipped with a
    /// debug log; the sweep will retry them next interval once complete.
    pub async fn list(&self) -> Result<Vec<(String, RegistryEntry)>, RegistryError> {
        let mut out = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };

        while let Some(dirent) = dir.next_entry().await? {
            let Ok(name) = dirent.file_name().into_string() else {
                continue;
            };
            match self.read(&name).await {
                Ok(Some(entry)) => out.push((name, entry)),
                Ok(None) => {}
                Err(e) => debug!(id = %name, error = %e, "Skipping unreadable registry entry"),
            }
        }
        Ok(out)
    }

    /// Schedule ids become file names directly, so refuse anything that
    /// could escape the registry directory.
    fn entry_path(&self, id: &str) -> Result<PathBuf, RegistryError> {
        if id.is_empty()
            || id == "."
            || id == ".."
            || id.contains('/')
            || id.contains('\\')
            || id.contains('\0')
        {
            return Err(RegistryError::InvalidId { id: id.to_string() });
        }
        Ok(self.dir.join(id))
    }
}

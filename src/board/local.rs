//! On-device task snapshot.
//!
//! A single JSON array of tasks under a fixed file name in the data
//! directory. Loading never fails: missing or unreadable data yields an empty
//! list. Saving overwrites the whole file through a temp-file rename.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::backend::{BackendKind, TaskBackend};
use super::migrate::migrate_tasks;
use super::models::Task;
use crate::errors::{BackendError, StoreError};

/// Fixed storage key of the local snapshot.
pub const LOCAL_SNAPSHOT_FILE: &str = "mission-board-tasks-backup.json";

#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Snapshot stored under [`LOCAL_SNAPSHOT_FILE`] inside `data_dir`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(LOCAL_SNAPSHOT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot and run the assignee migration over it.
    pub fn load(&self) -> Vec<Task> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read local snapshot");
                return Vec::new();
            }
        };
        if content.trim().is_empty() {
            return Vec::new();
        }
        match serde_json::from_str(&content) {
            Ok(raw) => migrate_tasks(raw),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Discarding malformed local snapshot");
                Vec::new()
            }
        }
    }

    /// Overwrite the snapshot with `tasks`.
    pub fn save(&self, tasks: &[Task]) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(tasks)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::WriteFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(|source| StoreError::WriteFailed {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| StoreError::WriteFailed {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }
}

#[async_trait]
impl TaskBackend for LocalStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn fetch_all(&self) -> Result<Vec<Task>, BackendError> {
        Ok(self.load())
    }

    async fn put(&self, task: &Task) -> Result<Task, BackendError> {
        let mut tasks = self.load();
        match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task.clone(),
            None => tasks.push(task.clone()),
        }
        self.save(&tasks)?;
        Ok(task.clone())
    }

    async fn put_all(&self, tasks: &[Task]) -> Result<(), BackendError> {
        self.save(tasks)?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), BackendError> {
        let mut tasks = self.load();
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        if tasks.len() != before {
            self.save(&tasks)?;
        }
        Ok(())
    }
}

//! Flat-file inbox for tasks submitted by external agents.
//!
//! Entries are appended to a JSON array in `inbox.json` under the data
//! directory. A missing or malformed file counts as empty and is overwritten
//! by the next append.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::models::{Priority, TaskStatus, generate_id};
use crate::errors::{StoreError, SyncError};

pub const INBOX_FILE: &str = "inbox.json";

const DEFAULT_SOURCE: &str = "Orbit";
/// Author recorded on every inbox entry.
const INBOX_AUTHOR: &str = "Orbit";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxEntry {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: TaskStatus,
    pub source: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub source: Option<String>,
}

pub struct InboxFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl InboxFile {
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(INBOX_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> Vec<InboxEntry> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read inbox");
                return Vec::new();
            }
        };
        match serde_json::from_str(&content) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Discarding malformed inbox");
                Vec::new()
            }
        }
    }

    /// Append a new entry. Returns it with the inbox size after the write.
    pub async fn append(&self, req: InboxRequest) -> Result<(InboxEntry, usize), SyncError> {
        let title = req
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SyncError::Validation("Title is required".into()))?;
        let source = req
            .source
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SOURCE.to_string());
        let now = Utc::now();
        let entry = InboxEntry {
            id: generate_id(),
            title,
            description: req.description.unwrap_or_default(),
            priority: req.priority.unwrap_or_default(),
            status: req.status.unwrap_or_default(),
            created_by: INBOX_AUTHOR.to_string(),
            source,
            created_at: now,
            updated_at: now,
        };

        let _guard = self.lock.lock().await;
        let mut entries = self.entries();
        entries.push(entry.clone());
        self.save(&entries)?;
        tracing::info!(id = %entry.id, source = %entry.source, "Inbox task added");
        Ok((entry, entries.len()))
    }

    fn save(&self, entries: &[InboxEntry]) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(entries)?;
        let write_failed = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StoreError::WriteFailed { path, source }
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_failed(parent))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(write_failed(&tmp))?;
        std::fs::rename(&tmp, &self.path).map_err(write_failed(&self.path))
    }
}

//! Key-value task store.
//!
//! The whole task list lives as one JSON array under a single key. Single-item
//! writes are read-modify-write of that array; `put_all` overwrites it. Within
//! one process the read-modify-write cycle is serialized by an async mutex.
//! Writers in different processes can still race, last write wins.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use fs2::FileExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use super::backend::{BackendKind, TaskBackend};
use super::migrate::{migrate_tasks, raw_entries};
use super::models::{Task, TaskDraft};
use crate::errors::{BackendError, SyncError};

/// Default key the task array is stored under.
pub const DEFAULT_TASKS_KEY: &str = "mission-board:tasks";

/// Minimal key-value client: one JSON value per key.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, BackendError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), BackendError>;
}

// ── In-memory store ───────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Value>, BackendError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), BackendError> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }
}

// ── File store ────────────────────────────────────────────────────────

/// One JSON file per key under a directory, guarded by an advisory lock.
pub struct FileKv {
    dir: PathBuf,
}

impl FileKv {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> BackendError + '_ {
    move |source| BackendError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn read_locked(path: &Path) -> Result<Option<Value>, BackendError> {
    let mut file = match OpenOptions::new().read(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path)(e)),
    };
    file.lock_shared().map_err(io_error(path))?;
    let mut content = String::new();
    let read = file.read_to_string(&mut content).map_err(io_error(path));
    let _ = FileExt::unlock(&file);
    read?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| BackendError::Malformed(format!("{}: {}", path.display(), e)))
}

fn write_locked(path: &Path, value: &Value) -> Result<(), BackendError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let lock_path = path.with_extension("lock");
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(io_error(&lock_path))?;
    lock.lock_exclusive().map_err(io_error(&lock_path))?;

    let result = (|| {
        let content = serde_json::to_string_pretty(value)
            .map_err(|e| BackendError::Malformed(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        let mut file = std::fs::File::create(&tmp).map_err(io_error(&tmp))?;
        file.write_all(content.as_bytes()).map_err(io_error(&tmp))?;
        file.sync_all().map_err(io_error(&tmp))?;
        std::fs::rename(&tmp, path).map_err(io_error(path))
    })();

    let _ = FileExt::unlock(&lock);
    result
}

#[async_trait]
impl KvStore for FileKv {
    async fn get(&self, key: &str) -> Result<Option<Value>, BackendError> {
        let path = self.path_for(key);
        tokio::task::spawn_blocking(move || read_locked(&path))
            .await
            .map_err(|e| BackendError::Unreachable(format!("kv read task failed: {}", e)))?
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), BackendError> {
        let path = self.path_for(key);
        tokio::task::spawn_blocking(move || write_locked(&path, &value))
            .await
            .map_err(|e| BackendError::Unreachable(format!("kv write task failed: {}", e)))?
    }
}

// ── REST store ────────────────────────────────────────────────────────

/// Client for a hosted key-value service with a REST surface
/// (`GET {url}/get/{key}`, `POST {url}/set/{key}`, bearer token auth).
/// Values are stored as JSON-encoded strings.
pub struct RestKv {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Deserialize)]
struct RestKvResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl RestKv {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<RestKvResponse, BackendError> {
        let resp = req.bearer_auth(&self.token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BackendError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        let body: RestKvResponse = resp.json().await?;
        if let Some(error) = body.error {
            return Err(BackendError::Rejected {
                status: status.as_u16(),
                message: error,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl KvStore for RestKv {
    async fn get(&self, key: &str) -> Result<Option<Value>, BackendError> {
        let url = format!("{}/get/{}", self.base_url, key);
        let body = self.send(self.client.get(&url)).await?;
        match body.result {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(encoded)) => serde_json::from_str(&encoded)
                .map(Some)
                .map_err(|e| BackendError::Malformed(format!("value at '{}': {}", key, e))),
            Some(other) => Ok(Some(other)),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), BackendError> {
        let url = format!("{}/set/{}", self.base_url, key);
        self.send(self.client.post(&url).body(value.to_string()))
            .await
            .map(|_| ())
    }
}

// ── Task backend over a key-value store ───────────────────────────────

pub struct KvBackend {
    store: Arc<dyn KvStore>,
    key: String,
    write_lock: Mutex<()>,
}

impl KvBackend {
    pub fn new(store: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    async fn read(&self) -> Result<Vec<Task>, BackendError> {
        Ok(self
            .store
            .get(&self.key)
            .await?
            .map(migrate_tasks)
            .unwrap_or_default())
    }

    /// Stored entries as raw JSON. Single-item writes go through this so
    /// entries that do not decode as a [`Task`] survive the write-back.
    async fn read_entries(&self) -> Result<Vec<Value>, BackendError> {
        match self.store.get(&self.key).await? {
            None => Ok(Vec::new()),
            Some(raw) => raw_entries(raw).ok_or_else(|| {
                BackendError::Malformed(format!("value under '{}' is not a task list", self.key))
            }),
        }
    }

    async fn write_entries(&self, entries: Vec<Value>) -> Result<(), BackendError> {
        self.store.set(&self.key, Value::Array(entries)).await
    }

    async fn write(&self, tasks: &[Task]) -> Result<(), BackendError> {
        let value =
            serde_json::to_value(tasks).map_err(|e| BackendError::Malformed(e.to_string()))?;
        self.store.set(&self.key, value).await
    }

    pub async fn list(&self) -> Result<Vec<Task>, SyncError> {
        Ok(self.read().await?)
    }

    /// Create a task from `draft` and append it to the stored array.
    pub async fn create(&self, draft: TaskDraft) -> Result<Task, SyncError> {
        let mut task = draft.into_task()?;
        let now = Utc::now();
        task.created_at = Some(now);
        task.updated_at = Some(now);

        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_entries().await?;
        entries.push(to_entry(&task)?);
        self.write_entries(entries).await?;
        Ok(task)
    }

    /// Merge `draft` into the stored task with the same id.
    ///
    /// The merge happens on the stored JSON object, so fields this crate does
    /// not model are kept. Fails without writing if the merged entry still
    /// does not decode.
    pub async fn update(&self, draft: TaskDraft) -> Result<Task, SyncError> {
        let id = draft
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| SyncError::Validation("Task ID is required".into()))?;
        if draft.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(SyncError::Validation("Task title cannot be empty".into()));
        }
        let patch =
            serde_json::to_value(&draft).map_err(|e| SyncError::MalformedData(e.to_string()))?;

        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_entries().await?;
        let index = position(&entries, &id).ok_or_else(|| SyncError::task_not_found(&id))?;
        let mut merged = entries[index].clone();
        let Some(fields) = merged.as_object_mut() else {
            return Err(SyncError::MalformedData(format!(
                "Stored task {} is not an object",
                id
            )));
        };
        if let Value::Object(patch) = patch {
            fields.extend(patch.into_iter().filter(|(k, _)| k != "id"));
        }
        fields.insert(
            "updatedAt".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        );
        let updated: Task = serde_json::from_value(merged.clone()).map_err(|e| {
            SyncError::MalformedData(format!("Stored task {} is unreadable: {}", id, e))
        })?;

        entries[index] = merged;
        self.write_entries(entries).await?;
        Ok(updated)
    }

    /// Remove the task with `id`. Returns whether it existed.
    pub async fn delete(&self, id: &str) -> Result<bool, SyncError> {
        let _guard = self.write_lock.lock().await;
        Ok(self.remove_entry(id).await?)
    }

    async fn remove_entry(&self, id: &str) -> Result<bool, BackendError> {
        let mut entries = self.read_entries().await?;
        let Some(index) = position(&entries, id) else {
            return Ok(false);
        };
        entries.remove(index);
        self.write_entries(entries).await?;
        Ok(true)
    }

    /// Wholesale overwrite with `tasks`, in order.
    pub async fn replace_all(&self, tasks: &[Task]) -> Result<(), SyncError> {
        let _guard = self.write_lock.lock().await;
        self.write(tasks).await?;
        Ok(())
    }
}

fn position(entries: &[Value], id: &str) -> Option<usize> {
    entries
        .iter()
        .position(|e| e.get("id").and_then(Value::as_str) == Some(id))
}

fn to_entry(task: &Task) -> Result<Value, BackendError> {
    serde_json::to_value(task).map_err(|e| BackendError::Malformed(e.to_string()))
}

#[async_trait]
impl TaskBackend for KvBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Kv
    }

    async fn fetch_all(&self) -> Result<Vec<Task>, BackendError> {
        self.read().await
    }

    async fn put(&self, task: &Task) -> Result<Task, BackendError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_entries().await?;
        let mut stored = task.clone();
        let now = Utc::now();
        stored.created_at.get_or_insert(now);
        stored.updated_at = Some(now);
        let entry = to_entry(&stored)?;
        match position(&entries, &stored.id) {
            Some(index) => entries[index] = entry,
            None => entries.push(entry),
        }
        self.write_entries(entries).await?;
        Ok(stored)
    }

    async fn put_all(&self, tasks: &[Task]) -> Result<(), BackendError> {
        let _guard = self.write_lock.lock().await;
        self.write(tasks).await
    }

    async fn remove(&self, id: &str) -> Result<(), BackendError> {
        let _guard = self.write_lock.lock().await;
        self.remove_entry(id).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::models::{Assignee, Priority, TaskStatus};
    use serde_json::json;
    use tempfile::TempDir;

    fn memory_backend() -> KvBackend {
        KvBackend::new(Arc::new(MemoryKv::new()), DEFAULT_TASKS_KEY)
    }

    #[tokio::test]
    async fn test_create_fills_defaults() {
        let kv = memory_backend();
        let task = kv.create(TaskDraft::titled("X")).await.unwrap();
        let all = kv.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, task.id);
        assert_eq!(all[0].priority, Priority::Low);
        assert_eq!(all[0].status, TaskStatus::ToDo);
        assert_eq!(all[0].assignee, Assignee::None);
        assert!(all[0].created_at.is_some());
    }

    #[tokio::test]
    async fn test_update_requires_id_and_existing_task() {
        let kv = memory_backend();
        let err = kv.update(TaskDraft::titled("no id")).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));

        let err = kv
            .update(TaskDraft {
                id: Some("missing".into()),
                ..TaskDraft::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
        assert!(kv.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let kv = memory_backend();
        let task = kv.create(TaskDraft::titled("Write report")).await.unwrap();
        let updated = kv
            .update(TaskDraft {
                id: Some(task.id.clone()),
                status: Some(TaskStatus::Done),
                ..TaskDraft::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.title, "Write report");
        assert_eq!(updated.status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn test_delete_missing_is_noop() {
        let kv = memory_backend();
        kv.create(TaskDraft::titled("keep")).await.unwrap();
        assert!(!kv.delete("missing").await.unwrap());
        assert_eq!(kv.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reads_are_migrated() {
        let store = Arc::new(MemoryKv::new());
        store
            .set(DEFAULT_TASKS_KEY, json!([{"id": "1", "title": "legacy"}]))
            .await
            .unwrap();
        let kv = KvBackend::new(store, DEFAULT_TASKS_KEY);
        let tasks = kv.fetch_all().await.unwrap();
        assert_eq!(tasks[0].assignee, Assignee::None);
    }

    async fn seeded(raw: Value) -> (Arc<MemoryKv>, KvBackend) {
        let store = Arc::new(MemoryKv::new());
        store.set(DEFAULT_TASKS_KEY, raw).await.unwrap();
        let kv = KvBackend::new(store.clone(), DEFAULT_TASKS_KEY);
        (store, kv)
    }

    async fn stored(store: &MemoryKv) -> Vec<Value> {
        match store.get(DEFAULT_TASKS_KEY).await.unwrap() {
            Some(Value::Array(items)) => items,
            other => panic!("unexpected stored value: {:?}", other),
        }
    }

    fn mixed_entries() -> Value {
        json!([
            {"id": "1", "title": "Odd priority", "priority": "urgent"},
            "not a task",
            {"id": "2", "title": "Readable", "extra": "kept"},
            {"id": "3", "title": "Doomed"}
        ])
    }

    #[tokio::test]
    async fn test_single_item_writes_keep_undecodable_entries() {
        let (store, kv) = seeded(mixed_entries()).await;
        assert_eq!(kv.fetch_all().await.unwrap().len(), 2);

        kv.remove("3").await.unwrap();
        let entries = stored(&store).await;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0]["priority"], "urgent");
        assert_eq!(entries[1], "not a task");

        let mut task = TaskDraft::titled("Fresh").into_task().unwrap();
        kv.put(&task).await.unwrap();
        task.title = "Fresh, edited".into();
        kv.put(&task).await.unwrap();
        assert!(!kv.delete("missing").await.unwrap());
        kv.create(TaskDraft::titled("Created")).await.unwrap();

        let entries = stored(&store).await;
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0]["priority"], "urgent");
        assert_eq!(entries[1], "not a task");
        assert_eq!(entries[3]["title"], "Fresh, edited");
    }

    #[tokio::test]
    async fn test_update_merges_into_stored_object() {
        let (store, kv) = seeded(mixed_entries()).await;
        let updated = kv
            .update(TaskDraft {
                id: Some("2".into()),
                status: Some(TaskStatus::Done),
                ..TaskDraft::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.status, TaskStatus::Done);

        let entries = stored(&store).await;
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0]["priority"], "urgent");
        assert_eq!(entries[2]["extra"], "kept");
        assert_eq!(entries[2]["status"], "Done");
        assert!(entries[2]["updatedAt"].is_string());
    }

    #[tokio::test]
    async fn test_update_can_repair_unreadable_entry() {
        let (store, kv) = seeded(mixed_entries()).await;
        let err = kv
            .update(TaskDraft {
                id: Some("1".into()),
                status: Some(TaskStatus::Done),
                ..TaskDraft::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MalformedData(_)));
        assert_eq!(stored(&store).await[0]["status"], Value::Null);

        let repaired = kv
            .update(TaskDraft {
                id: Some("1".into()),
                priority: Some(Priority::High),
                ..TaskDraft::default()
            })
            .await
            .unwrap();
        assert_eq!(repaired.priority, Priority::High);
        assert_eq!(kv.fetch_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_update_with_null_due_date_clears_it() {
        let kv = memory_backend();
        let task = kv
            .create(TaskDraft {
                due_date: Some(Some("2024-10-31".into())),
                ..TaskDraft::titled("Renew domain")
            })
            .await
            .unwrap();
        let mut edited = task.clone();
        edited.due_date = None;
        let updated = kv.update(TaskDraft::from(&edited)).await.unwrap();
        assert_eq!(updated.due_date, None);
        assert_eq!(kv.list().await.unwrap()[0].due_date, None);
    }

    #[tokio::test]
    async fn test_scalar_value_is_not_overwritten() {
        let (store, kv) = seeded(json!("corrupt")).await;
        let err = kv.create(TaskDraft::titled("X")).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::BackendUnavailable(BackendError::Malformed(_))
        ));
        assert_eq!(
            store.get(DEFAULT_TASKS_KEY).await.unwrap(),
            Some(json!("corrupt"))
        );
    }

    #[tokio::test]
    async fn test_concurrent_creates_do_not_lose_writes() {
        let kv = Arc::new(memory_backend());
        let mut handles = Vec::new();
        for i in 0..20 {
            let kv = Arc::clone(&kv);
            handles.push(tokio::spawn(async move {
                kv.create(TaskDraft::titled(format!("task {}", i)))
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(kv.list().await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_file_kv_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileKv::new(dir.path());
        assert!(store.get("tasks").await.unwrap().is_none());
        store.set("tasks", json!([1, 2, 3])).await.unwrap();
        assert_eq!(store.get("tasks").await.unwrap(), Some(json!([1, 2, 3])));
    }

    #[tokio::test]
    async fn test_file_kv_malformed_value_is_typed_error() {
        let dir = TempDir::new().unwrap();
        let store = FileKv::new(dir.path());
        std::fs::write(dir.path().join("tasks.json"), "{oops").unwrap();
        let err = store.get("tasks").await.unwrap_err();
        assert!(matches!(err, BackendError::Malformed(_)));
    }

    #[test]
    fn test_file_kv_sanitizes_keys() {
        let store = FileKv::new("/data");
        assert_eq!(
            store.path_for("../mission board"),
            PathBuf::from("/data/___mission_board.json")
        );
    }

    #[tokio::test]
    async fn test_rest_kv_unreachable_is_typed() {
        let store = RestKv::new("http://127.0.0.1:1", "token");
        let err = store.get("tasks").await.unwrap_err();
        assert!(err.is_unreachable());
    }
}

//! Document-collection store with a live snapshot feed.
//!
//! Stands in for a hosted document database: records keyed by id, kept in
//! insertion order, optionally mirrored to a JSON file. Every write bumps a
//! collection-wide revision and publishes a full [`Snapshot`] to all
//! subscribers through a `tokio::sync::watch` channel.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;

use super::backend::{BackendKind, Snapshot, SnapshotFeed, TaskBackend};
use super::migrate::migrate_tasks;
use super::models::{Document, Task};
use crate::errors::BackendError;

/// A value that can live in a [`Collection`].
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> &str;

    /// Stamp server-side timestamps for a write happening at `now`.
    fn touch(&mut self, now: DateTime<Utc>);

    /// Decode a persisted array, dropping entries that do not parse.
    fn decode_all(raw: Value) -> Vec<Self> {
        match raw {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match serde_json::from_value(item) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping unreadable collection entry");
                        None
                    }
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl Record for Task {
    fn id(&self) -> &str {
        &self.id
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.created_at.get_or_insert(now);
        self.updated_at = Some(now);
    }

    fn decode_all(raw: Value) -> Vec<Self> {
        migrate_tasks(raw)
    }
}

impl Record for Document {
    fn id(&self) -> &str {
        &self.id
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

struct CollectionState<T> {
    items: Vec<T>,
    revision: u64,
}

pub struct Collection<T: Record> {
    state: Mutex<CollectionState<T>>,
    tx: watch::Sender<Snapshot<T>>,
    persist_path: Option<PathBuf>,
}

impl<T: Record> Collection<T> {
    pub fn new_in_memory() -> Self {
        Self::with_items(Vec::new(), None)
    }

    /// Open a file-backed collection. A missing or malformed file starts the
    /// collection empty; the file is rewritten on the next write.
    pub fn open(path: &Path) -> Self {
        let items = match std::fs::read_to_string(path) {
            Ok(content) if content.trim().is_empty() => Vec::new(),
            Ok(content) => match serde_json::from_str(&content) {
                Ok(raw) => T::decode_all(raw),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Discarding malformed collection file");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read collection file");
                Vec::new()
            }
        };
        Self::with_items(items, Some(path.to_path_buf()))
    }

    fn with_items(items: Vec<T>, persist_path: Option<PathBuf>) -> Self {
        let (tx, _rx) = watch::channel(Snapshot {
            revision: 0,
            items: items.clone(),
        });
        Self {
            state: Mutex::new(CollectionState { items, revision: 0 }),
            tx,
            persist_path,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, CollectionState<T>>, BackendError> {
        self.state
            .lock()
            .map_err(|_| BackendError::Unreachable("collection lock poisoned".into()))
    }

    pub fn list(&self) -> Result<Vec<T>, BackendError> {
        Ok(self.lock()?.items.clone())
    }

    pub fn get(&self, id: &str) -> Result<Option<T>, BackendError> {
        Ok(self.lock()?.items.iter().find(|r| r.id() == id).cloned())
    }

    pub fn revision(&self) -> u64 {
        self.tx.borrow().revision
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Snapshot<T> {
        self.tx.borrow().clone()
    }

    /// Insert or replace `record` in place; new records are appended.
    pub fn upsert(&self, mut record: T) -> Result<T, BackendError> {
        let mut state = self.lock()?;
        record.touch(Utc::now());
        match state.items.iter_mut().find(|r| r.id() == record.id()) {
            Some(existing) => *existing = record.clone(),
            None => state.items.push(record.clone()),
        }
        self.commit(&mut state);
        Ok(record)
    }

    /// Apply `f` to the record with `id`. Returns `None` when it does not exist.
    pub fn update<F>(&self, id: &str, f: F) -> Result<Option<T>, BackendError>
    where
        F: FnOnce(&mut T),
    {
        let mut state = self.lock()?;
        let Some(record) = state.items.iter_mut().find(|r| r.id() == id) else {
            return Ok(None);
        };
        f(record);
        record.touch(Utc::now());
        let updated = record.clone();
        self.commit(&mut state);
        Ok(Some(updated))
    }

    /// Remove the record with `id`. Returns whether anything was removed.
    pub fn remove(&self, id: &str) -> Result<bool, BackendError> {
        let mut state = self.lock()?;
        let before = state.items.len();
        state.items.retain(|r| r.id() != id);
        if state.items.len() == before {
            return Ok(false);
        }
        self.commit(&mut state);
        Ok(true)
    }

    /// Batch overwrite: the collection becomes exactly `records`, in order.
    pub fn replace_all(&self, records: Vec<T>) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        let now = Utc::now();
        state.items = records
            .into_iter()
            .map(|mut r| {
                r.touch(now);
                r
            })
            .collect();
        self.commit(&mut state);
        Ok(())
    }

    pub fn subscribe(&self) -> SnapshotFeed<T> {
        self.tx.subscribe()
    }

    fn commit(&self, state: &mut CollectionState<T>) {
        state.revision += 1;
        self.tx.send_replace(Snapshot {
            revision: state.revision,
            items: state.items.clone(),
        });
        if let Some(path) = &self.persist_path
            && let Err(e) = persist(path, &state.items)
        {
            tracing::warn!(path = %path.display(), error = %e, "Failed to persist collection");
        }
    }
}

fn persist<T: Serialize>(path: &Path, items: &[T]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(items).map_err(std::io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)
}

/// [`TaskBackend`] over a shared task collection.
#[derive(Clone)]
pub struct CollectionBackend {
    collection: Arc<Collection<Task>>,
}

impl CollectionBackend {
    pub fn new(collection: Arc<Collection<Task>>) -> Self {
        Self { collection }
    }

    pub fn collection(&self) -> &Arc<Collection<Task>> {
        &self.collection
    }
}

#[async_trait]
impl TaskBackend for CollectionBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Collection
    }

    async fn fetch_all(&self) -> Result<Vec<Task>, BackendError> {
        self.collection.list()
    }

    async fn put(&self, task: &Task) -> Result<Task, BackendError> {
        self.collection.upsert(task.clone())
    }

    async fn put_all(&self, tasks: &[Task]) -> Result<(), BackendError> {
        self.collection.replace_all(tasks.to_vec())
    }

    async fn remove(&self, id: &str) -> Result<(), BackendError> {
        self.collection.remove(id).map(|_| ())
    }

    fn subscribe(&self) -> Option<SnapshotFeed<Task>> {
        Some(self.collection.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::models::{DocumentDraft, TaskDraft};
    use tempfile::TempDir;

    fn task(title: &str) -> Task {
        TaskDraft::titled(title).into_task().unwrap()
    }

    #[test]
    fn test_upsert_stamps_timestamps_and_bumps_revision() {
        let c = Collection::<Task>::new_in_memory();
        assert_eq!(c.revision(), 0);
        let stored = c.upsert(task("a")).unwrap();
        assert!(stored.created_at.is_some());
        assert!(stored.updated_at.is_some());
        assert_eq!(c.revision(), 1);

        let created = stored.created_at;
        let again = c.upsert(stored).unwrap();
        assert_eq!(again.created_at, created);
        assert_eq!(c.revision(), 2);
        assert_eq!(c.list().unwrap().len(), 1);
    }

    #[test]
    fn test_replace_all_preserves_order() {
        let c = Collection::<Task>::new_in_memory();
        let (a, b, d) = (task("a"), task("b"), task("d"));
        c.replace_all(vec![a.clone(), b.clone(), d.clone()]).unwrap();
        c.replace_all(vec![d.clone(), a.clone(), b.clone()]).unwrap();
        let ids: Vec<String> = c.list().unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![d.id, a.id, b.id]);
    }

    #[test]
    fn test_update_and_remove_missing() {
        let c = Collection::<Task>::new_in_memory();
        assert!(c.update("nope", |t| t.title = "x".into()).unwrap().is_none());
        assert!(!c.remove("nope").unwrap());
        assert_eq!(c.revision(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_snapshots() {
        let c = Collection::<Task>::new_in_memory();
        let mut feed = c.subscribe();
        c.upsert(task("a")).unwrap();
        feed.changed().await.unwrap();
        let snap = feed.borrow_and_update().clone();
        assert_eq!(snap.revision, 1);
        assert_eq!(snap.items.len(), 1);
    }

    #[tokio::test]
    async fn test_dropping_collection_closes_feed() {
        let c = Collection::<Task>::new_in_memory();
        let mut feed = c.subscribe();
        drop(c);
        assert!(feed.changed().await.is_err());
    }

    #[test]
    fn test_file_backed_collection_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("documents.json");
        {
            let c = Collection::<Document>::open(&path);
            c.upsert(
                DocumentDraft::titled("Report")
                    .into_document(Utc::now())
                    .unwrap(),
            )
            .unwrap();
        }
        let reopened = Collection::<Document>::open(&path);
        let docs = reopened.list().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "Report");
    }

    #[test]
    fn test_open_malformed_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, "[{").unwrap();
        let c = Collection::<Task>::open(&path);
        assert!(c.list().unwrap().is_empty());
    }

    #[test]
    fn test_task_collection_migrates_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, r#"[{"id":"1","title":"Legacy"}]"#).unwrap();
        let c = Collection::<Task>::open(&path);
        let tasks = c.list().unwrap();
        assert_eq!(tasks[0].assignee, crate::board::models::Assignee::None);
    }
}

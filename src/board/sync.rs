//! Task synchronization: one in-memory task list kept in step with a backend.
//!
//! [`TaskSync`] owns the authoritative in-memory copy for as long as it is
//! mounted. Mutations apply to that copy first, then persist through the
//! active [`TaskBackend`]. When the backend cannot be reached the hook enters
//! [`SyncPhase::Degraded`] and routes every write to the local snapshot
//! instead. Backends with a snapshot feed push authoritative state back; a
//! snapshot replaces the list only if its revision is newer than the last one
//! applied.

use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;

use super::backend::{BackendKind, Snapshot, SnapshotFeed, TaskBackend};
use super::local::LocalStore;
use super::models::{BoardView, Task, TaskDraft};
use crate::errors::{BackendError, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Loading,
    Ready,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub backend: BackendKind,
    pub loading: bool,
    pub degraded: bool,
    pub error: Option<String>,
    pub revision: u64,
    pub task_count: usize,
}

struct SyncState {
    tasks: Vec<Task>,
    phase: SyncPhase,
    error: Option<String>,
    revision: u64,
}

type SharedSyncState = Arc<RwLock<SyncState>>;

enum Write<'a> {
    Put(&'a Task),
    PutAll(&'a [Task]),
    Remove(&'a str),
}

pub struct TaskSync {
    backend: Arc<dyn TaskBackend>,
    local: LocalStore,
    state: SharedSyncState,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl TaskSync {
    /// Load the initial task list and, for push backends, start listening.
    pub async fn mount(backend: Arc<dyn TaskBackend>, local: LocalStore) -> Self {
        let sync = Self {
            backend,
            local,
            state: Arc::new(RwLock::new(SyncState {
                tasks: Vec::new(),
                phase: SyncPhase::Loading,
                error: None,
                revision: 0,
            })),
            listener: Mutex::new(None),
        };

        match sync.backend.subscribe() {
            Some(feed) => sync.start_listener(feed),
            None => {
                if let Err(e) = sync.refetch().await {
                    sync.degrade(&e);
                }
            }
        }
        sync
    }

    // ── Reads ─────────────────────────────────────────────────────────

    pub fn tasks(&self) -> Vec<Task> {
        self.read_state().tasks.clone()
    }

    pub fn board(&self) -> BoardView {
        BoardView::from_tasks(&self.read_state().tasks)
    }

    pub fn status(&self) -> SyncStatus {
        let state = self.read_state();
        SyncStatus {
            phase: state.phase,
            backend: self.backend.kind(),
            loading: state.phase == SyncPhase::Loading,
            degraded: state.phase == SyncPhase::Degraded,
            error: state.error.clone(),
            revision: state.revision,
            task_count: state.tasks.len(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.read_state().phase == SyncPhase::Degraded
    }

    // ── Mutations ─────────────────────────────────────────────────────

    /// Create a task from `draft` and append it. A persist failure is
    /// recorded in the status but the task stays in the list.
    pub async fn add_task(&self, draft: TaskDraft) -> Result<Task, SyncError> {
        let mut task = draft.into_task()?;
        let now = Utc::now();
        task.created_at = Some(now);
        task.updated_at = Some(now);

        self.write_state().tasks.push(task.clone());
        tracing::debug!(id = %task.id, title = %task.title, "Task added");
        self.persist(Write::Put(&task)).await;
        Ok(task)
    }

    /// Replace the task with the same id. Unknown ids are rejected and leave
    /// the list untouched.
    pub async fn update_task(&self, mut task: Task) -> Result<Task, SyncError> {
        if task.title.trim().is_empty() {
            return Err(SyncError::Validation("Task title is required".into()));
        }
        {
            let mut state = self.write_state();
            let slot = state
                .tasks
                .iter_mut()
                .find(|t| t.id == task.id)
                .ok_or_else(|| SyncError::task_not_found(&task.id))?;
            task.created_at = task.created_at.or(slot.created_at);
            task.updated_at = Some(Utc::now());
            *slot = task.clone();
        }
        self.persist(Write::Put(&task)).await;
        Ok(task)
    }

    /// Remove the task with `id`. Absent ids are a no-op.
    pub async fn delete_task(&self, id: &str) -> Result<(), SyncError> {
        let removed = {
            let mut state = self.write_state();
            let before = state.tasks.len();
            state.tasks.retain(|t| t.id != id);
            state.tasks.len() != before
        };
        if removed {
            self.persist(Write::Remove(id)).await;
        }
        Ok(())
    }

    /// Bulk replace, used for reordering and column moves. Persists as a
    /// wholesale overwrite.
    pub async fn set_tasks(&self, next: Vec<Task>) -> Result<(), SyncError> {
        if let Some(bad) = next
            .iter()
            .find(|t| t.id.trim().is_empty() || t.title.trim().is_empty())
        {
            return Err(SyncError::Validation(format!(
                "Task '{}' needs a non-empty id and title",
                bad.id
            )));
        }
        self.write_state().tasks = next.clone();
        self.persist(Write::PutAll(&next)).await;
        Ok(())
    }

    /// Pull the full list from the backend. On success the hook is ready
    /// again and the local snapshot is refreshed.
    pub async fn refetch(&self) -> Result<(), BackendError> {
        let tasks = self.backend.fetch_all().await?;
        {
            let mut state = self.write_state();
            state.tasks = tasks;
            state.phase = SyncPhase::Ready;
            state.error = None;
        }
        self.mirror_local();
        Ok(())
    }

    /// Stop listening for pushed snapshots. Later snapshots are not applied.
    pub fn close(&self) {
        let handle = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    // ── Internals ─────────────────────────────────────────────────────

    fn read_state(&self) -> RwLockReadGuard<'_, SyncState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, SyncState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn degrade(&self, err: &BackendError) {
        tracing::warn!(backend = %self.backend.kind(), error = %err, "Backend unavailable, falling back to local storage");
        let tasks = self.local.load();
        let mut state = self.write_state();
        state.tasks = tasks;
        state.phase = SyncPhase::Degraded;
        state.error = Some(format!("Offline mode: using local storage ({})", err));
    }

    fn start_listener(&self, mut feed: SnapshotFeed<Task>) {
        let initial = feed.borrow_and_update().clone();
        {
            let mut state = self.write_state();
            state.tasks = initial.items;
            state.revision = initial.revision;
            state.phase = SyncPhase::Ready;
        }
        self.mirror_local();

        let state = Arc::clone(&self.state);
        let local = self.local.clone();
        let handle = tokio::spawn(async move {
            loop {
                if feed.changed().await.is_err() {
                    tracing::warn!("Task snapshot feed closed, falling back to local storage");
                    let mut state = state.write().unwrap_or_else(PoisonError::into_inner);
                    state.phase = SyncPhase::Degraded;
                    state.error = Some(BackendError::Closed.to_string());
                    break;
                }
                let snapshot = feed.borrow_and_update().clone();
                let applied = {
                    let mut state = state.write().unwrap_or_else(PoisonError::into_inner);
                    apply_snapshot(&mut state, snapshot)
                };
                if let Some(tasks) = applied
                    && let Err(e) = local.save(&tasks)
                {
                    tracing::warn!(error = %e, "Failed to mirror snapshot locally");
                }
            }
        });
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    async fn persist(&self, write: Write<'_>) {
        let degraded = self.is_degraded();
        if !degraded {
            let result = match write {
                Write::Put(task) => self.backend.put(task).await.map(|_| ()),
                Write::PutAll(tasks) => self.backend.put_all(tasks).await,
                Write::Remove(id) => self.backend.remove(id).await,
            };
            if let Err(e) = result {
                tracing::warn!(backend = %self.backend.kind(), error = %e, "Failed to persist task change");
                let mut state = self.write_state();
                state.error = Some(e.to_string());
                if e.is_unreachable() {
                    state.phase = SyncPhase::Degraded;
                }
            }
        }
        if degraded || self.backend.kind() != BackendKind::Local {
            self.mirror_local();
        }
    }

    fn mirror_local(&self) {
        let tasks = self.tasks();
        if let Err(e) = self.local.save(&tasks) {
            tracing::warn!(path = %self.local.path().display(), error = %e, "Failed to write local snapshot");
            let mut state = self.write_state();
            if state.phase == SyncPhase::Degraded {
                state.error = Some(e.to_string());
            }
        }
    }
}

impl Drop for TaskSync {
    fn drop(&mut self) {
        self.close();
    }
}

/// Replace the list with `snapshot` if it is newer than the last one applied.
/// Returns the applied list.
fn apply_snapshot(state: &mut SyncState, snapshot: Snapshot<Task>) -> Option<Vec<Task>> {
    if snapshot.revision <= state.revision {
        tracing::debug!(
            revision = snapshot.revision,
            current = state.revision,
            "Ignoring stale task snapshot"
        );
        return None;
    }
    state.revision = snapshot.revision;
    state.tasks = snapshot.items;
    if state.phase == SyncPhase::Loading {
        state.phase = SyncPhase::Ready;
    }
    Some(state.tasks.clone())
}

//! In-process job queue for the board's worker agents.
//!
//! [`AgentQueue`] is created at server start, shared through the app state,
//! and cleared at shutdown. A processor task started by [`spawn_processor`]
//! hands pending jobs to an [`AgentDispatcher`] one agent at a time.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::ws::{WsMessage, broadcast_message};

/// Expected run time of a job, used for the progress estimate.
const EXPECTED_RUN: Duration = Duration::from_secs(120);

/// Progress reported for a running job never exceeds this until it finishes.
const RUNNING_PROGRESS_CAP: u8 = 95;

// ── Agents ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentId {
    Backend,
    Frontend,
    Uiux,
    Orbit,
    Ceo,
}

impl AgentId {
    pub const ALL: [AgentId; 5] = [
        Self::Backend,
        Self::Frontend,
        Self::Uiux,
        Self::Orbit,
        Self::Ceo,
    ];

    /// Agents the processor dispatches work for.
    pub const WORKERS: [AgentId; 3] = [Self::Backend, Self::Frontend, Self::Uiux];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backend => "backend",
            Self::Frontend => "frontend",
            Self::Uiux => "uiux",
            Self::Orbit => "orbit",
            Self::Ceo => "ceo",
        }
    }

    pub fn model(&self) -> &'static str {
        match self {
            Self::Backend | Self::Frontend => "codex",
            Self::Uiux | Self::Orbit | Self::Ceo => "kimi",
        }
    }

    /// Design and orchestration agents run with extended reasoning.
    pub fn thinking(&self) -> bool {
        matches!(self, Self::Uiux | Self::Orbit)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "backend" => Ok(Self::Backend),
            "frontend" => Ok(Self::Frontend),
            "uiux" => Ok(Self::Uiux),
            "orbit" => Ok(Self::Orbit),
            "ceo" => Ok(Self::Ceo),
            _ => Err(format!("Unknown agent: {}", s)),
        }
    }
}

// ── Jobs ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    #[default]
    Code,
    Design,
    Research,
    Architecture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentJob {
    pub id: String,
    pub agent_id: AgentId,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub description: String,
    pub prompt: String,
    pub model: String,
    pub thinking: bool,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: Option<String>,
    pub agent_id: AgentId,
    pub kind: JobKind,
    pub description: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(String),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentActivity {
    Working,
    Pending,
    Idle,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub status: AgentActivity,
    pub current_task: Option<CurrentJob>,
    pub queued_count: usize,
    pub completed_count: usize,
}

/// A running job with its completion estimate.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentJob {
    #[serde(flatten)]
    pub job: AgentJob,
    pub progress: u8,
}

fn job_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("task-{}-{}", Utc::now().timestamp_millis(), &suffix[..9])
}

/// Completion estimate in percent. Running jobs advance with elapsed time
/// against a two-minute expectation and stay below 100 until finished.
pub fn progress(job: &AgentJob, now: DateTime<Utc>) -> u8 {
    match job.status {
        JobStatus::Completed => 100,
        JobStatus::Failed | JobStatus::Pending => 0,
        JobStatus::Running => match job.started_at {
            Some(started) => {
                let elapsed = (now - started).num_milliseconds().max(0) as f64;
                let pct = (elapsed / EXPECTED_RUN.as_millis() as f64 * 100.0).round();
                pct.min(RUNNING_PROGRESS_CAP as f64) as u8
            }
            None => 50,
        },
    }
}

// ── Queue ─────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct AgentQueue {
    jobs: Arc<Mutex<Vec<AgentJob>>>,
}

impl AgentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AgentJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a job as pending. A job with the same id is replaced.
    pub fn enqueue(&self, new: NewJob) -> AgentJob {
        let job = AgentJob {
            id: new
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(job_id),
            agent_id: new.agent_id,
            kind: new.kind,
            description: new.description,
            prompt: new.prompt,
            model: new.agent_id.model().to_string(),
            thinking: new.agent_id.thinking(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        };
        let mut jobs = self.lock();
        match jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job.clone(),
            None => jobs.push(job.clone()),
        }
        tracing::info!(id = %job.id, agent = %job.agent_id, model = %job.model, "Agent job queued");
        job
    }

    pub fn get(&self, id: &str) -> Option<AgentJob> {
        self.lock().iter().find(|j| j.id == id).cloned()
    }

    /// Oldest pending job for `agent`.
    pub fn next_pending(&self, agent: AgentId) -> Option<AgentJob> {
        self.lock()
            .iter()
            .find(|j| j.agent_id == agent && j.status == JobStatus::Pending)
            .cloned()
    }

    pub fn running_for(&self, agent: AgentId) -> Option<AgentJob> {
        self.lock()
            .iter()
            .find(|j| j.agent_id == agent && j.status == JobStatus::Running)
            .cloned()
    }

    pub fn jobs_for(&self, agent: AgentId) -> Vec<AgentJob> {
        self.lock()
            .iter()
            .filter(|j| j.agent_id == agent)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<AgentJob> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Mark a pending job as running. Returns `None` if it is not pending.
    pub fn start(&self, id: &str) -> Option<AgentJob> {
        let mut jobs = self.lock();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id && j.status == JobStatus::Pending)?;
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        Some(job.clone())
    }

    /// Record the outcome of a job. Returns `None` for unknown ids.
    pub fn finish(&self, id: &str, outcome: JobOutcome) -> Option<AgentJob> {
        let mut jobs = self.lock();
        let job = jobs.iter_mut().find(|j| j.id == id)?;
        job.completed_at = Some(Utc::now());
        match outcome {
            JobOutcome::Completed(result) => {
                job.status = JobStatus::Completed;
                job.result = Some(result);
            }
            JobOutcome::Failed(error) => {
                job.status = JobStatus::Failed;
                job.error = Some(error);
            }
        }
        Some(job.clone())
    }

    pub fn summary(&self) -> BTreeMap<AgentId, AgentSummary> {
        let jobs = self.lock();
        let now = Utc::now();
        AgentId::ALL
            .iter()
            .map(|agent| {
                let mine: Vec<&AgentJob> = jobs.iter().filter(|j| j.agent_id == *agent).collect();
                let current = mine
                    .iter()
                    .find(|j| j.status == JobStatus::Running)
                    .map(|j| CurrentJob {
                        job: (*j).clone(),
                        progress: progress(j, now),
                    });
                let queued = mine
                    .iter()
                    .filter(|j| j.status == JobStatus::Pending)
                    .count();
                let completed = mine
                    .iter()
                    .filter(|j| j.status == JobStatus::Completed)
                    .count();
                let status = if current.is_some() {
                    AgentActivity::Working
                } else if queued > 0 {
                    AgentActivity::Pending
                } else {
                    AgentActivity::Idle
                };
                (
                    *agent,
                    AgentSummary {
                        status,
                        current_task: current,
                        queued_count: queued,
                        completed_count: completed,
                    },
                )
            })
            .collect()
    }

    pub fn clear(&self) {
        let mut jobs = self.lock();
        if !jobs.is_empty() {
            tracing::info!(count = jobs.len(), "Clearing agent job queue");
        }
        jobs.clear();
    }
}

// ── Dispatch ──────────────────────────────────────────────────────────

/// Hands a job to whatever executes agent work.
/// Real implementation: `LogDispatcher`. Tests use scripted doubles.
#[async_trait]
pub trait AgentDispatcher: Send + Sync {
    /// Run `job` and return its result text.
    async fn dispatch(&self, job: &AgentJob) -> Result<String>;
}

/// Logs each job for an external executor to pick up.
pub struct LogDispatcher;

#[async_trait]
impl AgentDispatcher for LogDispatcher {
    async fn dispatch(&self, job: &AgentJob) -> Result<String> {
        let preview: String = job.prompt.chars().take(150).collect();
        tracing::info!(
            id = %job.id,
            agent = %job.agent_id,
            model = %job.model,
            thinking = job.thinking,
            label = %format!("{}-task", job.agent_id),
            prompt = %preview,
            "Agent job ready for execution"
        );
        Ok(format!("Handed off to {} executor", job.agent_id))
    }
}

/// Run one pass over the worker agents. Each idle agent gets its next
/// pending job dispatched. Returns how many jobs were dispatched.
pub async fn process_once(
    queue: &AgentQueue,
    dispatcher: &dyn AgentDispatcher,
    ws_tx: &broadcast::Sender<String>,
) -> usize {
    let mut dispatched = 0;
    for agent in AgentId::WORKERS {
        if queue.running_for(agent).is_some() {
            continue;
        }
        let Some(next) = queue.next_pending(agent) else {
            continue;
        };
        let Some(job) = queue.start(&next.id) else {
            continue;
        };
        let outcome = match dispatcher.dispatch(&job).await {
            Ok(result) => JobOutcome::Completed(result),
            Err(e) => {
                tracing::warn!(id = %job.id, agent = %agent, error = %e, "Agent job failed");
                JobOutcome::Failed(e.to_string())
            }
        };
        if let Some(finished) = queue.finish(&job.id, outcome) {
            broadcast_message(ws_tx, &WsMessage::AgentJobFinished { job: finished });
        }
        dispatched += 1;
    }
    dispatched
}

/// Tick every `interval` until the returned handle is aborted.
pub fn spawn_processor(
    queue: AgentQueue,
    dispatcher: Arc<dyn AgentDispatcher>,
    interval: Duration,
    ws_tx: broadcast::Sender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            process_once(&queue, dispatcher.as_ref(), &ws_tx).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_job(agent: AgentId, prompt: &str) -> NewJob {
        NewJob {
            id: None,
            agent_id: agent,
            kind: JobKind::Code,
            description: prompt.to_string(),
            prompt: prompt.to_string(),
        }
    }

    struct FailingDispatcher;

    #[async_trait]
    impl AgentDispatcher for FailingDispatcher {
        async fn dispatch(&self, _job: &AgentJob) -> Result<String> {
            anyhow::bail!("executor offline")
        }
    }

    #[test]
    fn test_agent_models() {
        assert_eq!(AgentId::Backend.model(), "codex");
        assert_eq!(AgentId::Frontend.model(), "codex");
        assert_eq!(AgentId::Uiux.model(), "kimi");
        assert_eq!(AgentId::Orbit.model(), "kimi");
        assert_eq!(AgentId::Ceo.model(), "kimi");
        assert!("robot".parse::<AgentId>().is_err());
    }

    #[test]
    fn test_enqueue_assigns_id_and_model() {
        let queue = AgentQueue::new();
        let job = queue.enqueue(new_job(AgentId::Uiux, "design login"));
        assert!(job.id.starts_with("task-"));
        assert_eq!(job.model, "kimi");
        assert!(job.thinking);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(queue.jobs_for(AgentId::Uiux).len(), 1);
        assert!(queue.jobs_for(AgentId::Backend).is_empty());
    }

    #[test]
    fn test_summary_states() {
        let queue = AgentQueue::new();
        let a = queue.enqueue(new_job(AgentId::Backend, "a"));
        queue.enqueue(new_job(AgentId::Backend, "b"));
        queue.enqueue(new_job(AgentId::Frontend, "c"));
        queue.start(&a.id).unwrap();

        let summary = queue.summary();
        assert_eq!(summary[&AgentId::Backend].status, AgentActivity::Working);
        assert_eq!(summary[&AgentId::Backend].queued_count, 1);
        assert_eq!(summary[&AgentId::Frontend].status, AgentActivity::Pending);
        assert_eq!(summary[&AgentId::Orbit].status, AgentActivity::Idle);
        assert_eq!(summary.len(), AgentId::ALL.len());
        assert!(summary[&AgentId::Frontend].current_task.is_none());

        let current = summary[&AgentId::Backend].current_task.as_ref().unwrap();
        assert_eq!(current.job.id, a.id);
        assert!(current.progress <= RUNNING_PROGRESS_CAP);
        let json = serde_json::to_value(&summary[&AgentId::Backend]).unwrap();
        assert_eq!(json["currentTask"]["id"], a.id.as_str());
        assert_eq!(json["currentTask"]["status"], "RUNNING");
        assert!(json["currentTask"]["progress"].is_u64());
    }

    #[test]
    fn test_start_only_pending() {
        let queue = AgentQueue::new();
        let job = queue.enqueue(new_job(AgentId::Backend, "a"));
        assert!(queue.start(&job.id).is_some());
        assert!(queue.start(&job.id).is_none());
        assert!(queue.start("missing").is_none());
    }

    #[test]
    fn test_progress_estimate() {
        let queue = AgentQueue::new();
        let job = queue.enqueue(new_job(AgentId::Backend, "a"));
        let now = Utc::now();
        assert_eq!(progress(&job, now), 0);

        let running = queue.start(&job.id).unwrap();
        let started = running.started_at.unwrap();
        assert_eq!(progress(&running, started + chrono::Duration::seconds(60)), 50);
        assert_eq!(progress(&running, started + chrono::Duration::minutes(10)), 95);

        let done = queue
            .finish(&job.id, JobOutcome::Completed("ok".into()))
            .unwrap();
        assert_eq!(progress(&done, now), 100);
    }

    #[tokio::test]
    async fn test_process_once_dispatches_one_job_per_worker() {
        let queue = AgentQueue::new();
        let (tx, mut rx) = broadcast::channel(16);
        queue.enqueue(new_job(AgentId::Backend, "a"));
        queue.enqueue(new_job(AgentId::Backend, "b"));
        queue.enqueue(new_job(AgentId::Orbit, "not a worker"));

        let n = process_once(&queue, &LogDispatcher, &tx).await;
        assert_eq!(n, 1);
        let backend = queue.jobs_for(AgentId::Backend);
        assert_eq!(backend[0].status, JobStatus::Completed);
        assert_eq!(backend[1].status, JobStatus::Pending);
        assert_eq!(
            queue.jobs_for(AgentId::Orbit)[0].status,
            JobStatus::Pending
        );

        let msg = rx.recv().await.unwrap();
        assert!(msg.contains("AgentJobFinished"));
    }

    #[tokio::test]
    async fn test_dispatch_failure_marks_job_failed() {
        let queue = AgentQueue::new();
        let (tx, _) = broadcast::channel(16);
        let job = queue.enqueue(new_job(AgentId::Frontend, "a"));
        process_once(&queue, &FailingDispatcher, &tx).await;
        let failed = queue.get(&job.id).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("executor offline"));
        assert!(failed.completed_at.is_some());
    }

    #[test]
    fn test_clear_empties_queue() {
        let queue = AgentQueue::new();
        queue.enqueue(new_job(AgentId::Backend, "a"));
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_job_wire_format() {
        let queue = AgentQueue::new();
        let job = queue.enqueue(new_job(AgentId::Backend, "a"));
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["agentId"], "backend");
        assert_eq!(json["type"], "CODE");
        assert_eq!(json["status"], "PENDING");
    }
}

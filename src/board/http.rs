//! Pull-based client for the `/api/tasks` surface of a running board server.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use super::backend::{BackendKind, TaskBackend};
use super::migrate::migrate_tasks;
use super::models::{Task, TaskDraft};
use crate::errors::BackendError;

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    tasks_url: String,
}

#[derive(Deserialize)]
struct TasksEnvelope {
    #[serde(default)]
    tasks: Value,
}

#[derive(Deserialize)]
struct TaskEnvelope {
    task: Task,
}

impl HttpBackend {
    /// `server_url` is the server root, e.g. `http://127.0.0.1:3000`.
    pub fn new(server_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            tasks_url: format!("{}/api/tasks", server_url.trim_end_matches('/')),
        }
    }

    pub fn tasks_url(&self) -> &str {
        &self.tasks_url
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(body);
        Err(BackendError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl TaskBackend for HttpBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Http
    }

    async fn fetch_all(&self) -> Result<Vec<Task>, BackendError> {
        let resp = self.client.get(&self.tasks_url).send().await?;
        let envelope: TasksEnvelope = Self::check(resp).await?.json().await?;
        Ok(migrate_tasks(envelope.tasks))
    }

    async fn put(&self, task: &Task) -> Result<Task, BackendError> {
        let task = TaskDraft::from(task);
        let resp = self
            .client
            .put(&self.tasks_url)
            .json(&json!({ "task": task }))
            .send()
            .await?;
        // Unknown ids are created instead.
        let resp = if resp.status() == StatusCode::NOT_FOUND {
            self.client
                .post(&self.tasks_url)
                .json(&json!({ "task": task }))
                .send()
                .await?
        } else {
            resp
        };
        let envelope: TaskEnvelope = Self::check(resp).await?.json().await?;
        Ok(envelope.task)
    }

    async fn put_all(&self, tasks: &[Task]) -> Result<(), BackendError> {
        let resp = self
            .client
            .put(&self.tasks_url)
            .json(&json!({ "tasks": tasks }))
            .send()
            .await?;
        Self::check(resp).await.map(|_| ())
    }

    async fn remove(&self, id: &str) -> Result<(), BackendError> {
        let resp = self
            .client
            .delete(&self.tasks_url)
            .json(&json!({ "id": id }))
            .send()
            .await?;
        Self::check(resp).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tasks_url_trims_trailing_slash() {
        let backend = HttpBackend::new("http://localhost:3000/");
        assert_eq!(backend.tasks_url(), "http://localhost:3000/api/tasks");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_typed_failure() {
        let backend = HttpBackend::new("http://127.0.0.1:1");
        let err = backend.fetch_all().await.unwrap_err();
        assert!(err.is_unreachable(), "got {:?}", err);
    }
}

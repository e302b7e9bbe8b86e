use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;

use super::agents::{AgentId, AgentQueue, JobKind, NewJob};
use super::collection::Collection;
use super::inbox::{InboxFile, InboxRequest};
use super::kv::KvBackend;
use super::models::{BoardView, Document, DocumentDraft, DocumentPatch, Task, TaskDraft};
use super::ws::{WsMessage, broadcast_message};
use crate::errors::{BackendError, SyncError};

/// Header carrying the shared secret for `/api/add-task`.
pub const AUTH_HEADER: &str = "x-auth-token";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub tasks: Arc<KvBackend>,
    pub documents: Arc<Collection<Document>>,
    pub inbox: InboxFile,
    pub agents: AgentQueue,
    pub api_secret: Option<String>,
    pub ws_tx: broadcast::Sender<String>,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub task: Option<TaskDraft>,
}

#[derive(Deserialize)]
pub struct UpdateTasksRequest {
    pub task: Option<TaskDraft>,
    pub tasks: Option<Vec<Task>>,
}

#[derive(Deserialize)]
pub struct DeleteTaskRequest {
    pub id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub task_id: Option<String>,
    pub agent_id: Option<String>,
    pub prompt: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<JobKind>,
    pub description: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    NotFound(String),
    MethodNotAllowed,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                "Method not allowed".to_string(),
            ),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Validation(msg) => ApiError::BadRequest(msg),
            SyncError::Unauthorized => ApiError::Unauthorized,
            err @ SyncError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            err => {
                tracing::error!(error = %err, "Request failed");
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        SyncError::from(err).into()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route(
            "/api/tasks",
            get(list_tasks)
                .post(create_task)
                .put(update_tasks)
                .delete(delete_task)
                .options(options_ok)
                .fallback(method_not_allowed),
        )
        .route(
            "/api/board",
            get(get_board)
                .options(options_ok)
                .fallback(method_not_allowed),
        )
        .route(
            "/api/add-task",
            post(add_inbox_task)
                .options(options_ok)
                .fallback(method_not_allowed),
        )
        .route(
            "/api/documents",
            get(list_documents)
                .post(create_document)
                .options(options_ok)
                .fallback(method_not_allowed),
        )
        .route(
            "/api/documents/{id}",
            get(get_document)
                .put(update_document)
                .delete(delete_document)
                .options(options_ok)
                .fallback(method_not_allowed),
        )
        .route(
            "/api/agents/execute",
            post(execute_agent_job)
                .options(options_ok)
                .fallback(method_not_allowed),
        )
        .route(
            "/api/agents/status",
            get(agent_status)
                .options(options_ok)
                .fallback(method_not_allowed),
        )
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

/// Bare `OPTIONS` without CORS preflight headers.
async fn options_ok() -> StatusCode {
    StatusCode::OK
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

async fn list_tasks(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let tasks = state.tasks.list().await?;
    Ok(Json(json!({ "tasks": tasks })))
}

async fn create_task(
    State(state): State<SharedState>,
    payload: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let draft = req
        .task
        .ok_or_else(|| ApiError::BadRequest("Task data required".into()))?;
    let task = state.tasks.create(draft).await?;
    broadcast_message(&state.ws_tx, &WsMessage::TaskCreated { task: task.clone() });
    Ok((StatusCode::CREATED, Json(json!({ "task": task }))))
}

async fn update_tasks(
    State(state): State<SharedState>,
    payload: Result<Json<UpdateTasksRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;

    if let Some(tasks) = req.tasks {
        if let Some(bad) = tasks
            .iter()
            .find(|t| t.id.trim().is_empty() || t.title.trim().is_empty())
        {
            return Err(ApiError::BadRequest(format!(
                "Task '{}' needs a non-empty id and title",
                bad.id
            )));
        }
        state.tasks.replace_all(&tasks).await?;
        broadcast_message(
            &state.ws_tx,
            &WsMessage::TasksReplaced {
                tasks: tasks.clone(),
            },
        );
        return Ok(Json(json!({ "tasks": tasks })));
    }

    let draft = req
        .task
        .ok_or_else(|| ApiError::BadRequest("Task ID required".into()))?;
    let task = state.tasks.update(draft).await?;
    broadcast_message(&state.ws_tx, &WsMessage::TaskUpdated { task: task.clone() });
    Ok(Json(json!({ "task": task })))
}

async fn delete_task(
    State(state): State<SharedState>,
    payload: Result<Json<DeleteTaskRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let id = req
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Task ID required".into()))?;
    if state.tasks.delete(&id).await? {
        broadcast_message(&state.ws_tx, &WsMessage::TaskDeleted { task_id: id });
    }
    Ok(Json(json!({ "success": true })))
}

async fn get_board(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let tasks = state.tasks.list().await?;
    Ok(Json(BoardView::from_tasks(&tasks)))
}

async fn add_inbox_task(
    State(state): State<SharedState>,
    headers: HeaderMap,
    payload: Result<Json<InboxRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let supplied = headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok());
    match (&state.api_secret, supplied) {
        (Some(secret), Some(token)) if secret == token => {}
        _ => return Err(ApiError::Unauthorized),
    }

    let Json(req) = payload?;
    let (task, total) = state.inbox.append(req).await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::InboxTaskAdded {
            task_id: task.id.clone(),
            title: task.title.clone(),
        },
    );
    Ok(Json(json!({
        "success": true,
        "task": task,
        "totalTasks": total,
    })))
}

async fn list_documents(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let mut documents = state.documents.list()?;
    documents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(json!({ "documents": documents })))
}

async fn create_document(
    State(state): State<SharedState>,
    payload: Result<Json<DocumentDraft>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(draft) = payload?;
    let document = draft.into_document(Utc::now())?;
    let document = state.documents.upsert(document)?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::DocumentCreated {
            document: document.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(document)))
}

async fn get_document(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.documents.get(&id)? {
        Some(document) => Ok(Json(document)),
        None => Err(SyncError::document_not_found(id).into()),
    }
}

async fn update_document(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    payload: Result<Json<DocumentPatch>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(patch) = payload?;
    if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(ApiError::BadRequest("Document title cannot be empty".into()));
    }
    let document = state
        .documents
        .update(&id, |doc| doc.apply_patch(&patch))?
        .ok_or_else(|| SyncError::document_not_found(&id))?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::DocumentUpdated {
            document: document.clone(),
        },
    );
    Ok(Json(document))
}

async fn delete_document(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.documents.remove(&id)? {
        broadcast_message(&state.ws_tx, &WsMessage::DocumentDeleted { document_id: id });
    }
    Ok(Json(json!({ "message": "Document deleted" })))
}

async fn execute_agent_job(
    State(state): State<SharedState>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let (Some(agent), Some(prompt)) = (
        req.agent_id.filter(|a| !a.trim().is_empty()),
        req.prompt.filter(|p| !p.trim().is_empty()),
    ) else {
        return Err(ApiError::BadRequest("Missing required fields".into()));
    };
    let agent_id: AgentId = agent.parse().map_err(ApiError::BadRequest)?;

    let job = state.agents.enqueue(NewJob {
        id: req.task_id,
        agent_id,
        kind: req.kind.unwrap_or_default(),
        description: req.description.unwrap_or_else(|| prompt.clone()),
        prompt,
    });
    broadcast_message(&state.ws_tx, &WsMessage::AgentJobQueued { job: job.clone() });

    Ok(Json(json!({
        "success": true,
        "taskId": job.id,
        "agentId": job.agent_id,
        "status": "QUEUED",
        "message": format!("Task queued for {}. Processing...", job.agent_id),
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

async fn agent_status(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "agents": state.agents.summary(),
        "totalTasks": state.agents.len(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────

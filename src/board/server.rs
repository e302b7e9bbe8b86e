use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;

use super::agents::{AgentQueue, LogDispatcher, spawn_processor};
use super::api::{self, AppState, SharedState};
use super::collection::Collection;
use super::inbox::InboxFile;
use super::kv::{FileKv, KvBackend, KvStore, MemoryKv, RestKv};
use super::ws;
use crate::config::{BoardConfig, KvKind};

/// File holding the document collection inside the data directory.
pub const DOCUMENTS_FILE: &str = "documents.json";

/// Directory holding the file-backed key-value store.
pub const KV_DIR: &str = "kv";

/// Configuration for the board server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub dev_mode: bool,
    pub data_dir: PathBuf,
    pub kv: KvKind,
    pub tasks_key: String,
    pub api_secret: Option<String>,
    pub kv_rest: Option<(String, String)>,
    pub agent_poll_interval: Duration,
    pub open_browser: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3141,
            dev_mode: false,
            data_dir: PathBuf::from(crate::config::CONFIG_DIR),
            kv: KvKind::File,
            tasks_key: super::kv::DEFAULT_TASKS_KEY.to_string(),
            api_secret: None,
            kv_rest: None,
            agent_poll_interval: Duration::from_secs(5),
            open_browser: false,
        }
    }
}

impl ServerConfig {
    pub fn from_config(config: &BoardConfig) -> Self {
        let toml = &config.toml;
        Self {
            host: toml.server.host.clone(),
            port: toml.server.port,
            dev_mode: toml.server.dev,
            data_dir: toml.storage.data_dir.clone(),
            kv: toml.storage.kv,
            tasks_key: toml.storage.tasks_key.clone(),
            api_secret: config.secrets.api_secret.clone(),
            kv_rest: config
                .secrets
                .kv_rest()
                .map(|(url, token)| (url.to_string(), token.to_string())),
            agent_poll_interval: config.agent_poll_interval(),
            open_browser: false,
        }
    }

    /// The key-value store selected by `kv`.
    pub fn kv_store(&self) -> Result<Arc<dyn KvStore>> {
        Ok(match self.kv {
            KvKind::File => Arc::new(FileKv::new(self.data_dir.join(KV_DIR))),
            KvKind::Memory => Arc::new(MemoryKv::new()),
            KvKind::Rest => {
                let (url, token) = self.kv_rest.as_ref().context(
                    "storage.kv is 'rest' but KV_REST_API_URL or KV_REST_API_TOKEN is not set",
                )?;
                Arc::new(RestKv::new(url.as_str(), token.as_str()))
            }
        })
    }
}

/// Build the shared state: task store, document collection, inbox, agent
/// queue and change-feed channel.
pub fn build_state(config: &ServerConfig) -> Result<SharedState> {
    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            config.data_dir.display()
        )
    })?;

    let (ws_tx, _rx) = broadcast::channel::<String>(256);
    Ok(Arc::new(AppState {
        tasks: Arc::new(KvBackend::new(config.kv_store()?, config.tasks_key.as_str())),
        documents: Arc::new(Collection::open(&config.data_dir.join(DOCUMENTS_FILE))),
        inbox: InboxFile::in_dir(&config.data_dir),
        agents: AgentQueue::new(),
        api_secret: config.api_secret.clone(),
        ws_tx,
    }))
}

/// Build the full application router with API and WebSocket routes.
pub fn build_router(state: SharedState) -> Router {
    let ws_tx = state.ws_tx.clone();

    api::api_router()
        .route(
            "/ws",
            get(move |ws_upgrade| ws::ws_handler_with_sender(ws_upgrade, ws_tx)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the board server and run until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let state = build_state(&config)?;
    let processor = spawn_processor(
        state.agents.clone(),
        Arc::new(LogDispatcher),
        config.agent_poll_interval,
        state.ws_tx.clone(),
    );

    let app = build_router(Arc::clone(&state));

    let host = if config.dev_mode {
        "0.0.0.0"
    } else {
        config.host.as_str()
    };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    let url = format!("http://{}", local_addr);
    tracing::info!(
        %url,
        kv = %config.kv,
        data_dir = %config.data_dir.display(),
        "Mission Board server started"
    );
    println!("Mission Board running at {}", url);
    if config.api_secret.is_none() {
        tracing::warn!("API_SECRET is not set; /api/add-task will reject every request");
    }

    if config.open_browser
        && let Err(e) = open::that(&url)
    {
        tracing::warn!(error = %e, "Failed to open browser");
    }

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    processor.abort();
    state.agents.clear();
    println!("Server shut down gracefully.");
    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}

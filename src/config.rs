//! Layered configuration for Mission Board.
//!
//! Settings come from `.mission-board/board.toml`, then environment variables,
//! then CLI flags. Every section is optional.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! dev = false
//!
//! [storage]
//! data_dir = ".mission-board"
//! kv = "file"            # file | memory | rest
//! tasks_key = "mission-board:tasks"
//!
//! [sync]
//! backend = "http"       # http | kv | collection | local
//! server_url = "http://127.0.0.1:3141"
//!
//! [agents]
//! poll_interval_secs = 5
//! ```
//!
//! Secrets (`API_SECRET`, `KV_REST_API_URL`, `KV_REST_API_TOKEN`) are only ever
//! read from the environment or `.env`. They are never written to the file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::board::backend::BackendKind;
use crate::board::kv::DEFAULT_TASKS_KEY;

pub const CONFIG_DIR: &str = ".mission-board";
pub const CONFIG_FILE: &str = "board.toml";

pub const ENV_PORT: &str = "MISSION_BOARD_PORT";
pub const ENV_HOST: &str = "MISSION_BOARD_HOST";
pub const ENV_DATA_DIR: &str = "MISSION_BOARD_DATA_DIR";
pub const ENV_BACKEND: &str = "MISSION_BOARD_BACKEND";
pub const ENV_SERVER_URL: &str = "MISSION_BOARD_SERVER_URL";
pub const ENV_API_SECRET: &str = "API_SECRET";
pub const ENV_KV_REST_URL: &str = "KV_REST_API_URL";
pub const ENV_KV_REST_TOKEN: &str = "KV_REST_API_TOKEN";

/// Which key-value store the server keeps its task array in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KvKind {
    /// One JSON file per key under the data directory.
    #[default]
    File,
    /// Process memory; lost on restart.
    Memory,
    /// Upstash-compatible REST endpoint, credentials from the environment.
    Rest,
}

impl fmt::Display for KvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KvKind::File => write!(f, "file"),
            KvKind::Memory => write!(f, "memory"),
            KvKind::Rest => write!(f, "rest"),
        }
    }
}

impl FromStr for KvKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(KvKind::File),
            "memory" => Ok(KvKind::Memory),
            "rest" => Ok(KvKind::Rest),
            _ => anyhow::bail!("Invalid kv store '{}'. Valid values: file, memory, rest", s),
        }
    }
}

// ── Sections ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind on all interfaces.
    #[serde(default)]
    pub dev: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub kv: KvKind,
    #[serde(default = "default_tasks_key")]
    pub tasks_key: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(CONFIG_DIR)
}

fn default_tasks_key() -> String {
    DEFAULT_TASKS_KEY.to_string()
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            kv: KvKind::default(),
            tasks_key: default_tasks_key(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSection {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_server_url")]
    pub server_url: String,
}

fn default_server_url() -> String {
    format!("http://127.0.0.1:{}", default_port())
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            server_url: default_server_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentsSection {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    5
}

impl Default for AgentsSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

/// Contents of `board.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub agents: AgentsSection,
}

impl BoardToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse board.toml")
    }

    /// Defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize board.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `MISSION_BOARD_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any variable lookup. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = get(ENV_PORT) {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("{} must be a port number, got '{}'", ENV_PORT, port))?;
        }
        if let Some(host) = get(ENV_HOST) {
            self.server.host = host;
        }
        if let Some(dir) = get(ENV_DATA_DIR) {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(backend) = get(ENV_BACKEND) {
            self.sync.backend = backend
                .parse()
                .with_context(|| format!("Invalid {}", ENV_BACKEND))?;
        }
        if let Some(url) = get(ENV_SERVER_URL) {
            self.sync.server_url = url;
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0: the OS will pick a random port".to_string());
        }
        if self.storage.tasks_key.trim().is_empty() {
            warnings.push("storage.tasks_key is empty".to_string());
        }
        if self.sync.backend == BackendKind::Http
            && !(self.sync.server_url.starts_with("http://")
                || self.sync.server_url.starts_with("https://"))
        {
            warnings.push(format!(
                "sync.server_url '{}' is not an http(s) URL",
                self.sync.server_url
            ));
        }
        if self.agents.poll_interval_secs == 0 {
            warnings.push("agents.poll_interval_secs is 0: using 1 second".to_string());
        }

        warnings
    }
}

// ── Secrets ───────────────────────────────────────────────────────────

/// Credentials read from the environment only.
#[derive(Clone, Default)]
pub struct Secrets {
    pub api_secret: Option<String>,
    pub kv_rest_url: Option<String>,
    pub kv_rest_token: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            api_secret: get(ENV_API_SECRET),
            kv_rest_url: get(ENV_KV_REST_URL),
            kv_rest_token: get(ENV_KV_REST_TOKEN),
        }
    }

    /// REST credentials, when both halves are present.
    pub fn kv_rest(&self) -> Option<(&str, &str)> {
        Some((self.kv_rest_url.as_deref()?, self.kv_rest_token.as_deref()?))
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<set>");
        f.debug_struct("Secrets")
            .field("api_secret", &redact(&self.api_secret))
            .field("kv_rest_url", &self.kv_rest_url)
            .field("kv_rest_token", &redact(&self.kv_rest_token))
            .finish()
    }
}

// ── Resolved configuration ────────────────────────────────────────────

/// File, environment and CLI settings merged.
#[derive(Debug, Clone)]
pub struct BoardConfig {
    pub config_path: PathBuf,
    pub toml: BoardToml,
    pub secrets: Secrets,
    pub verbose: bool,
}

impl BoardConfig {
    /// Resolve configuration from `config_path` (default
    /// `.mission-board/board.toml`), the environment, then CLI overrides.
    pub fn load(
        config_path: Option<PathBuf>,
        data_dir: Option<PathBuf>,
        verbose: bool,
    ) -> Result<Self> {
        let config_path = config_path.unwrap_or_else(default_config_path);
        let mut toml = BoardToml::load_or_default(&config_path)?;
        toml.apply_env()?;
        if let Some(dir) = data_dir {
            toml.storage.data_dir = dir;
        }
        Ok(Self {
            config_path,
            toml,
            secrets: Secrets::from_env(),
            verbose,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.toml.storage.data_dir
    }

    pub fn agent_poll_interval(&self) -> Duration {
        Duration::from_secs(self.toml.agents.poll_interval_secs.max(1))
    }

    /// File warnings plus warnings about missing secrets.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.toml.validate();
        if self.toml.storage.kv == KvKind::Rest && self.secrets.kv_rest().is_none() {
            warnings.push(format!(
                "storage.kv is 'rest' but {} or {} is not set",
                ENV_KV_REST_URL, ENV_KV_REST_TOKEN
            ));
        }
        if self.secrets.api_secret.is_none() {
            warnings.push(format!(
                "{} is not set: /api/add-task will reject every request",
                ENV_API_SECRET
            ));
        }
        warnings
    }
}

pub fn default_config_path() -> PathBuf {
    Path::new(CONFIG_DIR).join(CONFIG_FILE)
}

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::models::Task;
use crate::errors::BackendError;

/// Which store a [`TaskBackend`] talks to. Selected by `sync.backend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Document collection with a live snapshot feed.
    Collection,
    /// Key-value store, read-modify-write of one stored array.
    Kv,
    /// Task REST surface of a running server (pull-based).
    #[default]
    Http,
    /// On-device snapshot file only.
    Local,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Collection => write!(f, "collection"),
            BackendKind::Kv => write!(f, "kv"),
            BackendKind::Http => write!(f, "http"),
            BackendKind::Local => write!(f, "local"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "collection" => Ok(BackendKind::Collection),
            "kv" => Ok(BackendKind::Kv),
            "http" => Ok(BackendKind::Http),
            "local" => Ok(BackendKind::Local),
            _ => anyhow::bail!(
                "Invalid backend '{}'. Valid values: collection, kv, http, local",
                s
            ),
        }
    }
}

/// A full copy of a collection at one server revision.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub revision: u64,
    pub items: Vec<T>,
}

/// Receiving end of a snapshot feed. Dropping it unsubscribes.
pub type SnapshotFeed<T> = watch::Receiver<Snapshot<T>>;

/// Capability interface shared by every task store.
///
/// Real implementations: `CollectionBackend`, `KvBackend`, `HttpBackend`,
/// `LocalStore`. Tests use failing doubles to drive degraded mode.
#[async_trait]
pub trait TaskBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn fetch_all(&self) -> Result<Vec<Task>, BackendError>;

    /// Insert or replace one task; returns the stored copy.
    async fn put(&self, task: &Task) -> Result<Task, BackendError>;

    /// Replace the whole stored collection with `tasks`, in order.
    async fn put_all(&self, tasks: &[Task]) -> Result<(), BackendError>;

    async fn remove(&self, id: &str) -> Result<(), BackendError>;

    /// Live snapshot feed, for backends that push changes.
    fn subscribe(&self) -> Option<SnapshotFeed<Task>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_round_trip_through_str() {
        for kind in [
            BackendKind::Collection,
            BackendKind::Kv,
            BackendKind::Http,
            BackendKind::Local,
        ] {
            assert_eq!(kind.to_string().parse::<BackendKind>().unwrap(), kind);
        }
        assert!("firestore".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_backend_kind_default_is_http() {
        assert_eq!(BackendKind::default(), BackendKind::Http);
    }
}

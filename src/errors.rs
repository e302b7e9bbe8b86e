//! Typed error hierarchy for Mission Board.
//!
//! Three enums cover the three layers:
//! - `BackendError`: remote store client failures (collection, key-value, HTTP)
//! - `StoreError`: local snapshot file failures
//! - `SyncError`: what the synchronization hooks and the HTTP surface report

use std::path::PathBuf;

use thiserror::Error;

/// Errors from a remote store client.
///
/// Every network or parse failure is converted into one of these variants so
/// the consuming hook can decide whether to fall back to local storage.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    #[error("Backend rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed backend payload: {0}")]
    Malformed(String),

    #[error("Subscription closed")]
    Closed,

    #[error("Backend I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BackendError {
    /// True when the failure means the backend cannot be reached at all,
    /// as opposed to a request it understood and refused.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            BackendError::Unreachable(_) | BackendError::Closed | BackendError::Io { .. }
        )
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            BackendError::Rejected {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            BackendError::Unreachable(err.to_string())
        }
    }
}

impl From<StoreError> for BackendError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::WriteFailed { path, source } => BackendError::Io { path, source },
            StoreError::Serialize(e) => BackendError::Malformed(e.to_string()),
        }
    }
}

/// Errors from the local snapshot file.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to write local snapshot at {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize local snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors reported by the synchronization hooks and the HTTP surface.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(#[from] BackendError),

    #[error("Malformed data: {0}")]
    MalformedData(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    pub fn task_not_found(id: impl Into<String>) -> Self {
        SyncError::NotFound {
            entity: "Task",
            id: id.into(),
        }
    }

    pub fn document_not_found(id: impl Into<String>) -> Self {
        SyncError::NotFound {
            entity: "Document",
            id: id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_unreachable_classification() {
        assert!(BackendError::Unreachable("connection refused".into()).is_unreachable());
        assert!(BackendError::Closed.is_unreachable());
        assert!(
            !BackendError::Rejected {
                status: 404,
                message: "Task not found".into()
            }
            .is_unreachable()
        );
        assert!(!BackendError::Malformed("bad json".into()).is_unreachable());
    }

    #[test]
    fn sync_error_not_found_carries_id() {
        let err = SyncError::task_not_found("1700000000000-ab12cd");
        match &err {
            SyncError::NotFound { entity, id } => {
                assert_eq!(*entity, "Task");
                assert_eq!(id, "1700000000000-ab12cd");
            }
            _ => panic!("Expected NotFound"),
        }
        assert!(err.to_string().contains("1700000000000-ab12cd"));
    }

    #[test]
    fn sync_error_converts_from_backend_error() {
        let err: SyncError = BackendError::Closed.into();
        assert!(matches!(
            err,
            SyncError::BackendUnavailable(BackendError::Closed)
        ));
    }

    #[test]
    fn store_error_display_includes_path() {
        let err = StoreError::WriteFailed {
            path: PathBuf::from("/data/mission-board-tasks-backup.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("mission-board-tasks-backup.json"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&BackendError::Closed);
        assert_std_error(&SyncError::Unauthorized);
        assert_std_error(&StoreError::Serialize(
            serde_json::from_str::<u8>("x").unwrap_err(),
        ));
    }
}

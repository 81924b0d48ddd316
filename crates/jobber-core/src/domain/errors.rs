//! Errors - エラー型と分類
//!
//! - **ValidationError**: 投入時の検証エラー（即座に呼び出し元へ、リトライなし）
//! - **StoreError**: 永続化層の障害（呼び出し元へ伝播、バックグラウンドではログのみ）
//! - **JobberError**: 公開 API の合成エラー
//!
//! Lock conflicts are not errors: `lock` / `update_trial` return `false`.

use thiserror::Error;

use super::TaskHash;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("queue '{0}' not found on priority list")]
    QueueNotFound(String),

    #[error("task type '{0}' is not invocable: no handler registered")]
    NotInvocable(String),

    #[error("invalid task arguments: {0}")]
    InvalidArgs(String),

    #[error("queue scheduling algorithm '{0}' not supported")]
    UnsupportedAlgorithm(String),
}

/// Backend failure. Never retried inside the store layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(TaskHash),

    #[error("store configuration error: {0}")]
    Configuration(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("store serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(e) => StoreError::Configuration(e.to_string()),
            sqlx::Error::Io(e) => StoreError::Unavailable(e.to_string()),
            sqlx::Error::PoolTimedOut => StoreError::Unavailable("connection pool timed out".into()),
            sqlx::Error::PoolClosed => StoreError::Unavailable("connection pool closed".into()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Error surface of the `Jobber` handle.
#[derive(Debug, Error)]
pub enum JobberError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("scheduler has been shut down")]
    ShutDown,
}

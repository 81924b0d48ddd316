//! Handler trait - Task を実行する Handler の定義
//!
//! - ジェネリック trait (`Handler<T>`)
//! - Object-safe trait (`DynHandler`)
//! - Type erasure (`TypedHandler<T, H>` → `DynHandler`)

use std::marker::PhantomData;

use async_trait::async_trait;
use thiserror::Error;

use super::task::{Task, decode_args};
use crate::domain::Arg;

/// Handler は Task を実行する
///
/// `Err` は「この試行は失敗した」を意味し、worker が残りの retry 予算に応じて
/// RETRY_THIS / FAIL_THIS を決めます。
///
/// # 使用例
/// ```ignore
/// struct TranscodeHandler;
///
/// #[async_trait]
/// impl Handler<Transcode> for TranscodeHandler {
///     async fn handle(&self, task: Transcode) -> anyhow::Result<()> {
///         println!("transcoding {} at {}", task.0, task.1);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, task: T) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum HandlerError {
    /// Stored arguments do not fit the handler's task type. Never retried.
    #[error("cannot decode arguments for '{task_type}': {reason}")]
    Decode { task_type: String, reason: String },

    #[error("handler failed: {0:#}")]
    Failed(anyhow::Error),
}

/// DynHandler は object-safe な Handler の抽象化
///
/// `HashMap<String, Arc<dyn DynHandler>>` に格納するための型消去層です。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, args: &[Arg]) -> Result<(), HandlerError>;
    fn task_type(&self) -> &str;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn(T)>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(&self, args: &[Arg]) -> Result<(), HandlerError> {
        let task: T = decode_args(args).map_err(|e| HandlerError::Decode {
            task_type: T::TYPE.to_string(),
            reason: e.to_string(),
        })?;
        self.handler.handle(task).await.map_err(HandlerError::Failed)
    }

    fn task_type(&self) -> &str {
        T::TYPE
    }
}

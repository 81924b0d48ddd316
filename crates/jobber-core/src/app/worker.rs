//! Worker - 1 件ずつ task を実行する execution context
//!
//! # 設計原則
//! - 受信は JSON の `DispatchMessage` フレーム、送信は `Signal` トークンのみ
//! - handler の生のエラーはチャネルを越えない（分類だけを返す）
//! - 1 メッセージずつ処理する。scheduler は結果を受け取るまで次を送らない
//! - handler の panic は捕まえない。task ごと終了し、supervisor が crash として扱う

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::{DispatchMessage, ProtocolError, Signal, allows_retry};
use crate::typed::{HandlerError, TypedRegistry};

/// Run one dispatch attempt and classify the result.
pub async fn execute(registry: &TypedRegistry, message: &DispatchMessage) -> Signal {
    let Some(handler) = registry.get(message.payload.as_str()) else {
        warn!(
            tag = %message.tag,
            hash = %message.hash,
            payload = %message.payload,
            "no handler registered for payload"
        );
        return Signal::FailThis;
    };

    match handler.handle_dyn(&message.args).await {
        Ok(()) => Signal::MoveNext,
        Err(err @ HandlerError::Decode { .. }) => {
            warn!(tag = %message.tag, hash = %message.hash, error = %err, "task arguments rejected");
            Signal::FailThis
        }
        Err(HandlerError::Failed(err)) if allows_retry(message.trial, message.max_retry) => {
            warn!(
                tag = %message.tag,
                hash = %message.hash,
                trial = message.trial,
                max_retry = message.max_retry,
                error = %format!("{err:#}"),
                "task failed, retry requested"
            );
            Signal::RetryThis
        }
        Err(HandlerError::Failed(err)) => {
            warn!(
                tag = %message.tag,
                hash = %message.hash,
                trial = message.trial,
                error = %format!("{err:#}"),
                "task failed, retry budget exhausted"
            );
            Signal::FailThis
        }
    }
}

/// Worker loop: frames in, signal tokens out.
///
/// Returns `Err` on an undecodable frame, which ends the task like a crash.
/// Returns `Ok` when the scheduler drops either side of the channel.
pub(crate) async fn run(
    tag: String,
    registry: Arc<TypedRegistry>,
    mut inbox: mpsc::Receiver<String>,
    outbox: mpsc::Sender<String>,
) -> Result<(), ProtocolError> {
    info!(tag = %tag, handlers = registry.len(), "worker online");

    while let Some(frame) = inbox.recv().await {
        let message = DispatchMessage::decode(&frame)?;
        debug!(
            tag = %message.tag,
            hash = %message.hash,
            payload = %message.payload,
            args = %message.joined_args(),
            trial = message.trial,
            "executing task"
        );

        let signal = execute(&registry, &message).await;
        if outbox.send(signal.as_str().to_string()).await.is_err() {
            break;
        }
    }

    debug!(tag = %tag, "worker channel closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Arg, TaskHash, TaskType};
    use crate::typed::{Handler, Task};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Divide(i64, i64);

    impl Task for Divide {
        const TYPE: &'static str = "math.divide.v1";
    }

    struct DivideHandler;

    #[async_trait]
    impl Handler<Divide> for DivideHandler {
        async fn handle(&self, task: Divide) -> anyhow::Result<()> {
            anyhow::ensure!(task.1 != 0, "division by zero");
            Ok(())
        }
    }

    fn registry() -> TypedRegistry {
        let mut registry = TypedRegistry::new();
        registry.register::<Divide, _>(DivideHandler).unwrap();
        registry
    }

    fn message(payload: &str, args: Vec<Arg>, trial: u32, max_retry: u32) -> DispatchMessage {
        DispatchMessage {
            tag: "[test] ".into(),
            hash: TaskHash::new("h"),
            args,
            payload: TaskType::new(payload),
            max_retry,
            timeout: 1000,
            trial,
        }
    }

    #[tokio::test]
    async fn success_moves_next() {
        let msg = message("math.divide.v1", vec![Arg::Int(4), Arg::Int(2)], 1, 0);
        assert_eq!(execute(&registry(), &msg).await, Signal::MoveNext);
    }

    #[tokio::test]
    async fn failure_within_budget_retries() {
        let msg = message("math.divide.v1", vec![Arg::Int(4), Arg::Int(0)], 1, 1);
        assert_eq!(execute(&registry(), &msg).await, Signal::RetryThis);
    }

    #[tokio::test]
    async fn failure_on_last_attempt_fails() {
        let msg = message("math.divide.v1", vec![Arg::Int(4), Arg::Int(0)], 2, 1);
        assert_eq!(execute(&registry(), &msg).await, Signal::FailThis);
    }

    #[tokio::test]
    async fn unknown_payload_fails_without_retry() {
        let msg = message("math.modulo.v1", vec![Arg::Int(4)], 1, 5);
        assert_eq!(execute(&registry(), &msg).await, Signal::FailThis);
    }

    #[tokio::test]
    async fn undecodable_args_fail_without_retry() {
        let msg = message("math.divide.v1", vec![Arg::from("four")], 1, 5);
        assert_eq!(execute(&registry(), &msg).await, Signal::FailThis);
    }

    #[tokio::test]
    async fn loop_answers_each_frame_and_stops_on_garbage() {
        let (in_tx, in_rx) = mpsc::channel(1);
        let (out_tx, mut out_rx) = mpsc::channel(1);
        let worker = tokio::spawn(run("[test] ".into(), Arc::new(registry()), in_rx, out_tx));

        let frame = message("math.divide.v1", vec![Arg::Int(9), Arg::Int(3)], 1, 0)
            .encode()
            .unwrap();
        in_tx.send(frame).await.unwrap();
        assert_eq!(out_rx.recv().await.as_deref(), Some("MOVE_NEXT"));

        in_tx.send("not json".into()).await.unwrap();
        let result = worker.await.unwrap();
        assert!(matches!(result, Err(ProtocolError::BadDispatch(_))));
    }
}

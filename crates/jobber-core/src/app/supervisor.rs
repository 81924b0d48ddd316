//! WorkerSupervisor - worker の生存管理
//!
//! worker の spawn / 監視 / 再起動だけを担当します。tray や store には触れません。
//! 連続した crash の間は `RestartBackoff` に従って待ち、正常な signal を
//! 受け取った時点でカウンタを戻します。

use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::worker;
use crate::domain::{ProtocolError, RestartBackoff, Signal};
use crate::typed::TypedRegistry;

/// What the supervisor observed on the worker side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WorkerEvent {
    Signal(Signal),
    /// The worker sent something that is not a signal token.
    Malformed(String),
    /// The worker task ended (panic, protocol error or closed channel).
    Crashed(String),
}

pub(crate) struct WorkerSupervisor {
    tag: String,
    registry: Arc<TypedRegistry>,
    backoff: RestartBackoff,
    inbox: mpsc::Sender<String>,
    outbox: mpsc::Receiver<String>,
    join: Option<JoinHandle<Result<(), ProtocolError>>>,
    restarts: u32,
}

impl WorkerSupervisor {
    pub(crate) fn spawn(tag: String, registry: Arc<TypedRegistry>, backoff: RestartBackoff) -> Self {
        let (inbox, outbox, join) = launch(&tag, &registry);
        Self {
            tag,
            registry,
            backoff,
            inbox,
            outbox,
            join: Some(join),
            restarts: 0,
        }
    }

    /// Hand one frame to the worker. `false` if the worker is gone.
    pub(crate) async fn send(&self, frame: String) -> bool {
        self.inbox.send(frame).await.is_ok()
    }

    /// Wait for the next signal or for the worker to end.
    ///
    /// Never resolves after a `Crashed` until `respawn` is called.
    pub(crate) async fn next_event(&mut self) -> WorkerEvent {
        let Some(join) = self.join.as_mut() else {
            return std::future::pending().await;
        };

        let observed = tokio::select! {
            biased;
            frame = self.outbox.recv() => Ok(frame),
            result = join => Err(result),
        };

        match observed {
            Ok(Some(frame)) => match Signal::from_str(frame.trim()) {
                Ok(signal) => WorkerEvent::Signal(signal),
                Err(_) => WorkerEvent::Malformed(frame),
            },
            // every sender is gone, so the worker task is finishing
            Ok(None) => match self.join.take() {
                Some(join) => WorkerEvent::Crashed(exit_reason(join.await)),
                None => WorkerEvent::Crashed("worker exited".to_string()),
            },
            Err(result) => {
                self.join = None;
                WorkerEvent::Crashed(exit_reason(result))
            }
        }
    }

    /// A good signal arrived; the next crash starts the backoff from scratch.
    pub(crate) fn mark_healthy(&mut self) {
        self.restarts = 0;
    }

    /// Replace the worker, waiting out the restart backoff first.
    pub(crate) async fn respawn(&mut self) {
        self.stop();
        self.restarts = self.restarts.saturating_add(1);
        let delay = self.backoff.next_delay(self.restarts);
        info!(
            tag = %self.tag,
            restarts = self.restarts,
            delay_ms = delay.as_millis() as u64,
            "restarting worker"
        );
        tokio::time::sleep(delay).await;

        let (inbox, outbox, join) = launch(&self.tag, &self.registry);
        self.inbox = inbox;
        self.outbox = outbox;
        self.join = Some(join);
    }

    /// Abort the current worker, if any.
    pub(crate) fn stop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

impl Drop for WorkerSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn launch(
    tag: &str,
    registry: &Arc<TypedRegistry>,
) -> (
    mpsc::Sender<String>,
    mpsc::Receiver<String>,
    JoinHandle<Result<(), ProtocolError>>,
) {
    // capacity 1: one frame in flight each way
    let (inbox_tx, inbox_rx) = mpsc::channel(1);
    let (outbox_tx, outbox_rx) = mpsc::channel(1);
    let join = tokio::spawn(worker::run(
        tag.to_string(),
        Arc::clone(registry),
        inbox_rx,
        outbox_tx,
    ));
    (inbox_tx, outbox_rx, join)
}

fn exit_reason(result: Result<Result<(), ProtocolError>, tokio::task::JoinError>) -> String {
    match result {
        Ok(Ok(())) => "worker exited".to_string(),
        Ok(Err(err)) => {
            error!(error = %err, "worker rejected a dispatch frame");
            err.to_string()
        }
        Err(err) if err.is_panic() => "worker panicked".to_string(),
        Err(err) => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Arg, DispatchMessage, TaskHash, TaskType};
    use crate::typed::{Handler, Task};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize)]
    struct Boom(bool);

    impl Task for Boom {
        const TYPE: &'static str = "test.boom.v1";
    }

    struct BoomHandler;

    #[async_trait]
    impl Handler<Boom> for BoomHandler {
        async fn handle(&self, task: Boom) -> anyhow::Result<()> {
            if task.0 {
                panic!("boom");
            }
            Ok(())
        }
    }

    fn supervisor() -> WorkerSupervisor {
        let mut registry = TypedRegistry::new();
        registry.register::<Boom, _>(BoomHandler).unwrap();
        let backoff = RestartBackoff {
            base_delay: Duration::from_millis(1),
            multiplier: 1.0,
            max_delay: Duration::from_millis(1),
        };
        WorkerSupervisor::spawn("[test] ".into(), Arc::new(registry), backoff)
    }

    fn frame(explode: bool) -> String {
        DispatchMessage {
            tag: "[test] ".into(),
            hash: TaskHash::new("h"),
            args: vec![Arg::Bool(explode)],
            payload: TaskType::new("test.boom.v1"),
            max_retry: 0,
            timeout: 1,
            trial: 1,
        }
        .encode()
        .unwrap()
    }

    #[tokio::test]
    async fn panic_is_reported_as_crash_and_respawn_recovers() {
        let mut sup = supervisor();

        assert!(sup.send(frame(true)).await);
        assert_eq!(
            sup.next_event().await,
            WorkerEvent::Crashed("worker panicked".into())
        );

        sup.respawn().await;
        assert!(sup.send(frame(false)).await);
        assert_eq!(sup.next_event().await, WorkerEvent::Signal(Signal::MoveNext));
    }

    #[tokio::test]
    async fn garbage_frame_ends_the_worker() {
        let mut sup = supervisor();
        assert!(sup.send("{".into()).await);
        assert!(matches!(sup.next_event().await, WorkerEvent::Crashed(_)));
    }
}

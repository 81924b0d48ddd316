//! Scheduler - orchestrator loop
//!
//! # 設計原則
//! - 1 つの tokio task がすべての状態（tray, in-flight）を所有する。ロック不要
//! - worker に送るのは常に 1 件だけ。結果を受け取るまで次を送らない
//! - 処理対象は常に tray の先頭
//! - store の障害はログに残してループを継続する（次の signal / tick で再試行）
//!
//! # 起床要因
//! - shutdown（`watch`）
//! - worker の signal / crash（`WorkerSupervisor`）
//! - 新規 task（`Notify`、`Jobber::dispatch` から）
//! - watchman（`refresh_period` ごとの tick、idle のときだけ restage）

use std::sync::Arc;

use tokio::sync::{Notify, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::config::{FailurePolicy, SchedulerConfig};
use super::supervisor::{WorkerEvent, WorkerSupervisor};
use super::tray::Tray;
use crate::domain::{DispatchMessage, QueueList, Signal, TaskHash, allows_retry};
use crate::ports::TaskStore;

enum Wake {
    Shutdown,
    Worker(WorkerEvent),
    NewTask,
    Watchman,
}

pub(crate) struct Scheduler {
    store: Arc<dyn TaskStore>,
    queues: QueueList,
    config: SchedulerConfig,
    tray: Tray,
    in_flight: Option<TaskHash>,
    /// Restage once the tray drains (a task arrived while busy, or a crash).
    restage_pending: bool,
    supervisor: WorkerSupervisor,
    new_task: Arc<Notify>,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        queues: QueueList,
        config: SchedulerConfig,
        supervisor: WorkerSupervisor,
        new_task: Arc<Notify>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            queues,
            config,
            tray: Tray::new(),
            in_flight: None,
            restage_pending: false,
            supervisor,
            new_task,
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) {
        info!(
            tag = %self.config.worker_tag,
            backend = self.store.backend(),
            queues = ?self.queues.names(),
            "scheduler started"
        );

        if self.config.release_orphaned_locks {
            self.release_orphaned_locks().await;
        }
        self.replenish().await;

        let period = self.config.refresh_period;
        let mut watchman = tokio::time::interval_at(Instant::now() + period, period);
        watchman.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wake = tokio::select! {
                biased;
                _ = self.shutdown.changed() => Wake::Shutdown,
                event = self.supervisor.next_event() => Wake::Worker(event),
                _ = self.new_task.notified() => Wake::NewTask,
                _ = watchman.tick() => Wake::Watchman,
            };

            match wake {
                Wake::Shutdown => break,
                Wake::Worker(event) => {
                    self.on_worker_event(event).await;
                    self.advance().await;
                }
                Wake::NewTask if self.is_idle() => self.replenish().await,
                Wake::NewTask => self.restage_pending = true,
                Wake::Watchman if self.is_idle() => {
                    debug!(tag = %self.config.worker_tag, "watchman restaging");
                    self.replenish().await;
                }
                Wake::Watchman => {}
            }
        }

        self.stop().await;
    }

    fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.tray.is_empty()
    }

    /// Stage from the store, then start dispatching.
    async fn replenish(&mut self) {
        self.stage().await;
        self.advance().await;
    }

    async fn stage(&mut self) {
        self.restage_pending = false;
        let (staged, failures) = self.tray.stage(self.store.as_ref(), &self.queues).await;
        for (queue, err) in &failures {
            error!(tag = %self.config.worker_tag, queue = %queue, error = %err, "staging queue failed");
        }
        if staged == 0 {
            debug!(tag = %self.config.worker_tag, "nothing to stage");
            return;
        }
        info!(tag = %self.config.worker_tag, staged, "tray staged");
        if self.config.show_queue_list {
            let hashes: Vec<&str> = self.tray.hashes().into_iter().map(TaskHash::as_str).collect();
            info!(tag = %self.config.worker_tag, queue_list = ?hashes, "staged tasks");
        }
    }

    /// Dispatch the tray head, skipping whatever cannot be claimed.
    async fn advance(&mut self) {
        while self.in_flight.is_none() {
            let Some(head) = self.tray.head() else {
                if self.restage_pending {
                    self.stage().await;
                    if !self.tray.is_empty() {
                        continue;
                    }
                }
                debug!(tag = %self.config.worker_tag, "tray empty, idle");
                return;
            };
            let hash = head.hash.clone();

            if head.is_locked {
                debug!(tag = %self.config.worker_tag, hash = %hash, "head already locked, skipping");
                self.tray.pop_head();
                continue;
            }
            if !head.payload.is_well_formed() {
                warn!(
                    tag = %self.config.worker_tag,
                    hash = %hash,
                    payload = ?head.payload.as_str(),
                    "payload is not a task type, skipping"
                );
                self.tray.pop_head();
                continue;
            }

            match self.store.update_trial(&hash).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(tag = %self.config.worker_tag, hash = %hash, "claimed elsewhere, skipping");
                    self.tray.pop_head();
                    continue;
                }
                Err(err) => {
                    error!(tag = %self.config.worker_tag, hash = %hash, error = %err, "claim failed");
                    self.tray.clear();
                    return;
                }
            }

            let claimed = match self.store.fetch_one(&hash).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    warn!(tag = %self.config.worker_tag, hash = %hash, "claimed task vanished");
                    self.tray.pop_head();
                    continue;
                }
                Err(err) => {
                    error!(tag = %self.config.worker_tag, hash = %hash, error = %err, "reading claimed task failed");
                    self.unlock(&hash).await;
                    self.tray.clear();
                    return;
                }
            };

            let message = DispatchMessage::for_claimed(&claimed, self.config.worker_tag.clone());
            let frame = match message.encode() {
                Ok(frame) => frame,
                Err(err) => {
                    error!(tag = %self.config.worker_tag, hash = %hash, error = %err, "encoding dispatch failed");
                    self.unlock(&hash).await;
                    self.tray.pop_head();
                    continue;
                }
            };

            info!(
                tag = %self.config.worker_tag,
                hash = %hash,
                queue = %claimed.queue,
                payload = %claimed.payload,
                args = %message.joined_args(),
                trial = claimed.trial,
                "dispatching task"
            );
            self.tray.replace_head(claimed);
            self.in_flight = Some(hash);

            // a dead worker surfaces as `Crashed` on the next wake
            if !self.supervisor.send(frame).await {
                warn!(tag = %self.config.worker_tag, "worker inbox closed");
            }
        }
    }

    async fn on_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Signal(signal) => self.on_signal(signal).await,
            WorkerEvent::Malformed(frame) => {
                self.on_crash(format!("malformed outcome frame {frame:?}"))
                    .await
            }
            WorkerEvent::Crashed(reason) => self.on_crash(reason).await,
        }
    }

    async fn on_signal(&mut self, signal: Signal) {
        let Some(hash) = self.in_flight.take() else {
            warn!(tag = %self.config.worker_tag, signal = %signal, "signal with nothing in flight");
            return;
        };
        self.supervisor.mark_healthy();

        match signal {
            Signal::MoveNext => {
                self.tray.pop_head();
                info!(tag = %self.config.worker_tag, hash = %hash, "task completed");
                self.purge(&hash).await;
            }
            Signal::FailThis => {
                self.tray.pop_head();
                self.terminate(&hash).await;
            }
            Signal::RetryThis => match self.store.release(&hash).await {
                Ok(record) if allows_retry(record.trial, record.max_retry) => {
                    warn!(
                        tag = %self.config.worker_tag,
                        hash = %hash,
                        trial = record.trial,
                        max_retry = record.max_retry,
                        "retrying task"
                    );
                    self.tray.replace_head(record);
                }
                Ok(_) => {
                    self.tray.pop_head();
                    self.terminate(&hash).await;
                }
                Err(err) => {
                    // still locked in the store; failing it is the way back out
                    error!(tag = %self.config.worker_tag, hash = %hash, error = %err, "release failed, failing task");
                    self.tray.pop_head();
                    self.terminate(&hash).await;
                }
            },
        }
    }

    /// The worker died or spoke garbage: drop the in-flight task and restart.
    async fn on_crash(&mut self, reason: String) {
        error!(tag = %self.config.worker_tag, reason = %reason, "worker crashed");
        if let Some(hash) = self.in_flight.take() {
            self.tray.pop_head();
            warn!(tag = %self.config.worker_tag, hash = %hash, "purging in-flight task after crash");
            self.purge(&hash).await;
        }
        self.supervisor.respawn().await;
        self.tray.clear();
        self.restage_pending = true;
    }

    /// Terminal failure, handled per `failure_policy`.
    async fn terminate(&mut self, hash: &TaskHash) {
        match self.config.failure_policy {
            FailurePolicy::Retain => match self.store.fail(hash).await {
                Ok(true) => warn!(tag = %self.config.worker_tag, hash = %hash, "task failed"),
                Ok(false) => warn!(tag = %self.config.worker_tag, hash = %hash, "failed task was already gone"),
                Err(err) => error!(tag = %self.config.worker_tag, hash = %hash, error = %err, "moving task to failed failed"),
            },
            FailurePolicy::Purge => {
                warn!(tag = %self.config.worker_tag, hash = %hash, "task failed, purging");
                self.purge(hash).await;
            }
        }
    }

    async fn purge(&self, hash: &TaskHash) {
        if let Err(err) = self.store.purge(hash).await {
            error!(tag = %self.config.worker_tag, hash = %hash, error = %err, "purge failed");
        }
    }

    async fn unlock(&self, hash: &TaskHash) {
        if let Err(err) = self.store.release(hash).await {
            error!(tag = %self.config.worker_tag, hash = %hash, error = %err, "release failed");
        }
    }

    /// Release locks left by a run that died mid-task.
    async fn release_orphaned_locks(&self) {
        let mut released = 0usize;
        for queue in self.queues.iter() {
            let locked = match self.store.fetch_locked(queue).await {
                Ok(locked) => locked,
                Err(err) => {
                    error!(tag = %self.config.worker_tag, queue = %queue.name, error = %err, "listing locked tasks failed");
                    continue;
                }
            };
            for record in locked {
                self.unlock(&record.hash).await;
                released += 1;
            }
        }
        if released > 0 {
            warn!(tag = %self.config.worker_tag, released, "released orphaned locks");
        }
    }

    async fn stop(&mut self) {
        self.supervisor.stop();
        if let Some(hash) = self.in_flight.take() {
            warn!(tag = %self.config.worker_tag, hash = %hash, "releasing in-flight task on shutdown");
            self.unlock(&hash).await;
        }
        info!(tag = %self.config.worker_tag, "scheduler stopped");
    }
}

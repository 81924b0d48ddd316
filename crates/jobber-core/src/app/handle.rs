//! Jobber - scheduler への明示的なハンドル
//!
//! グローバルな「現在の scheduler」は持ちません。`SchedulerBuilder::start` が
//! 返すハンドルを clone して呼び出し元に渡します。
//!
//! 投入・管理 API はすべて store への薄い委譲で、queue 名は宣言済みの
//! queue list で検証します。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::domain::{
    Arg, DispatchOptions, JobberError, Queue, QueueList, StoreError, TaskHash, TaskOptions,
    TaskRecord, TaskType, ValidationError, ensure_storable,
};
use crate::ports::TaskStore;
use crate::typed::{Task, TypedRegistry};

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReceipt {
    pub hash: TaskHash,
    /// Free-task count right after the submission.
    pub pos: u64,
}

struct Inner {
    store: Arc<dyn TaskStore>,
    queues: QueueList,
    registry: Arc<TypedRegistry>,
    task_defaults: TaskOptions,
    new_task: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    join: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct Jobber {
    inner: Arc<Inner>,
}

impl Jobber {
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        queues: QueueList,
        registry: Arc<TypedRegistry>,
        task_defaults: TaskOptions,
        new_task: Arc<Notify>,
        shutdown: watch::Sender<bool>,
        join: JoinHandle<()>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                queues,
                registry,
                task_defaults,
                new_task,
                shutdown,
                join: Mutex::new(Some(join)),
            }),
        }
    }

    /// Submit a typed task to `queue`.
    ///
    /// # Errors
    /// - `QueueNotFound` if `queue` was not declared
    /// - `NotInvocable` if no handler is registered for `T`
    /// - `InvalidArgs` if `T` does not flatten into primitives
    pub async fn dispatch<T: Task>(
        &self,
        queue: &str,
        task: T,
        options: DispatchOptions,
    ) -> Result<DispatchReceipt, JobberError> {
        let args = task.to_args()?;
        self.dispatch_raw(queue, T::TYPE, args, options).await
    }

    /// Submit by task type name and a prepared argument list.
    pub async fn dispatch_raw(
        &self,
        queue: &str,
        task_type: &str,
        args: Vec<Arg>,
        options: DispatchOptions,
    ) -> Result<DispatchReceipt, JobberError> {
        self.ensure_running()?;
        let queue = self.inner.queues.resolve(queue)?;
        let payload = TaskType::new(task_type);
        if !payload.is_well_formed() || !self.inner.registry.contains(task_type) {
            return Err(ValidationError::NotInvocable(task_type.to_string()).into());
        }
        ensure_storable(&args)?;

        let options = options.resolve(self.inner.task_defaults);
        let record = self
            .inner
            .store
            .stash(&queue.name, &payload, &args, options)
            .await
            .inspect_err(|err| error!(queue = %queue.name, payload = %payload, error = %err, "stash failed"))?;
        self.inner.new_task.notify_one();

        let pos = self
            .inner
            .store
            .count()
            .await
            .inspect_err(|err| error!(error = %err, "counting free tasks failed"))?;
        info!(
            hash = %record.hash,
            queue = %record.queue,
            payload = %record.payload,
            pos,
            "task dispatched"
        );
        Ok(DispatchReceipt {
            hash: record.hash,
            pos,
        })
    }

    /// Delete a task from both partitions. Always `true`.
    pub async fn purge(&self, hash: &TaskHash) -> Result<bool, StoreError> {
        self.inner
            .store
            .purge(hash)
            .await
            .inspect_err(|err| error!(hash = %hash, error = %err, "purge failed"))
    }

    pub async fn restore_one_failed(&self, hash: &TaskHash) -> Result<bool, StoreError> {
        let restored = self
            .inner
            .store
            .restore_one_failed(hash)
            .await
            .inspect_err(|err| error!(hash = %hash, error = %err, "restore failed"))?;
        if restored {
            self.inner.new_task.notify_one();
        }
        Ok(restored)
    }

    /// Restore every failed task; returns how many moved.
    pub async fn restore_all(&self) -> Result<u64, StoreError> {
        let restored = self
            .inner
            .store
            .restore_failed()
            .await
            .inspect_err(|err| error!(error = %err, "restoring failed tasks failed"))?;
        if restored > 0 {
            self.inner.new_task.notify_one();
        }
        Ok(restored)
    }

    /// Set a task's eligibility offset. `false` while it is locked.
    pub async fn delay(&self, hash: &TaskHash, period: Duration) -> Result<bool, StoreError> {
        self.inner
            .store
            .delay(hash, period)
            .await
            .inspect_err(|err| error!(hash = %hash, error = %err, "delay failed"))
    }

    pub async fn list_free(&self, queue: &str) -> Result<Vec<TaskRecord>, JobberError> {
        let queue = self.inner.queues.resolve(queue)?;
        let records = self
            .inner
            .store
            .fetch_free(queue)
            .await
            .inspect_err(|err| error!(queue = %queue.name, error = %err, "listing free tasks failed"))?;
        Ok(records)
    }

    pub async fn list_failed(&self, queue: &str) -> Result<Vec<TaskRecord>, JobberError> {
        let queue = self.inner.queues.resolve(queue)?;
        let records = self
            .inner
            .store
            .fetch_failed(queue)
            .await
            .inspect_err(|err| error!(queue = %queue.name, error = %err, "listing failed tasks failed"))?;
        Ok(records)
    }

    pub async fn list_locked(&self, queue: &str) -> Result<Vec<TaskRecord>, JobberError> {
        let queue = self.inner.queues.resolve(queue)?;
        let records = self
            .inner
            .store
            .fetch_locked(queue)
            .await
            .inspect_err(|err| error!(queue = %queue.name, error = %err, "listing locked tasks failed"))?;
        Ok(records)
    }

    /// Tasks in the free partition, locked or not.
    pub async fn count(&self) -> Result<u64, StoreError> {
        self.inner
            .store
            .count()
            .await
            .inspect_err(|err| error!(error = %err, "counting free tasks failed"))
    }

    pub async fn fetch_one(&self, hash: &TaskHash) -> Result<Option<TaskRecord>, StoreError> {
        self.inner
            .store
            .fetch_one(hash)
            .await
            .inspect_err(|err| error!(hash = %hash, error = %err, "fetching task failed"))
    }

    pub fn queues(&self) -> impl Iterator<Item = &Queue> {
        self.inner.queues.iter()
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.inner.store
    }

    pub fn is_running(&self) -> bool {
        !*self.inner.shutdown.borrow()
    }

    /// Stop the scheduler loop and its worker. Idempotent.
    pub async fn shutdown(&self) {
        // stored even when the loop has already dropped its receiver
        self.inner.shutdown.send_replace(true);
        let join = self.inner.join.lock().await.take();
        if let Some(join) = join {
            if let Err(err) = join.await {
                warn!(error = %err, "scheduler task ended abnormally");
            }
        }
    }

    /// `shutdown`, then close the store.
    pub async fn disconnect(&self) -> Result<(), StoreError> {
        self.shutdown().await;
        self.inner.store.disconnect().await
    }

    fn ensure_running(&self) -> Result<(), JobberError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(JobberError::ShutDown)
        }
    }
}

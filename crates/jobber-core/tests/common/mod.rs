#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use jobber_core::ports::FixedClock;
use jobber_core::{
    Arg, MemoryTaskStore, Queue, SchedulerConfig, SqliteTaskStore, StoreError, TaskHash,
    TaskOptions, TaskRecord, TaskStore, TaskType,
};

#[derive(Debug, Clone, Copy)]
pub enum Backend {
    Memory,
    Sqlite,
}

pub fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
    ))
}

pub async fn store_with_clock(backend: Backend, clock: Arc<FixedClock>) -> Arc<dyn TaskStore> {
    match backend {
        Backend::Memory => Arc::new(MemoryTaskStore::with_clock(clock)),
        Backend::Sqlite => Arc::new(
            SqliteTaskStore::connect_with_clock("sqlite::memory:", clock)
                .await
                .unwrap(),
        ),
    }
}

/// Short watchman period and near-instant worker restarts.
pub fn fast_config() -> SchedulerConfig {
    let mut config = SchedulerConfig::default().refresh_period(Duration::from_millis(50));
    config.restart_backoff.base_delay = Duration::from_millis(1);
    config.restart_backoff.max_delay = Duration::from_millis(10);
    config
}

/// Poll `cond` until it holds; panics after five seconds.
pub async fn wait_until<F, Fut>(mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if cond().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached within 5s");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// `MemoryTaskStore` with switchable backend failures.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryTaskStore,
    /// How many upcoming `release` calls fail.
    release_failures: AtomicU32,
    /// `fetch_free` fails for this queue.
    broken_queue: Mutex<Option<String>>,
}

impl FaultyStore {
    pub fn fail_next_releases(&self, n: u32) {
        self.release_failures.store(n, Ordering::SeqCst);
    }

    pub fn break_queue(&self, name: &str) {
        *self.broken_queue.lock().unwrap() = Some(name.to_string());
    }

    fn outage() -> StoreError {
        StoreError::Unavailable("injected outage".to_string())
    }
}

#[async_trait]
impl TaskStore for FaultyStore {
    fn backend(&self) -> &'static str {
        "faulty"
    }

    async fn stash(
        &self,
        queue: &str,
        payload: &TaskType,
        args: &[Arg],
        options: TaskOptions,
    ) -> Result<TaskRecord, StoreError> {
        self.inner.stash(queue, payload, args, options).await
    }

    async fn lock(&self, hash: &TaskHash) -> Result<bool, StoreError> {
        self.inner.lock(hash).await
    }

    async fn update_trial(&self, hash: &TaskHash) -> Result<bool, StoreError> {
        self.inner.update_trial(hash).await
    }

    async fn release(&self, hash: &TaskHash) -> Result<TaskRecord, StoreError> {
        let injected = self
            .release_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Self::outage());
        }
        self.inner.release(hash).await
    }

    async fn fail(&self, hash: &TaskHash) -> Result<bool, StoreError> {
        self.inner.fail(hash).await
    }

    async fn purge(&self, hash: &TaskHash) -> Result<bool, StoreError> {
        self.inner.purge(hash).await
    }

    async fn restore_one_failed(&self, hash: &TaskHash) -> Result<bool, StoreError> {
        self.inner.restore_one_failed(hash).await
    }

    async fn restore_failed(&self) -> Result<u64, StoreError> {
        self.inner.restore_failed().await
    }

    async fn delay(&self, hash: &TaskHash, period: Duration) -> Result<bool, StoreError> {
        self.inner.delay(hash, period).await
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.inner.count().await
    }

    async fn fetch_free(&self, queue: &Queue) -> Result<Vec<TaskRecord>, StoreError> {
        let broken = self.broken_queue.lock().unwrap().clone();
        if broken.as_deref() == Some(queue.name.as_str()) {
            return Err(Self::outage());
        }
        self.inner.fetch_free(queue).await
    }

    async fn fetch_failed(&self, queue: &Queue) -> Result<Vec<TaskRecord>, StoreError> {
        self.inner.fetch_failed(queue).await
    }

    async fn fetch_one(&self, hash: &TaskHash) -> Result<Option<TaskRecord>, StoreError> {
        self.inner.fetch_one(hash).await
    }

    async fn fetch_locked(&self, queue: &Queue) -> Result<Vec<TaskRecord>, StoreError> {
        self.inner.fetch_locked(queue).await
    }

    async fn disconnect(&self) -> Result<(), StoreError> {
        self.inner.disconnect().await
    }
}

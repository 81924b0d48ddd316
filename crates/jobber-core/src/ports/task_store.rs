//! TaskStore port - 全バックエンドが満たす正本（source of truth）の契約
//!
//! # 設計原則
//! - `lock` / `update_trial` は真の compare-and-set（read-then-write 禁止）。
//!   複数の scheduler インスタンスが同じ store を共有しても、
//!   同じ hash を同時に保持できるのは 1 者だけ。
//! - free / failed の 2 つのパーティション。failed は free 系クエリから除外。
//! - ドライバ障害は `StoreError` としてそのまま返す（内部でリトライしない）。
//! - scheduler の tray はこの store から常に再構築できるキャッシュに過ぎない。
//!
//! # 実装
//! - `impls::MemoryTaskStore`（プロセス内、document 形式）
//! - `impls::SqliteTaskStore`（relational、sqlx）

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::{Arg, Queue, StoreError, TaskHash, TaskOptions, TaskRecord, TaskType};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Create a free record (trial 0, unlocked) under a fresh hash.
    async fn stash(
        &self,
        queue: &str,
        payload: &TaskType,
        args: &[Arg],
        options: TaskOptions,
    ) -> Result<TaskRecord, StoreError>;

    /// Atomic `is_locked: false -> true`. `false` if locked or absent.
    async fn lock(&self, hash: &TaskHash) -> Result<bool, StoreError>;

    /// Atomic `trial += 1` together with the lock. This is the dispatch claim.
    async fn update_trial(&self, hash: &TaskHash) -> Result<bool, StoreError>;

    /// Clear the lock and return the updated record. `NotFound` if absent.
    async fn release(&self, hash: &TaskHash) -> Result<TaskRecord, StoreError>;

    /// Move a free record into the failed partition, clearing its lock.
    /// `false` if absent or already failed.
    async fn fail(&self, hash: &TaskHash) -> Result<bool, StoreError>;

    /// Delete from both partitions. Always `true`, even if nothing was there.
    async fn purge(&self, hash: &TaskHash) -> Result<bool, StoreError>;

    /// Move one failed record back to free with `trial = 0`, unlocked.
    async fn restore_one_failed(&self, hash: &TaskHash) -> Result<bool, StoreError>;

    /// Restore every failed record; returns how many moved.
    async fn restore_failed(&self) -> Result<u64, StoreError>;

    /// Set the eligibility offset. `false` if the record is locked or absent.
    async fn delay(&self, hash: &TaskHash, period: Duration) -> Result<bool, StoreError>;

    /// Records in the free partition (locked or not).
    async fn count(&self) -> Result<u64, StoreError>;

    /// Eligible records of `queue`, ordered by the queue's algorithm.
    async fn fetch_free(&self, queue: &Queue) -> Result<Vec<TaskRecord>, StoreError>;

    async fn fetch_free_hashes(&self, queue: &Queue) -> Result<Vec<TaskHash>, StoreError> {
        let records = self.fetch_free(queue).await?;
        Ok(records.into_iter().map(|r| r.hash).collect())
    }

    /// Failed records of `queue`, ordered by the queue's algorithm.
    async fn fetch_failed(&self, queue: &Queue) -> Result<Vec<TaskRecord>, StoreError>;

    /// One free-partition record. Failed records are not returned.
    async fn fetch_one(&self, hash: &TaskHash) -> Result<Option<TaskRecord>, StoreError>;

    /// Locked records of `queue`, ordered by the queue's algorithm.
    async fn fetch_locked(&self, queue: &Queue) -> Result<Vec<TaskRecord>, StoreError>;

    async fn disconnect(&self) -> Result<(), StoreError>;
}

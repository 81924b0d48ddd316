//! In-memory task store (document style, one process).
//!
//! Every operation runs under one `tokio::sync::Mutex`, so `lock` and
//! `update_trial` are true compare-and-set operations for all callers sharing
//! the same `MemoryTaskStore` (for example several schedulers in one process
//! holding clones of the same `Arc`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{
    Arg, Queue, StoreError, TaskHash, TaskOptions, TaskRecord, TaskType, ensure_storable,
};
use crate::ports::{Clock, DigestHashGenerator, HashGenerator, SystemClock, TaskStore};

/// Stored document plus insertion sequence (tie-breaker for equal sort keys).
#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    record: TaskRecord,
}

#[derive(Default)]
struct MemoryState {
    free: HashMap<TaskHash, Entry>,
    failed: HashMap<TaskHash, Entry>,
    next_seq: u64,
}

impl MemoryState {
    fn allocate_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Records of one partition matching `filter`, ordered per `queue.algo`.
    fn select<'a>(
        partition: &'a HashMap<TaskHash, Entry>,
        queue: &Queue,
        filter: impl Fn(&TaskRecord) -> bool,
    ) -> Vec<TaskRecord> {
        let mut entries: Vec<&'a Entry> = partition
            .values()
            .filter(|e| e.record.queue == queue.name && filter(&e.record))
            .collect();
        entries.sort_by(|a, b| {
            queue
                .algo
                .compare(&a.record, &b.record)
                .then_with(|| a.seq.cmp(&b.seq))
        });
        entries.into_iter().map(|e| e.record.clone()).collect()
    }
}

pub struct MemoryTaskStore {
    state: Arc<Mutex<MemoryState>>,
    clock: Arc<dyn Clock>,
    hasher: DigestHashGenerator<Arc<dyn Clock>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            hasher: DigestHashGenerator::new(Arc::clone(&clock)),
            clock,
        }
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn stash(
        &self,
        queue: &str,
        payload: &TaskType,
        args: &[Arg],
        options: TaskOptions,
    ) -> Result<TaskRecord, StoreError> {
        ensure_storable(args).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let queue = queue.trim();
        let hash = self.hasher.generate(queue, payload);
        let record = TaskRecord::new(
            queue,
            hash.clone(),
            payload.clone(),
            args.to_vec(),
            options,
            self.clock.now(),
        );

        let mut state = self.state.lock().await;
        let seq = state.allocate_seq();
        state.free.insert(
            hash,
            Entry {
                seq,
                record: record.clone(),
            },
        );
        Ok(record)
    }

    async fn lock(&self, hash: &TaskHash) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        match state.free.get_mut(hash) {
            Some(entry) if !entry.record.is_locked => {
                entry.record.is_locked = true;
                entry.record.modified_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_trial(&self, hash: &TaskHash) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        match state.free.get_mut(hash) {
            Some(entry) if !entry.record.is_locked => {
                entry.record.trial += 1;
                entry.record.is_locked = true;
                entry.record.modified_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, hash: &TaskHash) -> Result<TaskRecord, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let entry = state
            .free
            .get_mut(hash)
            .ok_or_else(|| StoreError::NotFound(hash.clone()))?;
        entry.record.is_locked = false;
        entry.record.modified_at = now;
        Ok(entry.record.clone())
    }

    async fn fail(&self, hash: &TaskHash) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let Some(mut entry) = state.free.remove(hash) else {
            return Ok(false);
        };
        entry.record.is_failed = true;
        entry.record.is_locked = false;
        entry.record.modified_at = now;
        state.failed.insert(hash.clone(), entry);
        Ok(true)
    }

    async fn purge(&self, hash: &TaskHash) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        state.free.remove(hash);
        state.failed.remove(hash);
        Ok(true)
    }

    async fn restore_one_failed(&self, hash: &TaskHash) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let Some(mut entry) = state.failed.remove(hash) else {
            return Ok(false);
        };
        entry.record.is_failed = false;
        entry.record.is_locked = false;
        entry.record.trial = 0;
        entry.record.modified_at = now;
        state.free.insert(hash.clone(), entry);
        Ok(true)
    }

    async fn restore_failed(&self) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let failed = std::mem::take(&mut state.failed);
        let restored = failed.len() as u64;
        for (hash, mut entry) in failed {
            entry.record.is_failed = false;
            entry.record.is_locked = false;
            entry.record.trial = 0;
            entry.record.modified_at = now;
            state.free.insert(hash, entry);
        }
        Ok(restored)
    }

    async fn delay(&self, hash: &TaskHash, period: Duration) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        match state.free.get_mut(hash) {
            Some(entry) if !entry.record.is_locked => {
                entry.record.delay = period.as_millis() as u64;
                entry.record.modified_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let state = self.state.lock().await;
        Ok(state.free.len() as u64)
    }

    async fn fetch_free(&self, queue: &Queue) -> Result<Vec<TaskRecord>, StoreError> {
        let now = self.clock.now();
        let state = self.state.lock().await;
        Ok(MemoryState::select(&state.free, queue, |r| r.is_eligible(now)))
    }

    async fn fetch_failed(&self, queue: &Queue) -> Result<Vec<TaskRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(MemoryState::select(&state.failed, queue, |_| true))
    }

    async fn fetch_one(&self, hash: &TaskHash) -> Result<Option<TaskRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.free.get(hash).map(|e| e.record.clone()))
    }

    async fn fetch_locked(&self, queue: &Queue) -> Result<Vec<TaskRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(MemoryState::select(&state.free, queue, |r| r.is_locked))
    }

    async fn disconnect(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fail_moves_between_partitions() {
        let store = MemoryTaskStore::new();
        let rec = store
            .stash("mail", &TaskType::new("mail.send.v1"), &[], TaskOptions::default())
            .await
            .unwrap();

        assert!(store.update_trial(&rec.hash).await.unwrap());
        assert!(store.fail(&rec.hash).await.unwrap());

        let state = store.state.lock().await;
        assert!(!state.free.contains_key(&rec.hash));
        let failed = &state.failed[&rec.hash].record;
        assert!(failed.is_failed);
        assert!(!failed.is_locked);
        assert_eq!(failed.trial, 1);
    }

    #[tokio::test]
    async fn restore_keeps_insertion_sequence() {
        let store = MemoryTaskStore::new();
        let payload = TaskType::new("mail.send.v1");
        let first = store
            .stash("mail", &payload, &[], TaskOptions::default())
            .await
            .unwrap();
        store.fail(&first.hash).await.unwrap();
        store.restore_one_failed(&first.hash).await.unwrap();

        let state = store.state.lock().await;
        assert_eq!(state.free[&first.hash].seq, 0);
    }
}

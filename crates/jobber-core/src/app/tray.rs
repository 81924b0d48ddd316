//! Tray - scheduler が保持する staged working set
//!
//! store の free partition のスナップショットに過ぎず、いつでも作り直せます。
//! 操作は常に先頭に対してのみ行います（任意 index の削除はしない）。

use std::collections::VecDeque;

use crate::domain::{QueueList, StoreError, TaskHash, TaskRecord};
use crate::ports::TaskStore;

#[derive(Debug, Default)]
pub(crate) struct Tray {
    items: VecDeque<TaskRecord>,
}

impl Tray {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Rebuild from the store: queues in declaration order, each in its own
    /// algorithm's order. Returns the number of staged records and the queues
    /// whose fetch failed; a failing queue contributes nothing and the rest
    /// are still staged.
    pub(crate) async fn stage(
        &mut self,
        store: &dyn TaskStore,
        queues: &QueueList,
    ) -> (usize, Vec<(String, StoreError)>) {
        self.items.clear();
        let mut failures = Vec::new();
        for queue in queues.iter() {
            match store.fetch_free(queue).await {
                Ok(records) => self.items.extend(records),
                Err(err) => failures.push((queue.name.clone(), err)),
            }
        }
        (self.items.len(), failures)
    }

    pub(crate) fn head(&self) -> Option<&TaskRecord> {
        self.items.front()
    }

    pub(crate) fn pop_head(&mut self) -> Option<TaskRecord> {
        self.items.pop_front()
    }

    /// Swap the head for a fresher copy of the same record.
    pub(crate) fn replace_head(&mut self, record: TaskRecord) {
        match self.items.front_mut() {
            Some(head) => *head = record,
            None => self.items.push_front(record),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn hashes(&self) -> Vec<&TaskHash> {
        self.items.iter().map(|r| &r.hash).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Queue, TaskOptions, TaskType};
    use crate::impls::MemoryTaskStore;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn staging_follows_queue_priority_then_algorithm() {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let store = MemoryTaskStore::with_clock(clock.clone());
        let payload = TaskType::new("test.noop.v1");
        let opts = |timeout| TaskOptions {
            timeout,
            ..TaskOptions::default()
        };

        let low = store.stash("low", &payload, &[], opts(1)).await.unwrap();
        clock.advance(Duration::from_millis(1));
        let slow = store.stash("high", &payload, &[], opts(5000)).await.unwrap();
        clock.advance(Duration::from_millis(1));
        let fast = store.stash("high", &payload, &[], opts(1000)).await.unwrap();

        let queues = QueueList::new([Queue::sjf("high"), Queue::fifo("low")]);
        let mut tray = Tray::new();
        assert_eq!(tray.stage(&store, &queues).await.0, 3);
        assert_eq!(tray.hashes(), vec![&fast.hash, &slow.hash, &low.hash]);
    }

    #[tokio::test]
    async fn staging_replaces_previous_contents() {
        let store = MemoryTaskStore::new();
        let payload = TaskType::new("test.noop.v1");
        let first = store
            .stash("q", &payload, &[], TaskOptions::default())
            .await
            .unwrap();
        let queues = QueueList::new([Queue::fifo("q")]);

        let mut tray = Tray::new();
        tray.stage(&store, &queues).await;
        store.purge(&first.hash).await.unwrap();
        tray.stage(&store, &queues).await;
        assert!(tray.is_empty());
    }

    #[test]
    fn head_operations() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = |h: &str| {
            TaskRecord::new(
                "q",
                TaskHash::new(h),
                TaskType::new("t"),
                vec![],
                TaskOptions::default(),
                t0,
            )
        };

        let mut tray = Tray::new();
        tray.replace_head(record("a"));
        assert_eq!(tray.len(), 1);

        let mut fresher = record("a");
        fresher.trial = 2;
        tray.replace_head(fresher);
        assert_eq!(tray.head().map(|r| r.trial), Some(2));
        assert_eq!(tray.len(), 1);

        assert!(tray.pop_head().is_some());
        assert!(tray.pop_head().is_none());
    }
}

//! SchedulerBuilder - scheduler の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - `expect_tasks()` で期待される task_type を登録
//! - `start()` 時に「期待集合 ⊆ 登録済み集合」をチェック
//! - config の検証（`refresh_period` は 0 不可）に失敗すれば `Config`
//! - queue が 1 つも宣言されていなければ `NoQueues`
//! - store 未指定なら `config.store` の接続記述子から factory で生成

use std::sync::Arc;

use tokio::sync::{Notify, watch};

use super::config::{ConfigError, SchedulerConfig};
use super::handle::Jobber;
use super::scheduler::Scheduler;
use super::supervisor::WorkerSupervisor;
use crate::domain::{Queue, QueueList, StoreError};
use crate::impls;
use crate::ports::TaskStore;
use crate::typed::{Handler, RegistryError, Task, TypedRegistry};

/// SchedulerBuilder は scheduler を構築
///
/// # 使用例
/// ```ignore
/// let jobber = SchedulerBuilder::new()
///     .queue(Queue::sjf("video"))
///     .queue(Queue::fifo("mail"))
///     .register::<Transcode, _>(TranscodeHandler)?
///     .expect_tasks(&["video.transcode.v1"])
///     .start()
///     .await?;
/// ```
///
/// 宣言順が優先度順です。同名の queue は最初の宣言だけが残ります。
pub struct SchedulerBuilder {
    queues: Vec<Queue>,
    registry: TypedRegistry,
    expected_tasks: Option<Vec<String>>,
    config: SchedulerConfig,
    store: Option<Arc<dyn TaskStore>>,
}

/// BuildError は scheduler 起動時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error("no queues declared")]
    NoQueues,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            queues: Vec::new(),
            registry: TypedRegistry::new(),
            expected_tasks: None,
            config: SchedulerConfig::default(),
            store: None,
        }
    }

    pub fn queue(mut self, queue: Queue) -> Self {
        self.queues.push(queue);
        self
    }

    pub fn queues(mut self, queues: impl IntoIterator<Item = Queue>) -> Self {
        self.queues.extend(queues);
        self
    }

    /// Handler を登録
    pub fn register<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    /// 期待される task_type のリストを設定
    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this store instead of connecting to `config.store`.
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate, connect and spawn the scheduler loop.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn start(self) -> Result<Jobber, BuildError> {
        if let Some(expected_tasks) = &self.expected_tasks {
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|t| !self.registry.contains(t))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing_tasks));
            }
        }

        self.config.validate()?;

        let queues = QueueList::new(self.queues);
        if queues.is_empty() {
            return Err(BuildError::NoQueues);
        }

        let store = match self.store {
            Some(store) => store,
            None => impls::connect_url(&self.config.store).await?,
        };

        let registry = Arc::new(self.registry);
        let new_task = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor = WorkerSupervisor::spawn(
            self.config.worker_tag.clone(),
            Arc::clone(&registry),
            self.config.restart_backoff,
        );
        let task_defaults = self.config.task_defaults;
        let scheduler = Scheduler::new(
            Arc::clone(&store),
            queues.clone(),
            self.config,
            supervisor,
            Arc::clone(&new_task),
            shutdown_rx,
        );
        let join = tokio::spawn(scheduler.run());

        Ok(Jobber::new(
            store,
            queues,
            registry,
            task_defaults,
            new_task,
            shutdown_tx,
            join,
        ))
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! jobber-core
//!
//! Deferred-execution task scheduler: tasks are persisted to a store, staged
//! per queue priority and algorithm, and handed one at a time to a supervised
//! worker with bounded retry.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（task record, queue, worker protocol, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, Clock, HashGenerator）
//! - **impls**: TaskStore 実装（memory, sqlite）と接続記述子 factory
//! - **typed**: 型付き Task API（Task trait, Handler trait, TypedRegistry）
//! - **app**: scheduler 本体（builder, handle, orchestrator, worker, supervisor）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use crate::app::{
    BuildError, ConfigError, DispatchReceipt, FailurePolicy, Jobber, SchedulerBuilder,
    SchedulerConfig,
};
pub use crate::domain::{
    Algo, Arg, DispatchOptions, JobberError, Queue, StoreError, TaskHash, TaskOptions, TaskRecord,
    TaskType, ValidationError,
};
pub use crate::impls::{MemoryTaskStore, SqliteTaskStore, StoreDescriptor};
pub use crate::ports::TaskStore;
pub use crate::typed::{Handler, RegistryError, Task, TypedRegistry};

//! App - アプリケーション層
//!
//! ports と typed を組み合わせて scheduler を動かします。
//!
//! # 主要コンポーネント
//! - **SchedulerBuilder**: 構築とワイヤリング（fail-fast 検証）
//! - **Jobber**: 投入・管理 API のハンドル
//! - **Scheduler**: tray / staging / dispatch / outcome 処理の orchestrator ループ
//! - **WorkerSupervisor**: worker の spawn と再起動
//! - **worker**: 1 件ずつ handler を実行する execution context

pub mod builder;
pub mod config;
pub mod handle;
mod scheduler;
mod supervisor;
mod tray;
pub mod worker;

pub use self::builder::{BuildError, SchedulerBuilder};
pub use self::config::{ConfigError, FailurePolicy, SchedulerConfig};
pub use self::handle::{DispatchReceipt, Jobber};

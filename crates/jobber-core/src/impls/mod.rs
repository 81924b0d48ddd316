//! Impls - TaskStore の実装
//!
//! # 含まれる実装
//! - **MemoryTaskStore**: プロセス内（document 形式）。テストとデモ用
//! - **SqliteTaskStore**: sqlx による relational 形式
//! - **factory**: 接続 URL からバックエンドを選択

pub mod factory;
pub mod memory;
pub mod sqlite;

pub use self::factory::{StoreDescriptor, connect, connect_url};
pub use self::memory::MemoryTaskStore;
pub use self::sqlite::SqliteTaskStore;

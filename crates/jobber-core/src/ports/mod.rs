//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」です。永続化バックエンドや時刻を
//! trait の裏に隠し、scheduler はこの契約だけに依存します。

pub mod clock;
pub mod id_generator;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{DigestHashGenerator, HashGenerator};
pub use self::task_store::TaskStore;

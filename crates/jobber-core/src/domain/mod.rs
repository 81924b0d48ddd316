//! Domain model: task records, queues, the worker protocol and errors.
//!
//! Nothing here performs I/O.

pub mod errors;
pub mod ids;
pub mod message;
pub mod queue;
pub mod retry;
pub mod task;

pub use self::errors::{JobberError, StoreError, ValidationError};
pub use self::ids::TaskHash;
pub use self::message::{DispatchMessage, ProtocolError, Signal};
pub use self::queue::{Algo, Queue, QueueList};
pub use self::retry::{RestartBackoff, allows_retry};
pub use self::task::{
    Arg, DispatchOptions, TaskOptions, TaskRecord, TaskType, ensure_storable, join_args,
};

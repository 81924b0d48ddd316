//! Task identity.
//!
//! # TaskHash
//! タスクインスタンスの識別子です。`(queue, payload, ランダムな discriminator)`
//! から導出されるため、同じ payload / args を再投入しても必ず別の hash になります。
//!
//! 生成は `ports::HashGenerator` の責務で、ここでは「運搬用の型」だけを定義します。

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one task instance.
///
/// Opaque string on the wire and in every backend (hex digest for hashes produced
/// by `DigestHashGenerator`, but any non-empty string is accepted when reading
/// records written by another producer).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHash(String);

impl TaskHash {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskHash {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskHash {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

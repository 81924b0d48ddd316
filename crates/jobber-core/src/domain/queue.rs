//! Queue declarations and per-queue ordering.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::errors::ValidationError;
use super::task::TaskRecord;

/// Scheduling algorithm of one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Algo {
    /// Ascending `created_at`.
    #[default]
    Fifo,
    /// Ascending advisory `timeout` ("shortest job first").
    Sjf,
}

impl Algo {
    /// Staging order of two records of the same queue.
    ///
    /// Ties fall through to `created_at` so SJF stays stable for equal timeouts.
    pub fn compare(self, a: &TaskRecord, b: &TaskRecord) -> Ordering {
        match self {
            Algo::Fifo => a.created_at.cmp(&b.created_at),
            Algo::Sjf => a
                .timeout
                .cmp(&b.timeout)
                .then_with(|| a.created_at.cmp(&b.created_at)),
        }
    }
}

impl FromStr for Algo {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FIFO" => Ok(Algo::Fifo),
            "SJF" => Ok(Algo::Sjf),
            _ => Err(ValidationError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for Algo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algo::Fifo => f.write_str("FIFO"),
            Algo::Sjf => f.write_str("SJF"),
        }
    }
}

/// A named priority partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Queue {
    pub name: String,
    #[serde(default)]
    pub algo: Algo,
}

impl Queue {
    pub fn new(name: impl Into<String>, algo: Algo) -> Self {
        Self {
            name: name.into().trim().to_string(),
            algo,
        }
    }

    pub fn fifo(name: impl Into<String>) -> Self {
        Self::new(name, Algo::Fifo)
    }

    pub fn sjf(name: impl Into<String>) -> Self {
        Self::new(name, Algo::Sjf)
    }

    /// Declaration from loose input: a missing or unknown algorithm is FIFO.
    pub fn lenient(name: impl Into<String>, algo: Option<&str>) -> Self {
        let name = name.into();
        let algo = match algo {
            None => Algo::Fifo,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(queue = %name, algo = %raw, "unknown scheduling algorithm, using FIFO");
                Algo::Fifo
            }),
        };
        Self::new(name, algo)
    }
}

impl FromStr for Queue {
    type Err = ValidationError;

    /// `name` or `name:ALGO`, e.g. `video:SJF`. The algorithm part is strict.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((name, algo)) => Ok(Queue::new(name, algo.parse()?)),
            None => Ok(Queue::fifo(s)),
        }
    }
}

/// Ordered queue list. Declaration order is priority order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueList {
    queues: Vec<Queue>,
}

impl QueueList {
    /// Duplicate names collapse to their first declaration.
    pub fn new(queues: impl IntoIterator<Item = Queue>) -> Self {
        let mut list: Vec<Queue> = Vec::new();
        for queue in queues {
            if list.iter().any(|q| q.name == queue.name) {
                continue;
            }
            list.push(queue);
        }
        Self { queues: list }
    }

    pub fn get(&self, name: &str) -> Option<&Queue> {
        let name = name.trim();
        self.queues.iter().find(|q| q.name == name)
    }

    /// Like `get`, but an unknown name is a validation error.
    pub fn resolve(&self, name: &str) -> Result<&Queue, ValidationError> {
        self.get(name)
            .ok_or_else(|| ValidationError::QueueNotFound(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Queue> {
        self.queues.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.queues.iter().map(|q| q.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

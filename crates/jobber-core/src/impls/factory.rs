//! Store factory: pick a backend from a connection URL.
//!
//! | scheme                                   | backend                    |
//! |------------------------------------------|----------------------------|
//! | `memory://` / empty                      | `MemoryTaskStore`          |
//! | `sqlite:` / `file:`                      | `SqliteTaskStore`          |
//! | `redis://`, `mongodb://`, `postgres://`… | recognised, not built here |

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::domain::StoreError;
use crate::ports::TaskStore;

use super::{MemoryTaskStore, SqliteTaskStore};

/// Backends that are recognised by URL but have no adapter in this crate.
const UNAVAILABLE_SCHEMES: [(&str, &str); 6] = [
    ("redis://", "redis"),
    ("mongodb://", "mongodb"),
    ("mongodb+srv://", "mongodb"),
    ("postgres://", "postgres"),
    ("postgresql://", "postgres"),
    ("mysql://", "mysql"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreDescriptor {
    Memory,
    Sqlite { url: String },
}

impl FromStr for StoreDescriptor {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = s.trim();
        if url.is_empty() || url.starts_with("memory://") || url == "memory" {
            return Ok(StoreDescriptor::Memory);
        }
        if url.starts_with("sqlite:") {
            return Ok(StoreDescriptor::Sqlite {
                url: url.to_string(),
            });
        }
        if let Some(path) = url.strip_prefix("file:") {
            let path = path.trim_start_matches("//");
            return Ok(StoreDescriptor::Sqlite {
                url: format!("sqlite:{path}"),
            });
        }
        match UNAVAILABLE_SCHEMES
            .iter()
            .find(|(prefix, _)| url.starts_with(prefix))
        {
            Some((_, backend)) => Err(StoreError::Configuration(format!(
                "{backend} backend is not available in this build"
            ))),
            None => Err(StoreError::Configuration(format!(
                "unrecognised store url '{url}'"
            ))),
        }
    }
}

impl fmt::Display for StoreDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreDescriptor::Memory => f.write_str("memory://"),
            StoreDescriptor::Sqlite { url } => f.write_str(url),
        }
    }
}

/// Build the store a descriptor names.
pub async fn connect(descriptor: &StoreDescriptor) -> Result<Arc<dyn TaskStore>, StoreError> {
    match descriptor {
        StoreDescriptor::Memory => Ok(Arc::new(MemoryTaskStore::new())),
        StoreDescriptor::Sqlite { url } => Ok(Arc::new(SqliteTaskStore::connect(url).await?)),
    }
}

/// `connect` from a raw URL.
pub async fn connect_url(url: &str) -> Result<Arc<dyn TaskStore>, StoreError> {
    connect(&url.parse()?).await
}

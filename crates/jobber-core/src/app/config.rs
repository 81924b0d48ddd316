//! SchedulerConfig - scheduler の設定
//!
//! 既定値の上に環境変数を重ねます。`from_lookup` はテスト可能な本体で、
//! `from_env` は `std::env::var` を渡すだけです。
//!
//! | field                    | env var                         |
//! |--------------------------|---------------------------------|
//! | `refresh_period`         | `JOBBER_REFRESH_PERIOD_MS`      |
//! | `worker_tag`             | `JOBBER_WORKER_TAG`             |
//! | `show_queue_list`        | `JOBBER_SHOW_QUEUE_LIST`        |
//! | `failure_policy`         | `JOBBER_FAILURE_POLICY`         |
//! | `store`                  | `JOBBER_STORE_URL`              |
//! | `release_orphaned_locks` | `JOBBER_RELEASE_ORPHANED_LOCKS` |

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::retry::millis;
use crate::domain::{RestartBackoff, TaskOptions};

pub const ENV_REFRESH_PERIOD_MS: &str = "JOBBER_REFRESH_PERIOD_MS";
pub const ENV_WORKER_TAG: &str = "JOBBER_WORKER_TAG";
pub const ENV_SHOW_QUEUE_LIST: &str = "JOBBER_SHOW_QUEUE_LIST";
pub const ENV_FAILURE_POLICY: &str = "JOBBER_FAILURE_POLICY";
pub const ENV_STORE_URL: &str = "JOBBER_STORE_URL";
pub const ENV_RELEASE_ORPHANED_LOCKS: &str = "JOBBER_RELEASE_ORPHANED_LOCKS";

/// What happens to a task on a terminal failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Move to the failed partition (restorable).
    #[default]
    Retain,
    /// Delete it.
    Purge,
}

impl FromStr for FailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retain" => Ok(FailurePolicy::Retain),
            "purge" => Ok(FailurePolicy::Purge),
            _ => Err(ConfigError::Invalid {
                key: ENV_FAILURE_POLICY.to_string(),
                value: s.to_string(),
                reason: "expected 'retain' or 'purge'".to_string(),
            }),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Retain => f.write_str("retain"),
            FailurePolicy::Purge => f.write_str("purge"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Watchman interval: how often an idle scheduler restages.
    #[serde(with = "millis")]
    pub refresh_period: Duration,
    /// Log prefix, also carried in every dispatch message.
    pub worker_tag: String,
    /// Log the staged hashes after each staging pass.
    pub show_queue_list: bool,
    pub failure_policy: FailurePolicy,
    /// Store connection descriptor, see `impls::StoreDescriptor`.
    pub store: String,
    pub task_defaults: TaskOptions,
    pub restart_backoff: RestartBackoff,
    /// Release locks left behind by a previous run before the first staging.
    /// Unsafe while other instances share the store.
    pub release_orphaned_locks: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_period: Duration::from_secs(5),
            worker_tag: "[jobber] ".to_string(),
            show_queue_list: false,
            failure_policy: FailurePolicy::Retain,
            store: "memory://".to_string(),
            task_defaults: TaskOptions::default(),
            restart_backoff: RestartBackoff::default(),
            release_orphaned_locks: false,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_REFRESH_PERIOD_MS) {
            let ms: u64 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: ENV_REFRESH_PERIOD_MS.to_string(),
                value: raw.clone(),
                reason: "expected milliseconds".to_string(),
            })?;
            if ms == 0 {
                return Err(ConfigError::Invalid {
                    key: ENV_REFRESH_PERIOD_MS.to_string(),
                    value: raw,
                    reason: "must be greater than zero".to_string(),
                });
            }
            config.refresh_period = Duration::from_millis(ms);
        }
        if let Some(tag) = lookup(ENV_WORKER_TAG) {
            config.worker_tag = tag;
        }
        if let Some(raw) = lookup(ENV_SHOW_QUEUE_LIST) {
            config.show_queue_list = parse_flag(ENV_SHOW_QUEUE_LIST, &raw)?;
        }
        if let Some(raw) = lookup(ENV_FAILURE_POLICY) {
            config.failure_policy = raw.parse()?;
        }
        if let Some(url) = lookup(ENV_STORE_URL) {
            config.store = url;
        }
        if let Some(raw) = lookup(ENV_RELEASE_ORPHANED_LOCKS) {
            config.release_orphaned_locks = parse_flag(ENV_RELEASE_ORPHANED_LOCKS, &raw)?;
        }

        Ok(config)
    }

    /// Checks that hold however the config was built (env, serde or setters).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_period.is_zero() {
            return Err(ConfigError::Invalid {
                key: "refresh_period".to_string(),
                value: "0ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn refresh_period(mut self, period: Duration) -> Self {
        self.refresh_period = period;
        self
    }

    pub fn worker_tag(mut self, tag: impl Into<String>) -> Self {
        self.worker_tag = tag.into();
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn show_queue_list(mut self, show: bool) -> Self {
        self.show_queue_list = show;
        self
    }

    pub fn restart_backoff(mut self, backoff: RestartBackoff) -> Self {
        self.restart_backoff = backoff;
        self
    }

    pub fn release_orphaned_locks(mut self, release: bool) -> Self {
        self.release_orphaned_locks = release;
        self
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key: key.to_string(),
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

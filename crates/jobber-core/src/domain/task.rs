//! Task record, payload descriptor and submission options.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::{TaskHash, ValidationError};

/// Payload descriptor: the registered handler name a task resolves to.
///
/// This replaces shipping a callable across the process boundary. The worker
/// looks the name up in its `TypedRegistry`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Structural check only: non-empty, no whitespace or control characters.
    ///
    /// Whether a handler is registered under the name is the worker's question.
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_empty()
            && !self
                .0
                .chars()
                .any(|c| c.is_whitespace() || c.is_control())
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One positional argument. Only primitives are allowed.
///
/// Untagged so that a record's `args` column reads as a plain JSON list,
/// e.g. `[1, "hd", true]`. Variant order matters for deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Arg {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Arg {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Arg::Bool(b) => serde_json::Value::Bool(*b),
            Arg::Int(i) => serde_json::Value::from(*i),
            Arg::Float(f) => serde_json::Value::from(*f),
            Arg::Str(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Returns `None` for arrays, objects and null.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Arg::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Arg::Int(i)),
                None => n.as_f64().map(Arg::Float),
            },
            serde_json::Value::String(s) => Some(Arg::Str(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Bool(b) => b.fmt(f),
            Arg::Int(i) => i.fmt(f),
            Arg::Float(x) => x.fmt(f),
            Arg::Str(s) => s.fmt(f),
        }
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Bool(value)
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Int(value)
    }
}

impl From<i32> for Arg {
    fn from(value: i32) -> Self {
        Arg::Int(value.into())
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Float(value)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Str(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Str(value)
    }
}

/// NaN and the infinities serialize to JSON `null` and never read back.
pub fn ensure_storable(args: &[Arg]) -> Result<(), ValidationError> {
    match args.iter().position(|arg| matches!(arg, Arg::Float(x) if !x.is_finite())) {
        Some(index) => Err(ValidationError::InvalidArgs(format!(
            "argument {index} is not a finite number"
        ))),
        None => Ok(()),
    }
}

/// Comma-joined rendering of an argument list.
pub fn join_args(args: &[Arg]) -> String {
    args.iter()
        .map(Arg::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Resolved per-task options as persisted on the record.
///
/// `timeout` and `delay` are milliseconds. `timeout` is an SJF sort key, not a
/// deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOptions {
    pub max_retry: u32,
    pub timeout: u64,
    pub delay: u64,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            max_retry: 3,
            timeout: 50_000,
            delay: 0,
        }
    }
}

/// Caller-supplied overrides, merged over `TaskOptions` defaults at dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retry: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
}

impl DispatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = Some(max_retry);
        self
    }

    pub fn timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay.as_millis() as u64);
        self
    }

    pub fn resolve(self, defaults: TaskOptions) -> TaskOptions {
        TaskOptions {
            max_retry: self.max_retry.unwrap_or(defaults.max_retry),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            delay: self.delay.unwrap_or(defaults.delay),
        }
    }
}

/// One durable task, as every backend stores and returns it.
///
/// Invariants kept by the stores:
/// - `trial` only moves by +1, together with `is_locked: false -> true`.
/// - `is_failed` records live in the failed partition and never show up in
///   free-set queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub queue: String,
    pub hash: TaskHash,
    pub payload: TaskType,
    pub args: Vec<Arg>,
    pub is_locked: bool,
    pub is_failed: bool,
    pub max_retry: u32,
    pub trial: u32,
    pub timeout: u64,
    pub delay: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl TaskRecord {
    /// A fresh free record (trial 0, unlocked).
    pub fn new(
        queue: impl Into<String>,
        hash: TaskHash,
        payload: TaskType,
        args: Vec<Arg>,
        options: TaskOptions,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            queue: queue.into(),
            hash,
            payload,
            args,
            is_locked: false,
            is_failed: false,
            max_retry: options.max_retry,
            trial: 0,
            timeout: options.timeout,
            delay: options.delay,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn eligible_at(&self) -> DateTime<Utc> {
        self.created_at + ChronoDuration::milliseconds(self.delay as i64)
    }

    /// Eligible for staging: free, unlocked and past its delay.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        !self.is_failed && !self.is_locked && now >= self.eligible_at()
    }

    pub fn options(&self) -> TaskOptions {
        TaskOptions {
            max_retry: self.max_retry,
            timeout: self.timeout,
            delay: self.delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(delay: u64) -> TaskRecord {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        TaskRecord::new(
            "video",
            TaskHash::new("h1"),
            TaskType::new("video.transcode.v1"),
            vec![Arg::Int(1), Arg::from("hd")],
            TaskOptions {
                delay,
                ..TaskOptions::default()
            },
            t0,
        )
    }

    #[test]
    fn non_finite_floats_are_not_storable() {
        assert!(ensure_storable(&[Arg::Int(1), Arg::Float(0.5), Arg::from("hd")]).is_ok());
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(
                ensure_storable(&[Arg::Int(1), Arg::Float(bad)]),
                Err(ValidationError::InvalidArgs(
                    "argument 1 is not a finite number".to_string()
                ))
            );
        }
    }

    #[test]
    fn task_type_well_formedness() {
        assert!(TaskType::new("video.transcode.v1").is_well_formed());
        assert!(!TaskType::new("").is_well_formed());
        assert!(!TaskType::new("two words").is_well_formed());
        assert!(!TaskType::new("bad\u{0007}").is_well_formed());
    }

    #[test]
    fn args_read_as_plain_json_list() {
        let args: Vec<Arg> = serde_json::from_str(r#"[1, 2.5, "x", true]"#).unwrap();
        assert_eq!(
            args,
            vec![Arg::Int(1), Arg::Float(2.5), Arg::Str("x".into()), Arg::Bool(true)]
        );
        assert_eq!(join_args(&args), "1,2.5,x,true");
    }

    #[test]
    fn arg_from_json_rejects_structures() {
        assert_eq!(Arg::from_json(&serde_json::json!(7)), Some(Arg::Int(7)));
        assert_eq!(Arg::from_json(&serde_json::json!([1])), None);
        assert_eq!(Arg::from_json(&serde_json::json!({"a": 1})), None);
        assert_eq!(Arg::from_json(&serde_json::Value::Null), None);
    }

    #[test]
    fn dispatch_options_merge_over_defaults() {
        let resolved = DispatchOptions::new()
            .max_retry(0)
            .timeout(5000)
            .resolve(TaskOptions::default());
        assert_eq!(
            resolved,
            TaskOptions {
                max_retry: 0,
                timeout: 5000,
                delay: 0
            }
        );

        assert_eq!(
            DispatchOptions::new().resolve(TaskOptions::default()),
            TaskOptions::default()
        );
    }

    #[test]
    fn delay_gates_eligibility() {
        let rec = record(1_000);
        assert!(!rec.is_eligible(rec.created_at));
        assert!(!rec.is_eligible(rec.created_at + ChronoDuration::milliseconds(999)));
        assert!(rec.is_eligible(rec.created_at + ChronoDuration::milliseconds(1_000)));
    }

    #[test]
    fn locked_or_failed_records_are_not_eligible() {
        let mut rec = record(0);
        assert!(rec.is_eligible(rec.created_at));

        rec.is_locked = true;
        assert!(!rec.is_eligible(rec.created_at));

        rec.is_locked = false;
        rec.is_failed = true;
        assert!(!rec.is_eligible(rec.created_at));
    }
}

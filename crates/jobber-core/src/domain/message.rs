//! Scheduler <-> worker protocol.
//!
//! The channel carries text frames, as if it crossed a process boundary:
//! - scheduler -> worker: one JSON-encoded `DispatchMessage` per attempt
//! - worker -> scheduler: one bare `Signal` token (`MOVE_NEXT`, `FAIL_THIS`, `RETRY_THIS`)
//!
//! Anything else on the outcome side is a malformed frame, which the scheduler
//! handles like a worker crash.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::task::{Arg, TaskRecord, TaskType, join_args};
use super::TaskHash;

/// Outcome of one attempt, as classified by the worker.
///
/// Serialized as SCREAMING_SNAKE_CASE to match the wire tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    /// Body completed without error.
    MoveNext,
    /// Terminal: unresolvable payload or retry budget exhausted.
    FailThis,
    /// Recoverable error with budget left.
    RetryThis,
}

impl Signal {
    pub fn as_str(self) -> &'static str {
        match self {
            Signal::MoveNext => "MOVE_NEXT",
            Signal::FailThis => "FAIL_THIS",
            Signal::RetryThis => "RETRY_THIS",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unrecognised outcome frame: {0:?}")]
    UnknownSignal(String),

    #[error("undecodable dispatch frame: {0}")]
    BadDispatch(String),
}

impl FromStr for Signal {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MOVE_NEXT" => Ok(Signal::MoveNext),
            "FAIL_THIS" => Ok(Signal::FailThis),
            "RETRY_THIS" => Ok(Signal::RetryThis),
            other => Err(ProtocolError::UnknownSignal(other.to_string())),
        }
    }
}

/// One dispatch attempt handed to the worker.
///
/// `trial` is the attempt number after the claim (1 for the first run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchMessage {
    pub tag: String,
    pub hash: TaskHash,
    pub args: Vec<Arg>,
    pub payload: TaskType,
    pub max_retry: u32,
    pub timeout: u64,
    pub trial: u32,
}

impl DispatchMessage {
    /// Build from a freshly claimed record.
    pub fn for_claimed(record: &TaskRecord, tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            hash: record.hash.clone(),
            args: record.args.clone(),
            payload: record.payload.clone(),
            max_retry: record.max_retry,
            timeout: record.timeout,
            trial: record.trial,
        }
    }

    pub fn joined_args(&self) -> String {
        join_args(&self.args)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::BadDispatch(e.to_string()))
    }

    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(|e| ProtocolError::BadDispatch(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_tokens() {
        assert_eq!(Signal::MoveNext.to_string(), "MOVE_NEXT");
        assert_eq!("RETRY_THIS".parse::<Signal>().unwrap(), Signal::RetryThis);
        assert_eq!(
            serde_json::to_string(&Signal::FailThis).unwrap(),
            "\"FAIL_THIS\""
        );
    }

    #[test]
    fn unknown_signal_is_malformed() {
        let err = "move_next".parse::<Signal>().unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownSignal(_)));
    }

    #[test]
    fn dispatch_frame_uses_camel_case_fields() {
        let msg = DispatchMessage {
            tag: "[jobber] ".into(),
            hash: TaskHash::new("h"),
            args: vec![Arg::Int(1), Arg::Int(2), Arg::Int(3)],
            payload: TaskType::new("video.transcode.v1"),
            max_retry: 0,
            timeout: 5000,
            trial: 1,
        };
        let frame = msg.encode().unwrap();
        let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["maxRetry"], 0);
        assert_eq!(v["args"], serde_json::json!([1, 2, 3]));
        assert_eq!(msg.joined_args(), "1,2,3");

        assert_eq!(DispatchMessage::decode(&frame).unwrap(), msg);
        assert!(DispatchMessage::decode("{not json").is_err());
    }
}

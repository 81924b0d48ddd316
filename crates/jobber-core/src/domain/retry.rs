//! Retry budget and worker restart backoff.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Whether an attempt that just failed may be retried.
///
/// `trial` is the attempt number of the failed attempt (1-based). With
/// `max_retry = m` a task runs at most `m + 1` times: the first run plus
/// `m` retries. Worker and scheduler both call this, so they never disagree
/// about the boundary.
pub fn allows_retry(trial: u32, max_retry: u32) -> bool {
    trial <= max_retry
}

/// Backoff between worker restarts.
///
/// delay = base_delay * multiplier^(restarts - 1), capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RestartBackoff {
    #[serde(with = "millis")]
    pub base_delay: Duration,
    pub multiplier: f64,
    #[serde(with = "millis")]
    pub max_delay: Duration,
}

impl Default for RestartBackoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RestartBackoff {
    /// Delay before the `restarts`-th consecutive restart (1-indexed).
    pub fn next_delay(&self, restarts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exp = restarts.saturating_sub(1).min(32) as i32;
        let delay_secs = base_secs * self.multiplier.powi(exp);
        let capped = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 0, false)]
    #[case(1, 1, true)]
    #[case(2, 1, false)]
    #[case(3, 3, true)]
    #[case(4, 3, false)]
    fn retry_boundary(#[case] trial: u32, #[case] max_retry: u32, #[case] expected: bool) {
        assert_eq!(allows_retry(trial, max_retry), expected);
    }

    #[test]
    fn always_failing_task_runs_max_retry_plus_one_times() {
        let max_retry = 3;
        let mut runs = 0;
        let mut trial = 0;
        loop {
            trial += 1;
            runs += 1;
            if !allows_retry(trial, max_retry) {
                break;
            }
        }
        assert_eq!(runs, max_retry + 1);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let backoff = RestartBackoff::default();
        assert_eq!(backoff.next_delay(1), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(2), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(3), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(50), Duration::from_secs(5));
    }
}

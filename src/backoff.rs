use crate::{
    config::millis,
    pipeline::FailureClass,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    #[serde(with = "millis")]
    pub floor: Duration,
    pub factor: u32,
    #[serde(with = "millis")]
    pub ceiling: Duration,
    pub rate_limit_factor: u32,
    #[serde(with = "millis")]
    pub rate_limit_ceiling: Duration,
    /// Delayed re-invocations allowed per failure episode.
    pub max_scheduled_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            floor: Duration::from_secs(1),
            factor: 2,
            ceiling: Duration::from_secs(30),
            rate_limit_factor: 4,
            rate_limit_ceiling: Duration::from_secs(60),
            max_scheduled_retries: 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    /// Retries for this episode are used up; wait for the next regular poll.
    Exhausted,
    /// Nothing to retry: the ledger gave a definitive answer.
    GiveUp,
}

/// Exponential backoff across failed cycles.
///
/// The interval multiplies on every transient failure and only returns to the
/// floor after a success. Scheduled retries are counted per episode; an
/// episode starts with a regular poll.
#[derive(Clone, Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    interval: Duration,
    scheduled: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        let interval = policy.floor;
        Self {
            policy,
            interval,
            scheduled: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn scheduled_retries(&self) -> u32 {
        self.scheduled
    }

    pub fn on_failure(&mut self, class: FailureClass) -> RetryDecision {
        let (factor, ceiling) = match class {
            FailureClass::Terminal => return RetryDecision::GiveUp,
            FailureClass::Transient => (self.policy.factor, self.policy.ceiling),
            FailureClass::RateLimited => {
                (self.policy.rate_limit_factor, self.policy.rate_limit_ceiling)
            }
        };
        self.interval = self.interval.saturating_mul(factor).min(ceiling);
        if self.scheduled >= self.policy.max_scheduled_retries {
            return RetryDecision::Exhausted;
        }
        self.scheduled += 1;
        RetryDecision::RetryAfter(self.interval)
    }

    pub fn on_success(&mut self) {
        self.interval = self.policy.floor;
        self.scheduled = 0;
    }

    /// A regular poll after exhaustion gets a fresh retry budget but keeps the
    /// grown interval.
    pub fn begin_episode(&mut self) {
        self.scheduled = 0;
    }
}

//! Automatic reconnect backoff policy.
//!
//! `ReconnectPolicy` configures how long the connection core waits
//! between reconnect attempts after a recoverable transport failure.
//! Delays grow exponentially with randomized jitter so a fleet of
//! clients reconnecting to the same server doesn't do so in lockstep.

use std::time::Duration;

pub mod defaults {
    use std::time::Duration;

    pub const BASE_DELAY: Duration = Duration::from_secs(1);
    pub const MULTIPLIER: f64 = 1.6;
    pub const JITTER: f64 = 0.2;
    pub const MAX_DELAY: Duration = Duration::from_secs(30);
    /// `None` max attempts means retry forever.
    pub const MAX_ATTEMPTS: Option<u32> = None;
}

/// Configuration for the reconnect backoff sequence.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
    pub max_delay: Duration,
    /// Maximum reconnect attempts before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            base_delay: defaults::BASE_DELAY,
            multiplier: defaults::MULTIPLIER,
            jitter: defaults::JITTER,
            max_delay: defaults::MAX_DELAY,
            max_attempts: defaults::MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never reconnects; `allowReconnect=false` in terms
    /// the state machine understands.
    pub fn disabled() -> Self {
        ReconnectPolicy {
            max_attempts: Some(0),
            ..Default::default()
        }
    }

    pub fn max_attempts(mut self, max: Option<u32>) -> Self {
        self.max_attempts = max;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.clone())
    }
}

/// Iterator-like helper yielding successive backoff delays with jitter.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    policy: ReconnectPolicy,
    current_delay_secs: f64,
    attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        let current_delay_secs = policy.base_delay.as_secs_f64();
        ExponentialBackoff {
            policy,
            current_delay_secs,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn can_retry(&self) -> bool {
        match self.policy.max_attempts {
            Some(max) => self.attempts < max,
            None => true,
        }
    }

    /// Next delay to wait, advancing internal state.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay_secs;

        let jittered = if self.policy.jitter > 0.0 {
            let jitter_range = self.policy.jitter * 2.0;
            let random_factor = rand::random::<f64>() * jitter_range - self.policy.jitter;
            delay * (1.0 + random_factor)
        } else {
            delay
        };

        let clamped = jittered.min(self.policy.max_delay.as_secs_f64()).max(0.0);

        self.current_delay_secs =
            (self.current_delay_secs * self.policy.multiplier).min(self.policy.max_delay.as_secs_f64());
        self.attempts += 1;

        Duration::from_secs_f64(clamped)
    }
}

//! Jittered exponential backoff between invocation attempts.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Calculates the next backoff duration with jitter applied.
pub(crate) fn calculate_backoff_with_jitter(
    current_backoff: Duration,
    multiplier: f64,
    max_backoff: Duration,
    jitter: f64,
) -> Duration {
    let base_backoff = current_backoff.as_secs_f64() * multiplier;

    let jitter_factor = if jitter > 0.0 {
        1.0 + rand::thread_rng().gen_range(-jitter..=jitter)
    } else {
        1.0
    };

    std::cmp::min(
        Duration::from_secs_f64((base_backoff * jitter_factor).max(0.0)),
        max_backoff,
    )
}

/// Sequence of delays for successive retries of one invocation.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    current: Duration,
    multiplier: f64,
    max: Duration,
    jitter: f64,
    attempts: u32,
}

impl Backoff {
    pub(crate) fn new(config: &RetryConfig) -> Self {
        Self {
            current: config.initial_backoff(),
            multiplier: config.multiplier(),
            max: config.max_backoff(),
            jitter: config.jitter(),
            attempts: 0,
        }
    }

    /// Number of delays handed out so far.
    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the delay before the next attempt and advances the sequence.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.max);
        self.current =
            calculate_backoff_with_jitter(self.current, self.multiplier, self.max, self.jitter);
        self.attempts += 1;
        delay
    }
}

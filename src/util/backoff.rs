use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const DEFAULT_INITIAL_DELAY_MILLIS: u64 = 1_000;
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
pub const DEFAULT_MAX_DELAY_MILLIS: u64 = 32_000;
pub const DEFAULT_ATTEMPT_TIMEOUT_MILLIS: u64 = 50_000;

/// Reconnect schedule for listen streams.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffSettings {
    /// Upper bound of the first retry delay after a reset.
    pub initial_delay: Duration,
    pub multiplier: f64,
    /// Cap applied to every computed bound.
    pub max_delay: Duration,
    /// Budget for a single stream attempt to open and produce its first response.
    pub attempt_timeout: Duration,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MILLIS),
            multiplier: DEFAULT_BACKOFF_FACTOR,
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MILLIS),
            attempt_timeout: Duration::from_millis(DEFAULT_ATTEMPT_TIMEOUT_MILLIS),
        }
    }
}

/// Jittered exponential backoff.
///
/// Each retry sleeps a uniformly random duration in `[0, bound]`. The bound starts at
/// `initial_delay`, grows by `multiplier` after every retry and never exceeds
/// `max_delay`. [`ExponentialBackoff::reset`] returns to the first bound.
#[derive(Debug)]
pub struct ExponentialBackoff {
    settings: BackoffSettings,
    bound: Duration,
    attempts: u32,
    rng: StdRng,
}

impl ExponentialBackoff {
    pub fn new(settings: BackoffSettings) -> Self {
        Self::with_rng(settings, StdRng::from_entropy())
    }

    pub fn with_rng(settings: BackoffSettings, rng: StdRng) -> Self {
        Self {
            bound: settings.initial_delay.min(settings.max_delay),
            settings,
            attempts: 0,
            rng,
        }
    }

    pub fn settings(&self) -> &BackoffSettings {
        &self.settings
    }

    /// Upper bound of the delay the next call to [`Self::next_delay`] may return.
    pub fn current_bound(&self) -> Duration {
        self.bound
    }

    /// Retries handed out since construction or the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Draws the delay for the upcoming retry and moves the schedule forward.
    pub fn next_delay(&mut self) -> Duration {
        let delay = jittered_delay(self.bound, &mut self.rng);
        self.attempts = self.attempts.saturating_add(1);
        self.advance();
        delay
    }

    /// Grows the bound without consuming a retry.
    pub fn advance(&mut self) {
        self.bound = grow_bound(self.bound, &self.settings);
    }

    pub fn reset(&mut self) {
        self.bound = self.settings.initial_delay.min(self.settings.max_delay);
        self.attempts = 0;
    }
}

fn grow_bound(bound: Duration, settings: &BackoffSettings) -> Duration {
    let grown_millis = (bound.as_millis() as f64) * settings.multiplier;
    let cap_millis = settings.max_delay.as_millis() as f64;
    Duration::from_millis(grown_millis.clamp(0.0, cap_millis).round() as u64)
}

fn jittered_delay<R: Rng + ?Sized>(bound: Duration, rng: &mut R) -> Duration {
    let bound_millis = bound.as_millis() as u64;
    if bound_millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rng.gen_range(0..=bound_millis))
}

//! Retry timing after a channel is lost.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use dashsync_config::{BackoffStrategy, ReconnectConfig};

/// Why a channel left `Open` (or never reached it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// The peer closed the link.
    Closed { reason: Option<String> },
    /// The link failed while open.
    Error(String),
    /// The connect attempt itself failed.
    ConnectFailed(String),
}

impl DisconnectCause {
    pub fn describe(&self) -> String {
        match self {
            DisconnectCause::Closed { reason: Some(r) } => format!("closed: {}", r),
            DisconnectCause::Closed { reason: None } => "closed".to_string(),
            DisconnectCause::Error(e) => format!("error: {}", e),
            DisconnectCause::ConnectFailed(e) => format!("connect failed: {}", e),
        }
    }
}

/// Decides whether and when a lost channel reconnects.
///
/// `attempt` counts consecutive failures since the last successful open,
/// starting at 1. `None` means give up.
pub trait ReconnectPolicy: Send + Sync + 'static {
    fn next_delay(&self, attempt: u32, cause: &DisconnectCause) -> Option<Duration>;
}

/// Same delay after every disconnect, whatever the cause.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    pub delay: Duration,
    pub max_attempts: Option<u32>,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        FixedDelay {
            delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl Default for FixedDelay {
    fn default() -> Self {
        FixedDelay::new(Duration::from_secs(3))
    }
}

impl ReconnectPolicy for FixedDelay {
    fn next_delay(&self, attempt: u32, _cause: &DisconnectCause) -> Option<Duration> {
        if exhausted(attempt, self.max_attempts) {
            return None;
        }
        Some(self.delay)
    }
}

/// Compute the backoff duration for a given retry attempt (0-based).
pub fn compute_backoff(base: Duration, attempt: u32, strategy: BackoffStrategy) -> Duration {
    match strategy {
        BackoffStrategy::Fixed => base,
        BackoffStrategy::Linear => base.saturating_mul(attempt.saturating_add(1)),
        BackoffStrategy::Exponential => base.saturating_mul(2u32.saturating_pow(attempt)),
    }
}

/// Growing delay with an optional ceiling and proportional jitter.
pub struct Backoff {
    base: Duration,
    strategy: BackoffStrategy,
    max_delay: Option<Duration>,
    max_attempts: Option<u32>,
    jitter: f64,
    rng: Mutex<StdRng>,
}

impl Backoff {
    pub fn new(base: Duration, strategy: BackoffStrategy) -> Self {
        Backoff {
            base,
            strategy,
            max_delay: None,
            max_attempts: None,
            jitter: 0.0,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Jitter factor, clamped to `0.0..=1.0`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Reproducible jitter.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }
}

impl std::fmt::Debug for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backoff")
            .field("base", &self.base)
            .field("strategy", &self.strategy)
            .field("max_delay", &self.max_delay)
            .field("max_attempts", &self.max_attempts)
            .field("jitter", &self.jitter)
            .finish()
    }
}

impl ReconnectPolicy for Backoff {
    fn next_delay(&self, attempt: u32, _cause: &DisconnectCause) -> Option<Duration> {
        if exhausted(attempt, self.max_attempts) {
            return None;
        }

        let mut delay = compute_backoff(self.base, attempt.saturating_sub(1), self.strategy);
        if let Some(max) = self.max_delay {
            delay = delay.min(max);
        }
        if self.jitter > 0.0 {
            let factor = 1.0 + self.rng.lock().gen_range(-self.jitter..=self.jitter);
            delay = delay.mul_f64(factor);
            if let Some(max) = self.max_delay {
                delay = delay.min(max);
            }
        }
        Some(delay)
    }
}

fn exhausted(attempt: u32, max_attempts: Option<u32>) -> bool {
    matches!(max_attempts, Some(max) if attempt > max)
}

/// Build the policy described by a `reconnect:` section.
pub fn policy_from_config(config: &ReconnectConfig) -> Arc<dyn ReconnectPolicy> {
    let delay = config.delay.as_duration();
    let plain = config.strategy == BackoffStrategy::Fixed
        && config.jitter <= 0.0
        && config.max_delay.is_none();

    if plain {
        return Arc::new(FixedDelay {
            delay,
            max_attempts: config.max_attempts,
        });
    }

    let mut backoff = Backoff::new(delay, config.strategy).with_jitter(config.jitter);
    if let Some(max) = &config.max_delay {
        backoff = backoff.with_max_delay(max.as_duration());
    }
    if let Some(max) = config.max_attempts {
        backoff = backoff.with_max_attempts(max);
    }
    Arc::new(backoff)
}

/// Read-only view of a channel's retry bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconnectState {
    /// Consecutive failures since the last successful open.
    pub attempt_count: u32,
    pub last_error: Option<String>,
    /// A retry timer is armed.
    pub retry_pending: bool,
    pub next_delay: Option<Duration>,
}

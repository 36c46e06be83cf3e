//! Per-call operation parameters.
//!
//! An [`OperationConfig`] is an immutable value: the fluent setters consume
//! and return it, so one call's settings can never leak into another's.

use crate::value::CausalContext;
use siblingkv_config::{BackoffSettings, OperationSettings};
use std::time::Duration;

/// Retries after the first attempt when nothing else is configured.
pub const DEFAULT_RETRY: u32 = 3;

/// Deadline for one engine attempt when nothing else is configured.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// How many replicas must answer a read or acknowledge a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Quorum {
    /// The engine's configured default.
    #[default]
    Default,
    One,
    /// More than half of the replicas.
    Majority,
    All,
    Exactly(usize),
}

impl Quorum {
    /// Resolve against a replica count and the engine default.
    pub fn required(&self, replicas: usize, default: usize) -> usize {
        match *self {
            Self::Default => default,
            Self::One => 1,
            Self::Majority => replicas / 2 + 1,
            Self::All => replicas,
            Self::Exactly(n) => n,
        }
    }
}

impl From<Option<usize>> for Quorum {
    fn from(rw: Option<usize>) -> Self {
        rw.map_or(Self::Default, Self::Exactly)
    }
}

/// Delay before retry number `n` (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    None,
    Fixed(Duration),
    /// `base * 2^(n-1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(50),
            max: Duration::from_secs(2),
        }
    }
}

impl Backoff {
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Self::None => Duration::ZERO,
            Self::Fixed(delay) => delay,
            Self::Exponential { base, max } => {
                let shift = retry.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << shift).min(max)
            }
        }
    }
}

impl From<BackoffSettings> for Backoff {
    fn from(settings: BackoffSettings) -> Self {
        match settings {
            BackoffSettings::None => Self::None,
            BackoffSettings::Fixed { delay_ms } => Self::Fixed(Duration::from_millis(delay_ms)),
            BackoffSettings::Exponential { base_ms, max_ms } => Self::Exponential {
                base: Duration::from_millis(base_ms),
                max: Duration::from_millis(max_ms),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationConfig {
    pub rw: Quorum,
    pub retry: u32,
    pub return_body: bool,
    pub allow_siblings: bool,
    pub context: Option<CausalContext>,
    pub attempt_timeout: Duration,
    pub backoff: Backoff,
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            rw: Quorum::Default,
            retry: DEFAULT_RETRY,
            return_body: false,
            allow_siblings: false,
            context: None,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            backoff: Backoff::default(),
        }
    }
}

impl OperationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &OperationSettings) -> Self {
        Self {
            rw: settings.rw.into(),
            retry: settings.retry,
            return_body: settings.return_body,
            allow_siblings: settings.allow_siblings,
            context: None,
            attempt_timeout: Duration::from_millis(settings.attempt_timeout_ms),
            backoff: settings.backoff.into(),
        }
    }

    pub fn rw(mut self, rw: Quorum) -> Self {
        self.rw = rw;
        self
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn return_body(mut self, return_body: bool) -> Self {
        self.return_body = return_body;
        self
    }

    pub fn allow_siblings(mut self, allow_siblings: bool) -> Self {
        self.allow_siblings = allow_siblings;
        self
    }

    /// Write on top of a context obtained from an earlier fetch.
    pub fn context(mut self, context: CausalContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

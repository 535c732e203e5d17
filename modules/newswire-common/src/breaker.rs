//! Three-state failure gate shared by the feed, article, and chat egress paths.
//!
//! Closed admits everything and counts consecutive failures; at the threshold
//! the breaker opens and rejects locally until the recovery interval elapses,
//! then admits probes no more often than the probe interval. One probe success
//! closes it again; one probe failure reopens it.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::NewswireError;

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_interval: Duration,
    pub probe_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: State,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    last_probe: Option<Instant>,
}

/// Reusable circuit breaker. State transitions are atomic under concurrent
/// calls: all state lives behind one mutex that is never held across await.
pub struct CircuitBreaker {
    name: &'static str,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: BreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                last_failure: None,
                last_probe: None,
            }),
        }
    }

    /// Breaker guarding feed fetches.
    pub fn feed() -> Self {
        Self::new(
            "feed",
            BreakerConfig {
                failure_threshold: 5,
                recovery_interval: Duration::from_secs(30),
                probe_interval: Duration::from_secs(5),
            },
        )
    }

    /// Breaker guarding article fetches.
    pub fn article() -> Self {
        Self::new(
            "article",
            BreakerConfig {
                failure_threshold: 3,
                recovery_interval: Duration::from_secs(60),
                probe_interval: Duration::from_secs(10),
            },
        )
    }

    /// Breaker guarding chat egress.
    pub fn chat() -> Self {
        Self::new(
            "chat",
            BreakerConfig {
                failure_threshold: 10,
                recovery_interval: Duration::from_secs(120),
                probe_interval: Duration::from_secs(15),
            },
        )
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask for admission. Handles the open → half-open transition and probe
    /// pacing; rejected calls fail with `BreakerOpen` without touching the
    /// guarded dependency.
    pub fn try_acquire(&self) -> Result<(), NewswireError> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        let now = Instant::now();

        match inner.state {
            State::Closed => Ok(()),
            State::Open => {
                let recovered = inner
                    .last_failure
                    .map(|t| now.duration_since(t) >= self.config.recovery_interval)
                    .unwrap_or(true);
                if recovered {
                    info!(breaker = self.name, "Breaker half-open, admitting probe");
                    inner.state = State::HalfOpen;
                    inner.last_probe = Some(now);
                    Ok(())
                } else {
                    Err(NewswireError::BreakerOpen(self.name.to_string()))
                }
            }
            State::HalfOpen => {
                let probe_due = inner
                    .last_probe
                    .map(|t| now.duration_since(t) >= self.config.probe_interval)
                    .unwrap_or(true);
                if probe_due {
                    inner.last_probe = Some(now);
                    Ok(())
                } else {
                    Err(NewswireError::BreakerOpen(self.name.to_string()))
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if inner.state != State::Closed {
            info!(breaker = self.name, "Breaker closed after successful probe");
        }
        inner.state = State::Closed;
        inner.consecutive_failures = 0;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        let now = Instant::now();
        inner.last_failure = Some(now);

        match inner.state {
            State::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        breaker = self.name,
                        failures = inner.consecutive_failures,
                        "Breaker opened"
                    );
                    inner.state = State::Open;
                }
            }
            State::HalfOpen => {
                warn!(breaker = self.name, "Probe failed, breaker reopened");
                inner.state = State::Open;
            }
            State::Open => {}
        }
    }

    /// Run `op` under the breaker: admission first, then success/failure
    /// bookkeeping on the outcome.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, NewswireError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, NewswireError>>,
    {
        self.try_acquire()?;
        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    /// Current state name, for metrics and logs.
    pub fn state_name(&self) -> &'static str {
        match self.inner.lock().expect("breaker lock poisoned").state {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half_open",
        }
    }
}

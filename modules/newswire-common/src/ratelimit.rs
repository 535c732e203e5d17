//! Chat egress pacing: a per-key last-admit limiter for per-chat spacing and a
//! single global adaptive interval that reacts to rate-limit feedback from the
//! chat API.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Floor of the global send interval (~20 admits/s).
pub const GLOBAL_INTERVAL_FLOOR: Duration = Duration::from_millis(50);

/// Default pause applied when the chat API signals a rate limit without a
/// retry-after hint.
const ESCALATION_DEFAULT: Duration = Duration::from_secs(5);
const ESCALATION_CEILING: Duration = Duration::from_secs(60);

const SWEEP_PERIOD: Duration = Duration::from_secs(600);
const SWEEP_MAX_IDLE: Duration = Duration::from_secs(3600);

/// Admits one call per key per period. Keys idle for over an hour are removed
/// by the background sweeper.
pub struct PerKeyLimiter {
    period: Duration,
    last_admit: Mutex<HashMap<i64, Instant>>,
}

impl PerKeyLimiter {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_admit: Mutex::new(HashMap::new()),
        }
    }

    /// Admit if at least one period has elapsed since the key's last admit.
    pub fn allow(&self, key: i64) -> bool {
        let mut map = self.last_admit.lock().expect("limiter lock poisoned");
        let now = Instant::now();
        match map.get(&key) {
            Some(last) if now.duration_since(*last) < self.period => false,
            _ => {
                map.insert(key, now);
                true
            }
        }
    }

    /// Time until the key would next be admitted. Zero if admittable now.
    pub fn wait_for(&self, key: i64) -> Duration {
        let map = self.last_admit.lock().expect("limiter lock poisoned");
        match map.get(&key) {
            Some(last) => self.period.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Drop keys idle longer than `max_idle`. Returns how many were removed.
    pub fn sweep(&self, max_idle: Duration) -> usize {
        let mut map = self.last_admit.lock().expect("limiter lock poisoned");
        let before = map.len();
        map.retain(|_, last| last.elapsed() <= max_idle);
        before - map.len()
    }

    /// Background sweeper loop; exits on cancellation.
    pub async fn run_sweeper(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + SWEEP_PERIOD, SWEEP_PERIOD);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let removed = self.sweep(SWEEP_MAX_IDLE);
                    if removed > 0 {
                        debug!(removed, "Rate limiter swept idle keys");
                    }
                }
            }
        }
    }
}

#[derive(Debug)]
struct GlobalInner {
    last_admit: Option<Instant>,
    min_interval: Duration,
}

/// Single adaptive interval gating all chat sends. Raised on rate-limit
/// feedback, relaxed by 10% toward the floor on every successful send.
pub struct GlobalLimiter {
    inner: Mutex<GlobalInner>,
}

impl Default for GlobalLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalLimiter {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(GlobalInner {
                last_admit: None,
                min_interval: GLOBAL_INTERVAL_FLOOR,
            }),
        }
    }

    /// Admit if the current minimum interval has elapsed since the last admit.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().expect("limiter lock poisoned");
        let now = Instant::now();
        match inner.last_admit {
            Some(last) if now.duration_since(last) < inner.min_interval => false,
            _ => {
                inner.last_admit = Some(now);
                true
            }
        }
    }

    pub fn current_interval(&self) -> Duration {
        self.inner.lock().expect("limiter lock poisoned").min_interval
    }

    /// Raise the minimum interval in response to a rate-limit signal.
    ///
    /// Tiers: retry-after above an hour pins the interval at 60 s, above five
    /// minutes at 30 s, any other positive hint at `hint + 5 s` capped at 60 s,
    /// and a hintless signal at 5 s.
    pub fn escalate(&self, retry_after: Option<Duration>) {
        let new_interval = match retry_after {
            Some(ra) if ra > Duration::from_secs(3600) => Duration::from_secs(60),
            Some(ra) if ra > Duration::from_secs(300) => Duration::from_secs(30),
            Some(ra) if ra > Duration::ZERO => (ra + ESCALATION_DEFAULT).min(ESCALATION_CEILING),
            _ => ESCALATION_DEFAULT,
        };
        let mut inner = self.inner.lock().expect("limiter lock poisoned");
        inner.min_interval = new_interval;
    }

    /// Relax the interval by 10% toward the floor after a successful send.
    pub fn relax(&self) {
        let mut inner = self.inner.lock().expect("limiter lock poisoned");
        let relaxed = inner.min_interval.mul_f64(0.9);
        inner.min_interval = relaxed.max(GLOBAL_INTERVAL_FLOOR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_per_key_admits_once_per_period() {
        let limiter = PerKeyLimiter::new(Duration::from_secs(1));
        assert!(limiter.allow(100));
        assert!(!limiter.allow(100));
        // Separate key is independent
        assert!(limiter.allow(200));

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(limiter.allow(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_key_sweep_removes_idle() {
        let limiter = PerKeyLimiter::new(Duration::from_secs(1));
        assert!(limiter.allow(1));
        tokio::time::advance(Duration::from_secs(1800)).await;
        assert!(limiter.allow(2));
        let removed = limiter.sweep(Duration::from_secs(900));
        assert_eq!(removed, 1);
        // Swept key admits again immediately
        assert!(limiter.allow(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_denies_inside_interval() {
        let limiter = GlobalLimiter::new();
        assert!(limiter.allow());
        assert!(!limiter.allow());
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(limiter.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalation_tiers() {
        let limiter = GlobalLimiter::new();

        limiter.escalate(Some(Duration::from_secs(4000)));
        assert_eq!(limiter.current_interval(), Duration::from_secs(60));

        limiter.escalate(Some(Duration::from_secs(400)));
        assert_eq!(limiter.current_interval(), Duration::from_secs(30));

        limiter.escalate(Some(Duration::from_secs(20)));
        assert_eq!(limiter.current_interval(), Duration::from_secs(25));

        // hint + 5s is capped at the ceiling
        limiter.escalate(Some(Duration::from_secs(120)));
        assert_eq!(limiter.current_interval(), Duration::from_secs(60));

        limiter.escalate(None);
        assert_eq!(limiter.current_interval(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_relax_never_drops_below_floor() {
        let limiter = GlobalLimiter::new();
        limiter.escalate(None);
        for _ in 0..200 {
            limiter.relax();
        }
        assert_eq!(limiter.current_interval(), GLOBAL_INTERVAL_FLOOR);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relax_is_gradual() {
        let limiter = GlobalLimiter::new();
        limiter.escalate(Some(Duration::from_secs(400)));
        limiter.relax();
        assert_eq!(limiter.current_interval(), Duration::from_secs(27));
    }
}

//! Per-client GCRA rate limiting kept in process memory.
//!
//! Each client key gets its own governor cell with the configured sustained
//! rate and burst. A sweep that finds more than `max_tracked` clients
//! replaces the whole limiter, which briefly hands everyone a fresh burst.
//! Below the ceiling it only drops clients whose cell has fully replenished.

use std::num::NonZeroU32;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use domains::RateLimiter;
use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::keyed::DashMapStateStore;
use governor::Quota;
use tracing::{debug, info};

type KeyedLimiter<C> =
    governor::RateLimiter<String, DashMapStateStore<String>, C, NoOpMiddleware<<C as Clock>::Instant>>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitPolicy {
    /// Cells replenished per second.
    pub per_second: f64,
    /// Burst a new or idle client gets.
    pub burst: u32,
    /// Table size above which a sweep resets everything.
    pub max_tracked: usize,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            per_second: 15.0,
            burst: 40,
            max_tracked: 10_000,
        }
    }
}

impl RateLimitPolicy {
    /// Zero or non-finite values fall back to one cell per second and a
    /// burst of one; settings validation rejects them before this point.
    fn quota(&self) -> Quota {
        let burst = NonZeroU32::new(self.burst).unwrap_or(NonZeroU32::MIN);
        let period = if self.per_second.is_finite() && self.per_second > 0.0 {
            Duration::from_secs_f64(1.0 / self.per_second)
        } else {
            Duration::from_secs(1)
        };
        Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst)
    }
}

pub struct InMemoryRateLimiter<C: Clock = DefaultClock> {
    inner: RwLock<Arc<KeyedLimiter<C>>>,
    quota: Quota,
    clock: C,
    policy: RateLimitPolicy,
}

impl InMemoryRateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self::with_clock(policy, DefaultClock::default())
    }
}

impl<C: Clock + Clone> InMemoryRateLimiter<C> {
    pub fn with_clock(policy: RateLimitPolicy, clock: C) -> Self {
        let quota = policy.quota();
        Self {
            inner: RwLock::new(Arc::new(governor::RateLimiter::dashmap_with_clock(quota, clock.clone()))),
            quota,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    fn current(&self) -> Arc<KeyedLimiter<C>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn reset(&self) {
        let fresh = governor::RateLimiter::dashmap_with_clock(self.quota, self.clock.clone());
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(fresh);
    }
}

impl<C> RateLimiter for InMemoryRateLimiter<C>
where
    C: Clock + Clone + Send + Sync,
{
    fn allow(&self, client: &str) -> bool {
        match self.current().check_key(&client.to_string()) {
            Ok(()) => true,
            Err(_) => {
                debug!(client, "rate limit exceeded");
                false
            }
        }
    }

    fn sweep(&self) -> bool {
        let limiter = self.current();
        let tracked = limiter.len();
        if tracked > self.policy.max_tracked {
            self.reset();
            info!(tracked, ceiling = self.policy.max_tracked, "rate limiter table cleared");
            return true;
        }
        limiter.retain_recent();
        debug!(before = tracked, after = limiter.len(), "idle rate limit entries pruned");
        false
    }

    fn tracked(&self) -> usize {
        self.current().len()
    }
}

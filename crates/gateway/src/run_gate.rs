//! Pipeline run cooldown
//!
//! A new run is refused until `cooldown` has elapsed since the previous run
//! started. The window is a single-cell GCRA quota: one start per period, no
//! burst. The clock is a type parameter so tests can drive it by hand.

use governor::{
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use replylens_common::errors::{AppError, Result};
use std::num::NonZeroU32;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info};

type CooldownLimiter<C> = RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Cooldown gate shared by every run entry point
pub struct RunGate<C: Clock = DefaultClock> {
    cooldown: Duration,
    quota: Option<Quota>,
    clock: C,
    /// `None` when the cooldown is zero
    limiter: RwLock<Option<CooldownLimiter<C>>>,
}

impl RunGate {
    pub fn new(cooldown: Duration) -> Self {
        Self::with_clock(cooldown, DefaultClock::default())
    }
}

impl<C: Clock + Clone> RunGate<C> {
    pub fn with_clock(cooldown: Duration, clock: C) -> Self {
        let quota = Quota::with_period(cooldown).map(|q| q.allow_burst(NonZeroU32::MIN));
        let limiter = quota.map(|q| RateLimiter::direct_with_clock(q, clock.clone()));

        Self {
            cooldown,
            quota,
            clock,
            limiter: RwLock::new(limiter),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Consume the window if it is open, otherwise report the time left
    pub fn admit(&self) -> Result<()> {
        let limiter = self.limiter.read().unwrap_or_else(PoisonError::into_inner);
        let Some(limiter) = limiter.as_ref() else {
            return Ok(());
        };

        limiter.check().map_err(|not_until| {
            let retry_after = not_until.wait_time_from(self.clock.now());
            debug!(retry_after_ms = retry_after.as_millis() as u64, "Run refused by cooldown");
            AppError::Throttled { retry_after }
        })
    }

    /// Forget the previous run
    pub fn reset(&self) {
        let fresh = self
            .quota
            .map(|q| RateLimiter::direct_with_clock(q, self.clock.clone()));
        *self.limiter.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        info!("Run cooldown reset");
    }
}

//! Rate limiting for login attempts.
//!
//! One token bucket is shared by every worker so the cap applies to the whole
//! run, not to each worker.

use governor::{Quota, RateLimiter as GovLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

type DirectLimiter = GovLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Attempts-per-second limiter.
#[derive(Clone)]
pub struct RateLimiter {
    limiter: Arc<DirectLimiter>,
}

impl RateLimiter {
    /// Limit to `rate` attempts per second. A zero rate means unlimited and
    /// yields `None`.
    pub fn new(rate: u32) -> Option<Self> {
        let rate = NonZeroU32::new(rate)?;
        Some(Self {
            limiter: Arc::new(GovLimiter::direct(Quota::per_second(rate))),
        })
    }

    /// Wait until another attempt is allowed.
    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}

//! Per-client admission rate limiting.
//!
//! Token-bucket quota keyed by client IP via [`governor`]. Only the
//! admission endpoints (probe and download submission) consume tokens;
//! status polls, event streams, and fetches are unmetered.

use crate::error::Error;
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;

pub struct AdmissionLimiter {
    limiter: RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>,
}

impl AdmissionLimiter {
    pub fn new(per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::keyed(Quota::per_minute(per_minute)),
        }
    }

    /// Consume one admission token for `addr`.
    pub fn check(&self, addr: IpAddr) -> Result<(), Error> {
        self.limiter.check_key(&addr).map_err(|_| {
            tracing::debug!(%addr, "admission rate limit hit");
            Error::RateLimitExceeded
        })
    }
}

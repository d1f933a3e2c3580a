//! Token-bucket rate limiting for the business routes
//!
//! One process-wide bucket; a drained bucket answers 429 through the
//! standard error envelope rather than a bare status code.

use axum::{extract::Request, middleware::Next, response::Response};
use docharbor_common::errors::{AppError, Result};
use governor::{
    clock::QuantaClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Process-wide token bucket shared by all business routes
pub struct RequestLimiter {
    bucket: RateLimiter<NotKeyed, InMemoryState, QuantaClock>,
    limit: u32,
}

impl RequestLimiter {
    pub fn new(requests_per_second: u32, burst: u32) -> Arc<Self> {
        let per_second = NonZeroU32::new(requests_per_second.max(1)).unwrap();
        let burst = NonZeroU32::new(burst.max(1)).unwrap();

        Arc::new(Self {
            bucket: RateLimiter::direct(Quota::per_second(per_second).allow_burst(burst)),
            limit: per_second.get(),
        })
    }

    /// Take one token, or report the configured limit
    pub fn acquire(&self) -> Result<()> {
        self.bucket
            .check()
            .map_err(|_| AppError::RateLimited { limit: self.limit })
    }
}

/// Middleware wrapper around [`RequestLimiter::acquire`]
pub async fn rate_limit(
    request: Request,
    next: Next,
    limiter: Arc<RequestLimiter>,
) -> Result<Response> {
    limiter.acquire()?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_within_burst() {
        let limiter = RequestLimiter::new(100, 200);
        assert!(limiter.acquire().is_ok());
    }

    #[test]
    fn burst_exhaustion_reports_limit() {
        let limiter = RequestLimiter::new(1, 2);
        assert!(limiter.acquire().is_ok());
        assert!(limiter.acquire().is_ok());

        let err = limiter.acquire().unwrap_err();
        assert!(matches!(err, AppError::RateLimited { limit: 1 }));
    }
}

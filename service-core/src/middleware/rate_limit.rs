use crate::error::AppError;
use axum::{extract::ConnectInfo, http::Request};
use dashmap::DashMap;
use governor::{
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

/// A single lock-free GCRA bucket bound to clock `C`.
pub type DirectLimiter<C> =
    RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Token bucket parameters: continuous refill of `per_second` tokens, holding at most `burst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketConfig {
    per_second: NonZeroU32,
    burst: NonZeroU32,
}

impl BucketConfig {
    pub fn new(per_second: u32, burst: u32) -> Result<Self, AppError> {
        let per_second = NonZeroU32::new(per_second).ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!("rate limit refill rate must be non-zero"))
        })?;
        let burst = NonZeroU32::new(burst).ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!("rate limit burst must be non-zero"))
        })?;
        Ok(Self { per_second, burst })
    }

    pub fn per_second(&self) -> u32 {
        self.per_second.get()
    }

    pub fn burst(&self) -> u32 {
        self.burst.get()
    }

    fn quota(&self) -> Quota {
        Quota::per_second(self.per_second).allow_burst(self.burst)
    }
}

/// Independent buckets per key, created lazily and full on first use.
///
/// Lookups for existing keys only take a shard read lock; creation goes
/// through the map's entry API so concurrent first requests for one key
/// converge on a single bucket. Token accounting happens inside the bucket
/// with atomics, so unrelated keys never wait on each other.
pub struct KeyedRateLimiter<C: Clock = DefaultClock> {
    buckets: DashMap<String, Arc<DirectLimiter<C>>>,
    config: BucketConfig,
    clock: C,
}

impl KeyedRateLimiter<DefaultClock> {
    pub fn new(config: BucketConfig) -> Self {
        Self::with_clock(config, DefaultClock::default())
    }
}

impl<C: Clock> KeyedRateLimiter<C> {
    pub fn with_clock(config: BucketConfig, clock: C) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
            clock,
        }
    }

    /// Consume one token for `key`. On rejection returns how long until a token is available.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        let bucket = self.bucket(key);
        bucket
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    /// Number of buckets created so far. Buckets are never evicted.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn bucket(&self, key: &str) -> Arc<DirectLimiter<C>> {
        if let Some(existing) = self.buckets.get(key) {
            return Arc::clone(existing.value());
        }

        // Re-checked under the shard write lock held by `entry`.
        let entry = self.buckets.entry(key.to_owned()).or_insert_with(|| {
            tracing::debug!(key = %key, "Creating rate limit bucket");
            Arc::new(RateLimiter::direct_with_clock(self.config.quota(), &self.clock))
        });
        Arc::clone(entry.value())
    }
}

/// Resolve the caller's address, preferring the first `X-Forwarded-For` hop when trusted.
pub fn client_ip<B>(request: &Request<B>, trust_forwarded_for: bool) -> Option<IpAddr> {
    let forwarded = trust_forwarded_for
        .then(|| {
            request
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.split(',').next())
                .and_then(|s| s.trim().parse::<IpAddr>().ok())
        })
        .flatten();

    forwarded.or_else(|| {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use governor::clock::FakeRelativeClock;

    fn limiter(per_second: u32, burst: u32) -> (KeyedRateLimiter<FakeRelativeClock>, FakeRelativeClock) {
        let clock = FakeRelativeClock::default();
        let config = BucketConfig::new(per_second, burst).unwrap();
        (KeyedRateLimiter::with_clock(config, clock.clone()), clock)
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        assert!(BucketConfig::new(0, 10).is_err());
        assert!(BucketConfig::new(5, 0).is_err());
    }

    #[test]
    fn test_burst_then_refill() {
        let (limiter, clock) = limiter(5, 10);

        for _ in 0..10 {
            assert!(limiter.check("10.0.0.1").is_ok());
        }
        assert!(limiter.check("10.0.0.1").is_err());

        clock.advance(Duration::from_millis(200));
        assert!(limiter.check("10.0.0.1").is_ok());
        assert!(limiter.check("10.0.0.1").is_err());
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _clock) = limiter(1, 1);

        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("a").is_err());
        assert!(limiter.check("b").is_ok());
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn test_rejection_reports_wait_time() {
        let (limiter, _clock) = limiter(5, 1);

        assert!(limiter.check("k").is_ok());
        let wait = limiter.check("k").unwrap_err();
        assert_eq!(wait, Duration::from_millis(200));
    }

    #[test]
    fn test_client_ip_prefers_trusted_forwarded_header() {
        let mut request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 5000))));

        assert_eq!(
            client_ip(&request, true),
            Some("203.0.113.7".parse().unwrap())
        );
        assert_eq!(
            client_ip(&request, false),
            Some("127.0.0.1".parse().unwrap())
        );
    }
}

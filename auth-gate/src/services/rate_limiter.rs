use governor::clock::{Clock, DefaultClock};
use service_core::error::AppError;
use service_core::middleware::rate_limit::{BucketConfig, KeyedRateLimiter};

use crate::config::RateLimitConfig;
use crate::services::error::GateError;

/// Keyspace a request is throttled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Remote address; applies to every request.
    Ip,
    /// Authenticated identity id.
    Identity,
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Ip => write!(f, "ip"),
            Scope::Identity => write!(f, "identity"),
        }
    }
}

/// Two independent keyed token-bucket limiters, one per [`Scope`].
pub struct RateLimiter<C: Clock = DefaultClock> {
    ip: KeyedRateLimiter<C>,
    identity: KeyedRateLimiter<C>,
}

impl RateLimiter<DefaultClock> {
    pub fn new(config: &RateLimitConfig) -> Result<Self, AppError> {
        Self::with_clock(config, DefaultClock::default())
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(config: &RateLimitConfig, clock: C) -> Result<Self, AppError> {
        Ok(Self::from_buckets(
            config.ip_bucket()?,
            config.identity_bucket()?,
            clock,
        ))
    }

    pub fn from_buckets(ip: BucketConfig, identity: BucketConfig, clock: C) -> Self {
        Self {
            ip: KeyedRateLimiter::with_clock(ip, clock.clone()),
            identity: KeyedRateLimiter::with_clock(identity, clock),
        }
    }

    /// Consume one token from the bucket for `key`; false when it is empty.
    pub fn allow(&self, scope: Scope, key: &str) -> bool {
        self.limiter(scope).check(key).is_ok()
    }

    /// Like [`allow`](Self::allow) but reports the rejection as `RateLimited`.
    pub fn check(&self, scope: Scope, key: &str) -> Result<(), GateError> {
        self.limiter(scope).check(key).map_err(|retry_after| {
            tracing::warn!(%scope, key = %key, ?retry_after, "Rate limit exceeded");
            GateError::RateLimited { scope, retry_after }
        })
    }

    /// Buckets created so far in `scope`.
    pub fn tracked_keys(&self, scope: Scope) -> usize {
        self.limiter(scope).len()
    }

    fn limiter(&self, scope: Scope) -> &KeyedRateLimiter<C> {
        match scope {
            Scope::Ip => &self.ip,
            Scope::Identity => &self.identity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::clock::FakeRelativeClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn limiter() -> (RateLimiter<FakeRelativeClock>, FakeRelativeClock) {
        let clock = FakeRelativeClock::default();
        let limiter = RateLimiter::with_clock(&RateLimitConfig::default(), clock.clone()).unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_ip_scope_burst_and_refill() {
        let (limiter, clock) = limiter();

        let allowed = (0..11).filter(|_| limiter.allow(Scope::Ip, "10.0.0.1")).count();
        assert_eq!(allowed, 10);

        clock.advance(Duration::from_millis(200));
        assert!(limiter.allow(Scope::Ip, "10.0.0.1"));
        assert!(!limiter.allow(Scope::Ip, "10.0.0.1"));
    }

    #[test]
    fn test_identity_scope_uses_its_own_quota() {
        let (limiter, clock) = limiter();
        let id = "01HZX3J7Q4V3N8K2M5P6R7S8T9";

        let allowed = (0..20).filter(|_| limiter.allow(Scope::Identity, id)).count();
        assert_eq!(allowed, 15);

        // 10/s refills one token every 100ms.
        clock.advance(Duration::from_millis(100));
        assert!(limiter.allow(Scope::Identity, id));
        assert!(!limiter.allow(Scope::Identity, id));
    }

    #[test]
    fn test_scopes_do_not_share_buckets() {
        let (limiter, _clock) = limiter();
        for _ in 0..10 {
            assert!(limiter.allow(Scope::Ip, "same-key"));
        }
        assert!(!limiter.allow(Scope::Ip, "same-key"));
        assert!(limiter.allow(Scope::Identity, "same-key"));
    }

    #[test]
    fn test_check_reports_scope_and_wait() {
        let (limiter, _clock) = limiter();
        for _ in 0..10 {
            limiter.check(Scope::Ip, "k").unwrap();
        }
        match limiter.check(Scope::Ip, "k") {
            Err(GateError::RateLimited { scope, retry_after }) => {
                assert_eq!(scope, Scope::Ip);
                assert_eq!(retry_after, Duration::from_millis(200));
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn test_concurrent_first_use_creates_one_bucket() {
        let (limiter, _clock) = limiter();
        let allowed = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..4 {
                        if limiter.allow(Scope::Ip, "192.0.2.1") {
                            allowed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(limiter.tracked_keys(Scope::Ip), 1);
        assert_eq!(allowed.load(Ordering::SeqCst), 10);
    }
}

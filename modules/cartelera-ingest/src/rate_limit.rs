//! Per-domain rate limiting with escalating backoff.
//!
//! The single gate for outbound requests to third-party hosts: every fetcher,
//! detail fetch, and image query goes through `acquire` before touching the
//! network. Rate-limit signals (HTTP 429/403, transport failures) escalate a
//! per-domain backoff level; successes decay it.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub const MAX_BACKOFF_LEVEL: u8 = 5;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: Duration::from_secs(2),
        }
    }
}

impl RateLimitConfig {
    /// For official APIs that tolerate a faster cadence.
    pub fn api_friendly() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            jitter: Duration::from_millis(500),
            ..Self::default()
        }
    }

    /// Deterministic part of the delay: `base * multiplier^level`, capped.
    pub fn delay_for_level(&self, level: u8) -> Duration {
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(level as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

#[derive(Debug, Default)]
struct DomainState {
    /// When the next request to this domain may start.
    next_allowed: Option<Instant>,
    backoff_level: u8,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    domains: Mutex<HashMap<String, DomainState>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            domains: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until a request to `url`'s host is allowed, then reserve the slot.
    /// Concurrent callers for the same domain serialize; other domains are
    /// unaffected (the map lock is never held across the sleep).
    pub async fn acquire(&self, url: &str) {
        let domain = extract_domain(url);
        let wait = {
            let mut domains = self.domains.lock().await;
            let state = domains.entry(domain.clone()).or_default();
            let now = Instant::now();

            let jitter = rand::rng().random_range(0.0..=self.config.jitter.as_secs_f64());
            let delay =
                self.config.delay_for_level(state.backoff_level) + Duration::from_secs_f64(jitter);

            let start = match state.next_allowed {
                Some(next) if next > now => next,
                _ => now,
            };
            state.next_allowed = Some(start + delay);
            start.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            debug!(domain = %domain, wait_ms = wait.as_millis() as u64, "rate limit wait");
            tokio::time::sleep(wait).await;
        }
    }

    /// Decay the backoff level after a successful request.
    pub async fn on_success(&self, url: &str) {
        let domain = extract_domain(url);
        let mut domains = self.domains.lock().await;
        if let Some(state) = domains.get_mut(&domain) {
            state.backoff_level = state.backoff_level.saturating_sub(1);
        }
    }

    /// Escalate after a 429/403 or transport failure.
    pub async fn on_rate_limited(&self, url: &str) {
        let domain = extract_domain(url);
        let mut domains = self.domains.lock().await;
        let state = domains.entry(domain.clone()).or_default();
        state.backoff_level = (state.backoff_level + 1).min(MAX_BACKOFF_LEVEL);
        tracing::warn!(
            domain = %domain,
            backoff_level = state.backoff_level,
            "rate limited, escalating backoff"
        );
    }

    pub async fn backoff_level(&self, url: &str) -> u8 {
        let domain = extract_domain(url);
        let domains = self.domains.lock().await;
        domains.get(&domain).map(|s| s.backoff_level).unwrap_or(0)
    }
}

/// Extract the host from a URL for rate-limit bucketing.
pub fn extract_domain(url: &str) -> String {
    url.split("://")
        .nth(1)
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or("")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> RateLimitConfig {
        RateLimitConfig {
            base_delay: Duration::from_millis(40),
            multiplier: 2.0,
            max_delay: Duration::from_millis(500),
            jitter: Duration::from_millis(0),
        }
    }

    #[test]
    fn delay_formula_escalates_and_caps() {
        let config = RateLimitConfig {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: Duration::from_secs(2),
        };
        assert_eq!(config.delay_for_level(0), Duration::from_secs(2));
        assert_eq!(config.delay_for_level(1), Duration::from_secs(4));
        assert_eq!(config.delay_for_level(3), Duration::from_secs(16));
        // 2 * 2^5 = 64 > 60: capped.
        assert_eq!(config.delay_for_level(5), Duration::from_secs(60));
    }

    #[test]
    fn domain_extraction() {
        assert_eq!(
            extract_domain("https://Datos.Madrid.es/egob/catalogo.json"),
            "datos.madrid.es"
        );
        assert_eq!(extract_domain("datos.madrid.es"), "datos.madrid.es");
    }

    #[tokio::test]
    async fn backoff_escalates_then_decays() {
        let limiter = RateLimiter::new(fast_config());
        let url = "https://example.es/api";

        limiter.on_rate_limited(url).await;
        limiter.on_rate_limited(url).await;
        assert_eq!(limiter.backoff_level(url).await, 2);

        limiter.on_success(url).await;
        assert_eq!(limiter.backoff_level(url).await, 1);
    }

    #[tokio::test]
    async fn backoff_level_is_bounded() {
        let limiter = RateLimiter::new(fast_config());
        let url = "https://example.es/api";
        for _ in 0..10 {
            limiter.on_rate_limited(url).await;
        }
        assert_eq!(limiter.backoff_level(url).await, MAX_BACKOFF_LEVEL);

        for _ in 0..10 {
            limiter.on_success(url).await;
        }
        assert_eq!(limiter.backoff_level(url).await, 0);
    }

    #[tokio::test]
    async fn requests_to_one_domain_are_spaced() {
        let limiter = RateLimiter::new(fast_config());
        let url = "https://example.es/api";

        let start = std::time::Instant::now();
        limiter.acquire(url).await;
        limiter.acquire(url).await;
        limiter.acquire(url).await;
        let elapsed = start.elapsed();

        // Each acquire reserves base_delay (40ms, no jitter): the third call
        // cannot start before ~80ms.
        assert!(elapsed >= Duration::from_millis(75), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn different_domains_do_not_block_each_other() {
        let limiter = RateLimiter::new(fast_config());

        let start = std::time::Instant::now();
        limiter.acquire("https://a.example.es/x").await;
        limiter.acquire("https://b.example.es/x").await;
        let elapsed = start.elapsed();

        assert!(elapsed < Duration::from_millis(35), "elapsed {elapsed:?}");
    }
}

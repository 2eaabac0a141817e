//! Credential rotation for surviving per-key rate limits.
//!
//! One [`CredentialPool`] exists per provider, shared by every caller. When
//! a backend rejects a key with a rate-limit error, the caller marks it
//! exhausted and the pool advances a circular cursor to the next key.
//! Exhausted flags are informational and never expire for the life of the
//! process; rotation is purely positional. The pool size bounds how many
//! times a caller should retry -- once the cursor has cycled, every key has
//! been tried.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::config::{ApiKey, CredentialsConfig};

/// Per-provider pool of interchangeable credentials with a rotation cursor.
pub struct CredentialPool {
    provider: String,
    keys: Vec<ApiKey>,
    state: Mutex<PoolState>,
}

struct PoolState {
    cursor: usize,
    exhausted: HashSet<usize>,
}

impl CredentialPool {
    /// Create a pool for `provider` over `keys`, cursor at the first key.
    pub fn new(provider: impl Into<String>, keys: Vec<ApiKey>) -> Self {
        let provider = provider.into();
        if keys.is_empty() {
            tracing::warn!(provider = %provider, "no credentials provided for pool");
        }
        Self {
            provider,
            keys,
            state: Mutex::new(PoolState {
                cursor: 0,
                exhausted: HashSet::new(),
            }),
        }
    }

    /// Build a pool from its config section.
    pub fn from_config(config: &CredentialsConfig) -> Self {
        Self::new(config.provider.clone(), config.keys.clone())
    }

    /// Provider this pool belongs to.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Number of credentials in the pool (exhausted ones included).
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of credentials flagged exhausted so far.
    pub fn exhausted_count(&self) -> usize {
        self.state.lock().unwrap().exhausted.len()
    }

    /// The credential under the cursor, if any.
    pub fn current(&self) -> Option<ApiKey> {
        let state = self.state.lock().unwrap();
        self.keys.get(state.cursor).cloned()
    }

    /// Advance the cursor to the next credential (circular). No-op for pools
    /// of zero or one entries.
    pub fn rotate(&self) -> Option<ApiKey> {
        if self.keys.len() <= 1 {
            tracing::warn!(
                provider = %self.provider,
                "no alternative credentials available"
            );
            return self.current();
        }

        let mut state = self.state.lock().unwrap();
        let old_prefix = self.keys[state.cursor].prefix();
        state.cursor = (state.cursor + 1) % self.keys.len();
        let new_key = self.keys[state.cursor].clone();

        tracing::info!(
            provider = %self.provider,
            old_key_prefix = %old_prefix,
            new_key_prefix = %new_key.prefix(),
            key_index = state.cursor,
            "rotating credential"
        );
        Some(new_key)
    }

    /// Flag `key` as exhausted (rate-limited) and rotate to the next
    /// credential.
    pub fn mark_exhausted(&self, key: &ApiKey) {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(index) = self
                .keys
                .iter()
                .position(|k| k.expose_secret() == key.expose_secret())
            {
                state.exhausted.insert(index);
            }
        }
        tracing::warn!(
            provider = %self.provider,
            key_prefix = %key.prefix(),
            "credential marked exhausted"
        );
        self.rotate();
    }
}

/// Trait for classifying an error as a rate limit.
///
/// Lets the retry loop inspect caller-defined error types without depending
/// on any transport.
pub trait RateLimited {
    fn is_rate_limited(&self) -> bool;
}

/// Heuristic rate-limit check on a raw provider error: an HTTP 429 status,
/// or a message mentioning the limit.
pub fn looks_rate_limited(status: Option<u16>, message: &str) -> bool {
    if status == Some(429) {
        return true;
    }
    let lower = message.to_lowercase();
    lower.contains("rate limit") || lower.contains("429")
}

/// Run `send` with the pool's current credential, rotating on rate-limit
/// errors, for at most `pool.len()` attempts.
///
/// Once every credential has been tried the cursor has cycled back to an
/// exhausted key and the last rate-limit error is returned. Non-rate-limit
/// errors are returned immediately without rotating.
pub async fn call_with_rotation<T, E, F, Fut>(pool: &CredentialPool, send: F) -> Result<T, E>
where
    E: RateLimited,
    F: Fn(ApiKey) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    assert!(
        !pool.is_empty(),
        "call_with_rotation requires at least one credential"
    );

    let max_attempts = pool.len();
    let mut last_error: Option<E> = None;

    for attempt in 0..max_attempts {
        let key = pool.current().expect("non-empty pool has a current credential");

        match send(key.clone()).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_rate_limited() => {
                tracing::warn!(
                    provider = %pool.provider(),
                    attempt,
                    remaining = max_attempts - attempt - 1,
                    "rate limited, rotating credential"
                );
                pool.mark_exhausted(&key);
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    // Every credential was tried and rate-limited.
    Err(last_error.expect("at least one attempt was made"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn pool_of(provider: &str, keys: &[&str]) -> CredentialPool {
        CredentialPool::new(provider, keys.iter().map(|k| ApiKey::from(*k)).collect())
    }

    /// Mock error type for the rotation loop.
    #[derive(Debug)]
    struct MockError {
        rate_limited: bool,
    }

    impl RateLimited for MockError {
        fn is_rate_limited(&self) -> bool {
            self.rate_limited
        }
    }

    #[test]
    fn test_exhaustion_cycles_through_pool() {
        let pool = pool_of("groq", &["k1", "k2", "k3"]);
        assert_eq!(pool.current().unwrap().expose_secret(), "k1");

        pool.mark_exhausted(&ApiKey::from("k1"));
        assert_eq!(pool.current().unwrap().expose_secret(), "k2");

        pool.mark_exhausted(&ApiKey::from("k2"));
        assert_eq!(pool.current().unwrap().expose_secret(), "k3");

        // Cycles back to the first key.
        pool.mark_exhausted(&ApiKey::from("k3"));
        assert_eq!(pool.current().unwrap().expose_secret(), "k1");
        assert_eq!(pool.exhausted_count(), 3);
    }

    #[test]
    fn test_pool_from_config_section() {
        let config = crate::config::Config::parse_str(
            r#"
            [[credentials]]
            provider = "groq"
            keys = ["k1", "k2"]
        "#,
        )
        .unwrap();

        let pool = CredentialPool::from_config(&config.credentials[0]);
        assert_eq!(pool.provider(), "groq");
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.current().unwrap().expose_secret(), "k1");
    }

    #[test]
    fn test_empty_pool_has_no_current() {
        let pool = pool_of("groq", &[]);
        assert!(pool.current().is_none());
        assert!(pool.rotate().is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_single_key_rotation_is_noop() {
        let pool = pool_of("groq", &["only"]);
        assert_eq!(pool.rotate().unwrap().expose_secret(), "only");
        assert_eq!(pool.current().unwrap().expose_secret(), "only");
    }

    #[test]
    fn test_rotate_advances_and_wraps() {
        let pool = pool_of("groq", &["k1", "k2"]);
        assert_eq!(pool.rotate().unwrap().expose_secret(), "k2");
        assert_eq!(pool.rotate().unwrap().expose_secret(), "k1");
    }

    #[test]
    fn test_mark_exhausted_unknown_key_still_rotates() {
        let pool = pool_of("groq", &["k1", "k2"]);
        pool.mark_exhausted(&ApiKey::from("not-in-pool"));
        assert_eq!(pool.current().unwrap().expose_secret(), "k2");
        assert_eq!(pool.exhausted_count(), 0);
    }

    #[test]
    fn test_looks_rate_limited() {
        assert!(looks_rate_limited(Some(429), "Too Many Requests"));
        assert!(looks_rate_limited(None, "Rate limit exceeded, retry later"));
        assert!(looks_rate_limited(None, "upstream returned 429"));
        assert!(!looks_rate_limited(Some(500), "Internal Server Error"));
        assert!(!looks_rate_limited(None, "connection refused"));
    }

    #[tokio::test]
    async fn test_rotation_success_first_attempt() {
        let pool = pool_of("groq", &["k1", "k2", "k3"]);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_inner = calls.clone();

        let result: Result<String, MockError> = call_with_rotation(&pool, |key| {
            let calls = calls_inner.clone();
            async move {
                calls.fetch_add(1, Ordering::Relaxed);
                assert_eq!(key.expose_secret(), "k1");
                Ok("done".to_string())
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(pool.current().unwrap().expose_secret(), "k1");
    }

    #[tokio::test]
    async fn test_rotation_retries_on_rate_limit() {
        let pool = pool_of("groq", &["k1", "k2", "k3"]);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_inner = calls.clone();

        let result: Result<String, MockError> = call_with_rotation(&pool, |key| {
            let calls = calls_inner.clone();
            async move {
                calls.fetch_add(1, Ordering::Relaxed);
                if key.expose_secret() == "k3" {
                    Ok("recovered".to_string())
                } else {
                    Err(MockError { rate_limited: true })
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::Relaxed), 3);
        assert_eq!(pool.exhausted_count(), 2);
    }

    #[tokio::test]
    async fn test_rotation_bounded_by_pool_size() {
        let pool = pool_of("groq", &["k1", "k2", "k3"]);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_inner = calls.clone();

        let result: Result<String, MockError> = call_with_rotation(&pool, |_key| {
            let calls = calls_inner.clone();
            async move {
                calls.fetch_add(1, Ordering::Relaxed);
                Err(MockError { rate_limited: true })
            }
        })
        .await;

        assert!(result.unwrap_err().is_rate_limited());
        // One attempt per credential, then stop: the cursor has cycled.
        assert_eq!(calls.load(Ordering::Relaxed), 3);
        assert_eq!(pool.exhausted_count(), 3);
        assert_eq!(pool.current().unwrap().expose_secret(), "k1");
    }

    #[tokio::test]
    async fn test_rotation_stops_on_other_errors() {
        let pool = pool_of("groq", &["k1", "k2", "k3"]);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_inner = calls.clone();

        let result: Result<String, MockError> = call_with_rotation(&pool, |_key| {
            let calls = calls_inner.clone();
            async move {
                calls.fetch_add(1, Ordering::Relaxed);
                Err(MockError {
                    rate_limited: false,
                })
            }
        })
        .await;

        assert!(!result.unwrap_err().is_rate_limited());
        // Non-rate-limit errors fail immediately, no rotation.
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(pool.current().unwrap().expose_secret(), "k1");
    }
}

//! Circuit breaker state machine for per-model health tracking.
//!
//! Implements the Closed -> Open -> Half-Open -> Closed lifecycle:
//! - **Closed**: requests flow normally, consecutive failures are counted
//! - **Open**: requests are rejected until the recovery window elapses
//! - **Half-Open**: traffic is re-admitted to test recovery; every caller is
//!   let through (no single-probe permit), and the consecutive-failure
//!   counter carries over so one more failure re-opens the circuit
//!
//! This module contains:
//! - Core state machine (`BreakerInner`)
//! - Concurrent registry (`BreakerRegistry`) backed by DashMap with lazy
//!   per-model creation
//!
//! Thresholds are supplied once at registry construction and applied
//! uniformly to every breaker. A success slower than the latency ceiling is
//! folded into the failure path: a slow model is an unreliable model.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::BreakerConfig;

/// The three states of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation. Requests flow through, failures are counted.
    Closed,
    /// Circuit tripped. Requests are blocked until the recovery window elapses.
    Open,
    /// Recovery test. Requests are admitted; outcome decides Open or Closed.
    HalfOpen,
}

impl CircuitState {
    /// Lowercase string representation for logs and JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Read-only snapshot of a single model's breaker, for the health surface.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerMetrics {
    pub model_id: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_latency_fallbacks: u64,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
}

/// Core circuit breaker state machine (not thread-safe on its own).
///
/// [`BreakerRegistry`] wraps each instance in a `Mutex` for concurrent
/// access.
struct BreakerInner {
    /// Current circuit state.
    state: CircuitState,
    /// Consecutive failure count. Reset only by a fast success, NOT by the
    /// Open -> HalfOpen transition, so a single Half-Open failure re-opens.
    failure_count: u32,
    /// When the last failure was recorded (monotonic; drives the recovery
    /// window).
    last_failure_at: Option<Instant>,
    /// Wall-clock time of the last failure, for observability.
    last_failure_wall: Option<DateTime<Utc>>,
    /// Wall-clock time of the last success, for observability.
    last_success_wall: Option<DateTime<Utc>>,
    /// Cumulative requests observed (successes and failures).
    total_requests: u64,
    /// Cumulative failures observed.
    total_failures: u64,
    /// Cumulative successes that breached the latency ceiling.
    total_latency_fallbacks: u64,
}

impl BreakerInner {
    /// Create a new circuit breaker in the Closed state.
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            last_failure_wall: None,
            last_success_wall: None,
            total_requests: 0,
            total_failures: 0,
            total_latency_fallbacks: 0,
        }
    }

    /// Check whether a request should be allowed through.
    ///
    /// Implements the lazy Open -> Half-Open transition once the recovery
    /// window (measured from the last failure) has elapsed. The transition
    /// is a side effect of the check itself.
    fn should_allow(&mut self, model_id: &str, recovery_timeout: Duration) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if let Some(failed_at) = self.last_failure_at {
                    let elapsed = Instant::now().duration_since(failed_at);
                    if elapsed >= recovery_timeout {
                        self.state = CircuitState::HalfOpen;
                        tracing::info!(
                            model = %model_id,
                            elapsed_seconds = elapsed.as_secs(),
                            "circuit entering half-open: recovery window elapsed"
                        );
                        return true;
                    }
                }
                false
            }
            // Every caller is admitted while half-open; the shared failure
            // counter decides whether the circuit re-opens.
            CircuitState::HalfOpen => true,
        }
    }

    /// Record a completed request with its latency.
    ///
    /// A success above the latency ceiling is a reliability signal and takes
    /// the failure path; a fast success resets the breaker to Closed.
    fn record_success(&mut self, model_id: &str, latency_ms: u64, config: &BreakerConfig) {
        if latency_ms > config.latency_threshold_ms {
            self.total_latency_fallbacks += 1;
            tracing::warn!(
                model = %model_id,
                latency_ms,
                threshold_ms = config.latency_threshold_ms,
                "latency ceiling exceeded, counting as failure"
            );
            self.record_failure(
                model_id,
                &format!("latency_exceeded_{}ms", latency_ms),
                config.failure_threshold,
            );
            return;
        }

        self.total_requests += 1;
        self.failure_count = 0;
        self.state = CircuitState::Closed;
        self.last_success_wall = Some(Utc::now());

        tracing::debug!(
            model = %model_id,
            latency_ms,
            "circuit breaker: success recorded, failure count reset"
        );
    }

    /// Record a failure. Opens the circuit once the consecutive count
    /// reaches the threshold; in Half-Open the carried-over count means a
    /// single failure is enough.
    fn record_failure(&mut self, model_id: &str, reason: &str, failure_threshold: u32) {
        self.total_requests += 1;
        self.total_failures += 1;
        self.failure_count += 1;
        self.last_failure_at = Some(Instant::now());
        self.last_failure_wall = Some(Utc::now());

        if self.failure_count >= failure_threshold {
            self.state = CircuitState::Open;
            tracing::warn!(
                model = %model_id,
                failures = self.failure_count,
                reason = %reason,
                "circuit OPENED: consecutive failure threshold reached"
            );
        } else {
            tracing::debug!(
                model = %model_id,
                failures = %format!("{}/{}", self.failure_count, failure_threshold),
                reason = %reason,
                "circuit breaker: failure recorded"
            );
        }
    }

    /// Read-only metrics snapshot. Never mutates.
    fn metrics(&self, model_id: &str) -> BreakerMetrics {
        BreakerMetrics {
            model_id: model_id.to_string(),
            state: self.state,
            failure_count: self.failure_count,
            total_requests: self.total_requests,
            total_failures: self.total_failures,
            total_latency_fallbacks: self.total_latency_fallbacks,
            last_failure: self.last_failure_wall,
            last_success: self.last_success_wall,
        }
    }
}

/// Concurrent circuit breaker registry with one breaker per model id.
///
/// Backed by [`DashMap`] for per-shard locking (no cross-model contention).
/// Breakers are created lazily on first reference and live for the process
/// lifetime. Locks are never held across an await point.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<String, Mutex<BreakerInner>>,
}

impl BreakerRegistry {
    /// Create an empty registry. `config` applies uniformly to every breaker.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Run `f` against the model's breaker, creating it lazily.
    fn with_breaker<R>(&self, model_id: &str, f: impl FnOnce(&mut BreakerInner) -> R) -> R {
        let entry = self
            .breakers
            .entry(model_id.to_string())
            .or_insert_with(|| Mutex::new(BreakerInner::new()));
        let mut inner = entry.lock().unwrap();
        f(&mut inner)
    }

    /// Check whether a request to `model_id` should proceed. May transition
    /// the breaker Open -> HalfOpen as a side effect.
    pub fn should_allow(&self, model_id: &str) -> bool {
        let recovery = Duration::from_secs(self.config.recovery_timeout_seconds);
        self.with_breaker(model_id, |inner| inner.should_allow(model_id, recovery))
    }

    /// Record a completed request for `model_id`. Slow successes count as
    /// failures. Infallible bookkeeping.
    pub fn record_success(&self, model_id: &str, latency_ms: u64) {
        self.with_breaker(model_id, |inner| {
            inner.record_success(model_id, latency_ms, &self.config)
        });
    }

    /// Record a failed request for `model_id`. Infallible bookkeeping.
    pub fn record_failure(&self, model_id: &str, reason: &str) {
        self.with_breaker(model_id, |inner| {
            inner.record_failure(model_id, reason, self.config.failure_threshold)
        });
    }

    /// Metrics snapshot for one model (creating its breaker if unseen).
    pub fn metrics(&self, model_id: &str) -> BreakerMetrics {
        self.with_breaker(model_id, |inner| inner.metrics(model_id))
    }

    /// Snapshot of every tracked breaker.
    ///
    /// Uses DashMap::iter() which acquires per-shard locks (not a global
    /// lock); the result is consistent per breaker, not across breakers.
    pub fn all_metrics(&self) -> Vec<BreakerMetrics> {
        self.breakers
            .iter()
            .map(|entry| entry.value().lock().unwrap().metrics(entry.key()))
            .collect()
    }

    /// Current state of one model's breaker, if it has been seen.
    pub fn state(&self, model_id: &str) -> Option<CircuitState> {
        self.breakers
            .get(model_id)
            .map(|entry| entry.value().lock().unwrap().state)
    }

    /// Number of models with a tracked breaker.
    pub fn tracked_models(&self) -> usize {
        self.breakers.len()
    }

    /// Number of breakers currently Open.
    pub fn open_count(&self) -> usize {
        self.breakers
            .iter()
            .filter(|entry| entry.value().lock().unwrap().state == CircuitState::Open)
            .count()
    }

    /// Thresholds this registry applies to its breakers.
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }
}

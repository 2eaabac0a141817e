//! Task routing and outcome bookkeeping.
//!
//! The router is the orchestration point: it looks up the task's fallback
//! chain in the catalog, consults each model's circuit breaker, and hands
//! back the first model that is accepting traffic. The caller performs the
//! actual backend call and reports the outcome back in, exactly once per
//! attempt. Routing and reporting never fail: the router prefers steering a
//! request at a known-bad primary over refusing to answer.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use super::circuit_breaker::{BreakerMetrics, BreakerRegistry, CircuitState};
use crate::catalog::{Catalog, ModelSpec, TaskType};
use crate::config::BreakerConfig;

/// Why a routing decision landed on its model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    /// The task's primary model was healthy.
    Primary,
    /// The primary circuit was open; a fallback was selected.
    PrimaryCircuitOpen,
    /// Every model in the chain was blocked; the primary is returned anyway.
    AllCircuitsOpenForcedPrimary,
}

impl RouteReason {
    /// Lowercase string representation for logs and JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteReason::Primary => "primary",
            RouteReason::PrimaryCircuitOpen => "primary_circuit_open",
            RouteReason::AllCircuitsOpenForcedPrimary => "all_circuits_open_forced_primary",
        }
    }
}

/// Result of one routing decision. Created fresh per call.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingResult {
    /// The selected model.
    pub model: ModelSpec,
    /// Whether a fallback was chosen over the primary.
    pub is_fallback: bool,
    /// Position in the chain: 0 = primary, 1 = first fallback, ...
    pub fallback_level: u32,
    pub reason: RouteReason,
}

/// Default call parameters for a task, bundled from a fresh routing decision.
#[derive(Debug, Clone, Serialize)]
pub struct ModelParams {
    pub model_id: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

/// Health snapshot across every model the router has seen.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// False iff at least one tracked circuit is open.
    pub healthy: bool,
    pub total_models_tracked: usize,
    pub circuits_open: usize,
    pub circuits: BTreeMap<String, BreakerMetrics>,
}

/// Routes tasks to models through the catalog and per-model breakers.
///
/// Construct one at process start and share it (`Arc`) across request
/// handlers; all interior state is synchronized.
pub struct ModelRouter {
    catalog: Arc<Catalog>,
    breakers: BreakerRegistry,
}

impl ModelRouter {
    /// Create a router over `catalog`, with `breakers` thresholds applied to
    /// every model's circuit.
    pub fn new(catalog: Arc<Catalog>, breakers: BreakerConfig) -> Self {
        tracing::info!(
            failure_threshold = breakers.failure_threshold,
            recovery_timeout_s = breakers.recovery_timeout_seconds,
            latency_threshold_ms = breakers.latency_threshold_ms,
            "model router initialized"
        );
        Self {
            catalog,
            breakers: BreakerRegistry::new(breakers),
        }
    }

    /// Pick a model for `task`.
    ///
    /// Primary first; otherwise the first fallback whose circuit admits
    /// traffic, tagged with its 1-based tier. When the whole chain is
    /// blocked the primary is returned anyway with a distinct reason --
    /// routing never refuses.
    pub fn route(&self, task: TaskType) -> RoutingResult {
        let mapping = self.catalog.mapping_for(task);

        if self.breakers.should_allow(&mapping.primary.model_id) {
            return RoutingResult {
                model: mapping.primary.clone(),
                is_fallback: false,
                fallback_level: 0,
                reason: RouteReason::Primary,
            };
        }

        for (i, fallback) in mapping.fallbacks.iter().enumerate() {
            if self.breakers.should_allow(&fallback.model_id) {
                tracing::info!(
                    task = %task,
                    primary = %mapping.primary.model_id,
                    fallback = %fallback.model_id,
                    fallback_level = i + 1,
                    "routing to fallback model"
                );
                return RoutingResult {
                    model: fallback.clone(),
                    is_fallback: true,
                    fallback_level: (i + 1) as u32,
                    reason: RouteReason::PrimaryCircuitOpen,
                };
            }
        }

        tracing::error!(
            task = %task,
            primary = %mapping.primary.model_id,
            "every model in the fallback chain is blocked, forcing primary"
        );
        RoutingResult {
            model: mapping.primary.clone(),
            is_fallback: false,
            fallback_level: 0,
            reason: RouteReason::AllCircuitsOpenForcedPrimary,
        }
    }

    /// Report a completed call. Fire-and-forget bookkeeping; never fails the
    /// caller's request path. Latencies above the ceiling count as failures.
    pub fn record_success(&self, model_id: &str, latency_ms: u64) {
        self.breakers.record_success(model_id, latency_ms);
    }

    /// Report a failed call. Fire-and-forget bookkeeping; never fails the
    /// caller's request path.
    pub fn record_failure(&self, model_id: &str, reason: &str) {
        self.breakers.record_failure(model_id, reason);
    }

    /// The task's instruction template, if one is configured.
    pub fn system_prompt_for(&self, task: TaskType) -> Option<&str> {
        self.catalog
            .mapping_for(task)
            .instruction_template
            .as_deref()
    }

    /// Default call parameters for `task`, from a fresh routing decision.
    pub fn params_for(&self, task: TaskType) -> ModelParams {
        let result = self.route(task);
        ModelParams {
            model_id: result.model.model_id,
            temperature: result.model.default_temperature,
            max_tokens: result.model.max_tokens,
            stream: false,
        }
    }

    /// Metrics snapshot for one model (its breaker is created if unseen).
    pub fn breaker_metrics(&self, model_id: &str) -> BreakerMetrics {
        self.breakers.metrics(model_id)
    }

    /// Health snapshot across all tracked models. `healthy` is false iff at
    /// least one circuit is open at the moment of the call.
    pub fn health_status(&self) -> HealthStatus {
        let circuits: BTreeMap<String, BreakerMetrics> = self
            .breakers
            .all_metrics()
            .into_iter()
            .map(|m| (m.model_id.clone(), m))
            .collect();
        let circuits_open = circuits
            .values()
            .filter(|m| m.state == CircuitState::Open)
            .count();

        HealthStatus {
            healthy: circuits_open == 0,
            total_models_tracked: circuits.len(),
            circuits_open,
            circuits,
        }
    }

    /// The catalog this router serves.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }
}

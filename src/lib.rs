//! modelmux - task-aware model routing with circuit breakers and
//! credential rotation
//!
//! This library routes inference tasks across a catalog of interchangeable
//! backend models. Each model gets a circuit breaker that diverts traffic
//! to the task's fallback chain when the model turns slow or unreliable,
//! and per-provider credential pools rotate keys to ride out rate limits.
//! The actual backend call is the embedding service's job: it asks the
//! router for a model, performs the call, and reports the outcome back.

pub mod admin;
pub mod catalog;
pub mod config;
pub mod rotator;
pub mod router;

pub use catalog::{Catalog, ModelSpec, TaskModelMapping, TaskType};
pub use config::Config;
pub use rotator::CredentialPool;
pub use router::{ModelRouter, RoutingResult};

//! Task-to-model catalog.
//!
//! Maps each task category to a primary model and an ordered fallback chain.
//! The catalog is assembled once at startup and read-only afterwards; lookup
//! is total (tasks without a seeded mapping resolve to the General mapping).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Task categories the router understands.
///
/// Closed set: every request is tagged with exactly one of these. String
/// parsing is total -- unrecognized names resolve to [`TaskType::General`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// High-reasoning comparison and multi-factor scoring.
    Scoring,
    /// Quantitative trend analysis and forecasting.
    Forecasting,
    /// Multilingual conversational coordination.
    Dialogue,
    /// Fast unstructured-to-structured extraction.
    Extraction,
    /// Speech-to-text.
    Transcription,
    /// General-purpose chat and RAG.
    General,
    /// Document summarization.
    Summarization,
}

impl TaskType {
    /// Lowercase string representation for logs and JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Scoring => "scoring",
            TaskType::Forecasting => "forecasting",
            TaskType::Dialogue => "dialogue",
            TaskType::Extraction => "extraction",
            TaskType::Transcription => "transcription",
            TaskType::General => "general",
            TaskType::Summarization => "summarization",
        }
    }

    /// Parse a task name. Unknown names map to `General` so callers always
    /// get a routable task.
    pub fn parse(s: &str) -> TaskType {
        match s {
            "scoring" => TaskType::Scoring,
            "forecasting" => TaskType::Forecasting,
            "dialogue" => TaskType::Dialogue,
            "extraction" => TaskType::Extraction,
            "transcription" => TaskType::Transcription,
            "general" => TaskType::General,
            "summarization" => TaskType::Summarization,
            other => {
                tracing::debug!(task = %other, "unknown task type, using general");
                TaskType::General
            }
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Specification of one callable backend model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSpec {
    /// Backend model identifier sent on the wire.
    pub model_id: String,
    /// Human-readable name.
    pub display_name: String,
    /// What this model is good at.
    pub capability: String,
    /// Maximum output tokens.
    pub max_tokens: u32,
    /// Default sampling temperature.
    pub default_temperature: f32,
    /// Whether the model supports incremental output.
    pub supports_streaming: bool,
    /// Whether this is an audio (speech) model rather than text.
    pub is_audio_model: bool,
}

impl ModelSpec {
    /// Construct a text model spec.
    pub fn text(
        model_id: &str,
        display_name: &str,
        capability: &str,
        max_tokens: u32,
        default_temperature: f32,
    ) -> Self {
        Self {
            model_id: model_id.to_string(),
            display_name: display_name.to_string(),
            capability: capability.to_string(),
            max_tokens,
            default_temperature,
            supports_streaming: true,
            is_audio_model: false,
        }
    }

    /// Construct an audio (speech-to-text) model spec. Audio models do not
    /// stream and ignore sampling temperature.
    pub fn audio(model_id: &str, display_name: &str, capability: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            display_name: display_name.to_string(),
            capability: capability.to_string(),
            max_tokens: 4096,
            default_temperature: 0.0,
            supports_streaming: false,
            is_audio_model: true,
        }
    }
}

/// Binds one task type to a primary model and its ordered fallback chain.
#[derive(Debug, Clone)]
pub struct TaskModelMapping {
    pub task: TaskType,
    /// Primary model for this task (tier 0).
    pub primary: ModelSpec,
    /// Ordered fallbacks (tier 1, tier 2, ...).
    pub fallbacks: Vec<ModelSpec>,
    /// Optional task-specific instruction template.
    pub instruction_template: Option<String>,
}

/// Errors raised while assembling a catalog. Startup-time only; lookups on a
/// constructed catalog never fail.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog has no mapping for the 'general' task (required as the default)")]
    MissingGeneralMapping,
}

/// Immutable task-to-model registry.
///
/// A `general` mapping is always present (enforced at construction), which is
/// what makes [`Catalog::mapping_for`] a total function.
#[derive(Debug, Clone)]
pub struct Catalog {
    general: TaskModelMapping,
    mappings: HashMap<TaskType, TaskModelMapping>,
}

impl Catalog {
    /// Build a catalog from explicit mappings. The set must include a
    /// mapping for [`TaskType::General`]; duplicate tasks keep the last
    /// entry.
    pub fn new(mappings: Vec<TaskModelMapping>) -> Result<Self, CatalogError> {
        let mut map = HashMap::with_capacity(mappings.len());
        for mapping in mappings {
            map.insert(mapping.task, mapping);
        }
        let general = map
            .remove(&TaskType::General)
            .ok_or(CatalogError::MissingGeneralMapping)?;
        Ok(Self {
            general,
            mappings: map,
        })
    }

    /// The compiled-in production catalog.
    pub fn builtin() -> Self {
        let scoring = ModelSpec::text(
            "openai/gpt-oss-120b",
            "GPT-OSS 120B",
            "High-reasoning comparison, multi-factor scoring, written justification",
            8192,
            0.3,
        );
        let forecasting = ModelSpec::text(
            "deepseek-r1-distill-llama-70b",
            "DeepSeek-R1 70B",
            "Quantitative trend analysis and numeric forecasting",
            8192,
            0.2,
        );
        let dialogue = ModelSpec::text(
            "llama-3.3-70b-versatile",
            "Llama 3.3 70B",
            "Multilingual dialogue with regional nuance",
            4096,
            0.6,
        );
        let extraction = ModelSpec::text(
            "openai/gpt-oss-20b",
            "GPT-OSS 20B",
            "Low-latency unstructured-to-JSON extraction",
            4096,
            0.1,
        );
        let transcription = ModelSpec::audio(
            "whisper-large-v3",
            "Whisper Large V3",
            "Speech-to-text transcription",
        );
        let general = ModelSpec::text(
            "llama3-70b-8192",
            "Llama 3 70B",
            "General-purpose chat, RAG, summarization",
            8192,
            0.7,
        );
        let general_small = ModelSpec::text(
            "llama3-8b-8192",
            "Llama 3 8B",
            "Fast general-purpose inference",
            8192,
            0.7,
        );

        let mappings = vec![
            TaskModelMapping {
                task: TaskType::Scoring,
                primary: scoring,
                fallbacks: vec![dialogue.clone(), general.clone()],
                instruction_template: Some(
                    "You compare competing submissions on price, delivery and \
                     reputation together, never on price alone. Always state the \
                     reasoning behind your recommendation."
                        .to_string(),
                ),
            },
            TaskModelMapping {
                task: TaskType::Forecasting,
                primary: forecasting,
                fallbacks: vec![general.clone(), general_small.clone()],
                instruction_template: Some(
                    "You analyze price trends and produce numeric forecasts. \
                     Output precise figures and percentages, and state whether to \
                     act now or wait."
                        .to_string(),
                ),
            },
            TaskModelMapping {
                task: TaskType::Dialogue,
                primary: dialogue.clone(),
                fallbacks: vec![general.clone(), general_small.clone()],
                instruction_template: Some(
                    "You translate technical jargon into plain, actionable steps \
                     and keep the conversation professional across languages."
                        .to_string(),
                ),
            },
            TaskModelMapping {
                task: TaskType::Extraction,
                primary: extraction,
                fallbacks: vec![dialogue.clone(), general.clone()],
                instruction_template: Some(
                    "You extract structured data from unstructured input. Output \
                     only valid JSON, with no explanations and no markdown."
                        .to_string(),
                ),
            },
            TaskModelMapping {
                task: TaskType::Transcription,
                primary: transcription,
                // No text-model fallback for audio input.
                fallbacks: vec![],
                instruction_template: None,
            },
            TaskModelMapping {
                task: TaskType::General,
                primary: general.clone(),
                fallbacks: vec![dialogue.clone(), general_small.clone()],
                instruction_template: None,
            },
            TaskModelMapping {
                task: TaskType::Summarization,
                primary: general,
                fallbacks: vec![dialogue, general_small],
                instruction_template: None,
            },
        ];

        Self::new(mappings).expect("builtin catalog includes a general mapping")
    }

    /// Look up the mapping for a task. Total: tasks without a seeded mapping
    /// get the General mapping.
    pub fn mapping_for(&self, task: TaskType) -> &TaskModelMapping {
        self.mappings.get(&task).unwrap_or(&self.general)
    }

    /// Every mapping in the catalog, the General mapping included.
    pub fn mappings(&self) -> impl Iterator<Item = &TaskModelMapping> {
        self.mappings
            .values()
            .chain(std::iter::once(&self.general))
    }

    /// Sorted, de-duplicated ids of every model reachable through the
    /// catalog (primaries and fallbacks). Used for health enumeration.
    pub fn all_model_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .mappings()
            .flat_map(|m| {
                std::iter::once(&m.primary)
                    .chain(m.fallbacks.iter())
                    .map(|spec| spec.model_id.clone())
            })
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

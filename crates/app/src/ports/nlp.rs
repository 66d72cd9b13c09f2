//! Language collaborators: speech recognition, semantic similarity,
//! entity extraction and the AI intent backend.
//!
//! Scoring and extraction are synchronous and CPU-bound; the template
//! matcher runs them on blocking worker threads, so they are object-safe
//! (`Arc<dyn …>`). Recognition and intent processing cross the network and
//! are async.

use std::future::Future;

use serde::{Deserialize, Serialize};
use voxline_domain::command::Variables;
use voxline_domain::error::VoxlineError;

/// Semantic similarity between an input and a pattern, in `0.0..=1.0`.
pub trait SemanticScorer: Send + Sync {
    fn similarity(&self, text: &str, pattern: &str) -> f64;
}

/// Named-entity extraction over an input.
pub trait EntityExtractor: Send + Sync {
    /// Extract variables from `text` while it is being scored against
    /// `pattern`. An error excludes that candidate from the match.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError`] when the input cannot be analysed.
    fn extract(&self, text: &str, pattern: &str) -> Result<Variables, ExtractionError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("entity extraction failed: {0}")]
pub struct ExtractionError(pub String);

/// Output of a speech recogniser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    pub text: String,
    pub confidence: f64,
}

/// Speech-to-text engine.
pub trait Recognizer: Send + Sync {
    /// Recognise `audio`; `None` when nothing intelligible was heard.
    fn recognize(
        &self,
        audio: &[u8],
    ) -> impl Future<Output = Result<Option<Recognition>, VoxlineError>> + Send;
}

/// Confidence an intent backend reply needs to be acted upon.
pub const INTENT_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Action types a backend reply may ask for.
pub const ALLOWED_ACTION_TYPES: [&str; 3] = ["system_command", "api_call", "template_execution"];

/// Reply of the AI intent backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentResponse {
    pub response: String,
    pub confidence: f64,
    #[serde(default)]
    pub actions: Vec<serde_json::Value>,
}

impl IntentResponse {
    /// Actions whose `type` is one of [`ALLOWED_ACTION_TYPES`].
    #[must_use]
    pub fn allowed_actions(&self) -> Vec<serde_json::Value> {
        self.actions
            .iter()
            .filter(|action| {
                action
                    .get("type")
                    .and_then(serde_json::Value::as_str)
                    .is_some_and(|kind| ALLOWED_ACTION_TYPES.contains(&kind))
            })
            .cloned()
            .collect()
    }

    /// Confident enough and carrying at least one allowed action.
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        self.confidence >= INTENT_CONFIDENCE_THRESHOLD && !self.allowed_actions().is_empty()
    }
}

/// AI/intent backend consulted when no template or macro matches.
pub trait IntentBackend: Send + Sync {
    fn process(
        &self,
        text: &str,
        context: &serde_json::Value,
    ) -> impl Future<Output = Result<Option<IntentResponse>, VoxlineError>> + Send;
}

/// Backend used when none is configured: never understands anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIntentBackend;

impl IntentBackend for NoIntentBackend {
    fn process(
        &self,
        _text: &str,
        _context: &serde_json::Value,
    ) -> impl Future<Output = Result<Option<IntentResponse>, VoxlineError>> + Send {
        async { Ok(None) }
    }
}

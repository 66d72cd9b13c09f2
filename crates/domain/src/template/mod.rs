//! Template: a pattern-plus-response definition used for intent matching.
//!
//! Patterns are free text with `{name}` placeholders. Matching is fuzzy: the
//! placeholders only document which variables the template expects, the
//! values themselves come from entity extraction over the input.

pub mod similarity;

use serde::{Deserialize, Serialize};

use crate::command::Variables;
use crate::error::{ValidationError, VoxlineError};

/// Score a template must reach unless it configures its own threshold.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.75;

fn default_min_confidence() -> f64 {
    DEFAULT_MIN_CONFIDENCE
}

/// A named intent with its trigger patterns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub patterns: Vec<String>,
    #[serde(default)]
    pub response_template: Option<String>,
    /// Variable names the template expects to be filled.
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl Template {
    /// Create a builder for constructing a [`Template`].
    #[must_use]
    pub fn builder() -> TemplateBuilder {
        TemplateBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`VoxlineError::Validation`] when:
    /// - `name` is empty ([`ValidationError::EmptyName`])
    /// - `patterns` is empty ([`ValidationError::NoPatterns`])
    /// - `min_confidence` is outside `0.0..=1.0`
    pub fn validate(&self) -> Result<(), VoxlineError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if self.patterns.iter().all(|p| p.trim().is_empty()) {
            return Err(ValidationError::NoPatterns.into());
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ValidationError::ConfidenceOutOfRange(self.min_confidence).into());
        }
        Ok(())
    }

    /// Fill the response template with the extracted variables.
    #[must_use]
    pub fn render_response(&self, variables: &Variables) -> Option<String> {
        self.response_template
            .as_deref()
            .map(|response| substitute(response, variables))
    }
}

/// Step-by-step builder for [`Template`].
#[derive(Debug, Default)]
pub struct TemplateBuilder {
    name: Option<String>,
    patterns: Vec<String>,
    response_template: Option<String>,
    variables: Vec<String>,
    category: Option<String>,
    min_confidence: Option<f64>,
}

impl TemplateBuilder {
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    #[must_use]
    pub fn response_template(mut self, response: impl Into<String>) -> Self {
        self.response_template = Some(response.into());
        self
    }

    #[must_use]
    pub fn variable(mut self, name: impl Into<String>) -> Self {
        self.variables.push(name.into());
        self
    }

    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = Some(min_confidence);
        self
    }

    /// Consume the builder, validate, and return a [`Template`].
    ///
    /// # Errors
    ///
    /// Returns [`VoxlineError::Validation`] if required fields are missing or invalid.
    pub fn build(self) -> Result<Template, VoxlineError> {
        let template = Template {
            name: self.name.unwrap_or_default(),
            patterns: self.patterns,
            response_template: self.response_template,
            variables: self.variables,
            category: self.category,
            min_confidence: self.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
        };
        template.validate()?;
        Ok(template)
    }
}

/// The accepted best match for an input.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateMatch {
    pub template: Template,
    pub pattern: String,
    pub variables: Variables,
    pub confidence: f64,
}

/// Replace every `{key}` whose key is present in `variables`.
///
/// Unknown placeholders and unbalanced braces are left untouched.
#[must_use]
pub fn substitute(text: &str, variables: &Variables) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match variables.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

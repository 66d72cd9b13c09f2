//! Macro: a named, ordered sequence of sub-commands gated by delays and
//! conditions.
//!
//! Named `command_macro` because `macro` is a reserved word.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::{CommandState, DeliveryReceipt, Variables};
use crate::error::{ValidationError, VoxlineError};
use crate::id::CommandId;
use crate::template::substitute;

/// How long a step condition is polled when the step does not say.
pub const DEFAULT_CONDITION_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between two evaluations of a step condition.
pub const CONDITION_POLL_INTERVAL: Duration = Duration::from_secs(1);

fn default_timeout() -> Duration {
    DEFAULT_CONDITION_TIMEOUT
}

fn default_enabled() -> bool {
    true
}

/// Durations as (fractional) seconds in JSON.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// One unit inside a [`Macro`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroStep {
    /// Command text; may reference `{variables}`.
    pub command: String,
    #[serde(default, with = "duration_secs")]
    pub delay: Duration,
    /// Command whose successful result gates this step.
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,
}

impl MacroStep {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            delay: Duration::ZERO,
            condition: None,
            timeout: DEFAULT_CONDITION_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>, timeout: Duration) -> Self {
        self.condition = Some(condition.into());
        self.timeout = timeout;
        self
    }

    /// Substitute placeholders in `command` and `condition`.
    #[must_use]
    pub fn render(&self, variables: &Variables) -> Self {
        Self {
            command: substitute(&self.command, variables),
            delay: self.delay,
            condition: self.condition.as_deref().map(|c| substitute(c, variables)),
            timeout: self.timeout,
        }
    }
}

/// A named sequence of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Macro {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<MacroStep>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Defaults merged under the caller-supplied variables.
    #[serde(default)]
    pub variables: Variables,
}

impl Macro {
    /// Create a builder for constructing a [`Macro`].
    #[must_use]
    pub fn builder() -> MacroBuilder {
        MacroBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`VoxlineError::Validation`] when the name is empty, there are
    /// no steps, or a step has an empty command.
    pub fn validate(&self) -> Result<(), VoxlineError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if self.steps.is_empty() {
            return Err(ValidationError::NoSteps.into());
        }
        if let Some(index) = self.steps.iter().position(|s| s.command.trim().is_empty()) {
            return Err(ValidationError::EmptyStepCommand(index).into());
        }
        Ok(())
    }

    /// Macro defaults overlaid with the caller's variables.
    #[must_use]
    pub fn resolve_variables(&self, caller: &Variables) -> Variables {
        let mut merged = self.variables.clone();
        merged.extend(caller.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

/// Step-by-step builder for [`Macro`].
#[derive(Debug, Default)]
pub struct MacroBuilder {
    name: Option<String>,
    description: Option<String>,
    steps: Vec<MacroStep>,
    enabled: Option<bool>,
    variables: Variables,
}

impl MacroBuilder {
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn step(mut self, step: MacroStep) -> Self {
        self.steps.push(step);
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    #[must_use]
    pub fn variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Consume the builder, validate, and return a [`Macro`].
    ///
    /// # Errors
    ///
    /// Returns [`VoxlineError::Validation`] if required fields are missing or empty.
    pub fn build(self) -> Result<Macro, VoxlineError> {
        let command_macro = Macro {
            name: self.name.unwrap_or_default(),
            description: self.description,
            steps: self.steps,
            enabled: self.enabled.unwrap_or(true),
            variables: self.variables,
        };
        command_macro.validate()?;
        Ok(command_macro)
    }
}

/// Outcome of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub index: usize,
    /// Rendered command text.
    pub step: String,
    pub command_id: CommandId,
    pub state: CommandState,
    pub result: Option<DeliveryReceipt>,
}

impl StepResult {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.state == CommandState::Completed && self.result.as_ref().is_none_or(|r| r.success)
    }
}

/// A macro stopped before running all of its steps.
#[derive(Debug, thiserror::Error)]
#[error("macro aborted: {error}")]
pub struct MacroAborted {
    /// Steps that ran to completion before the failure.
    pub completed: Vec<StepResult>,
    /// Index of the step that failed, `None` when the macro never started.
    pub failed_step: Option<usize>,
    #[source]
    pub error: VoxlineError,
}

impl MacroAborted {
    /// The macro could not start at all.
    #[must_use]
    pub fn before_start(error: impl Into<VoxlineError>) -> Self {
        Self {
            completed: Vec::new(),
            failed_step: None,
            error: error.into(),
        }
    }
}

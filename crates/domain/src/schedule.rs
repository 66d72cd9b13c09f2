//! Schedule entries: persisted triggers that re-submit a command later.
//!
//! An expression is either an absolute timestamp (fires once) or a cron
//! recurrence. Five-field cron (`min hour dom month dow`) is accepted and
//! normalised to the six-field form with a leading seconds column.

use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{CommandError, ValidationError, VoxlineError};
use crate::id::{CommandId, ScheduleEntryId};
use crate::time::{Timestamp, now};

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// A parsed schedule expression.
#[derive(Debug, Clone)]
pub enum ScheduleExpr {
    At(Timestamp),
    Cron(Box<cron::Schedule>),
}

impl ScheduleExpr {
    /// Parse an absolute timestamp or a cron recurrence.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidSchedule`] when the expression is
    /// neither.
    pub fn parse(expression: &str) -> Result<Self, CommandError> {
        let trimmed = expression.trim();
        let invalid = |reason: String| CommandError::InvalidSchedule {
            expression: expression.to_string(),
            reason,
        };
        if trimmed.is_empty() {
            return Err(invalid("expression is empty".to_string()));
        }

        if let Ok(at) = chrono::DateTime::parse_from_rfc3339(trimmed) {
            return Ok(Self::At(at.with_timezone(&chrono::Utc)));
        }
        if let Some(naive) = NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        {
            return Ok(Self::At(naive.and_utc()));
        }

        let normalised = match trimmed.split_whitespace().count() {
            5 => format!("0 {trimmed}"),
            6 | 7 => trimmed.to_string(),
            n => {
                return Err(invalid(format!(
                    "not a timestamp, and {n} fields is not a cron expression"
                )));
            }
        };
        cron::Schedule::from_str(&normalised)
            .map(|schedule| Self::Cron(Box::new(schedule)))
            .map_err(|err| invalid(err.to_string()))
    }

    /// Whether the expression can produce more than one firing.
    #[must_use]
    pub fn is_recurrence(&self) -> bool {
        matches!(self, Self::Cron(_))
    }

    /// First firing time at or after `now`.
    ///
    /// A timestamp already in the past is due immediately. A cron
    /// expression yields the first occurrence strictly after `now`.
    #[must_use]
    pub fn next_after(&self, now: Timestamp) -> Option<Timestamp> {
        match self {
            Self::At(at) => Some((*at).max(now)),
            Self::Cron(schedule) => schedule.after(&now).next(),
        }
    }
}

/// What to do with an entry after it fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiringOutcome {
    Reschedule(Timestamp),
    Retire,
}

/// A persisted trigger bound to the command it re-submits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: ScheduleEntryId,
    /// The anchor command created when the entry was registered.
    pub command_id: CommandId,
    /// Command text submitted on every firing.
    pub command: String,
    pub expression: String,
    pub recurring: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub next_run: Timestamp,
    pub last_run: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl ScheduleEntry {
    /// Create a builder for constructing a [`ScheduleEntry`].
    #[must_use]
    pub fn builder() -> ScheduleEntryBuilder {
        ScheduleEntryBuilder::default()
    }

    /// Parse the stored expression.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidSchedule`] if the stored expression no
    /// longer parses.
    pub fn expr(&self) -> Result<ScheduleExpr, CommandError> {
        ScheduleExpr::parse(&self.expression)
    }

    #[must_use]
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.next_run <= now
    }

    /// Record a firing at `now` and decide the entry's fate.
    ///
    /// Recurring entries move `next_run` strictly past `now`; missed ticks
    /// are skipped rather than replayed.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidSchedule`] if the stored expression no
    /// longer parses.
    pub fn record_firing(&mut self, now: Timestamp) -> Result<FiringOutcome, CommandError> {
        self.last_run = Some(now);
        if !self.recurring {
            return Ok(FiringOutcome::Retire);
        }
        match self.expr()?.next_after(now).filter(|next| *next > now) {
            Some(next) => {
                self.next_run = next;
                Ok(FiringOutcome::Reschedule(next))
            }
            None => Ok(FiringOutcome::Retire),
        }
    }
}

/// Step-by-step builder for [`ScheduleEntry`].
#[derive(Debug, Default)]
pub struct ScheduleEntryBuilder {
    id: Option<ScheduleEntryId>,
    command_id: Option<CommandId>,
    command: Option<String>,
    expression: Option<String>,
    recurring: bool,
    metadata: serde_json::Value,
    created_at: Option<Timestamp>,
}

impl ScheduleEntryBuilder {
    #[must_use]
    pub fn id(mut self, id: ScheduleEntryId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn command_id(mut self, command_id: CommandId) -> Self {
        self.command_id = Some(command_id);
        self
    }

    #[must_use]
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    #[must_use]
    pub fn expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    #[must_use]
    pub fn recurring(mut self, recurring: bool) -> Self {
        self.recurring = recurring;
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn created_at(mut self, ts: Timestamp) -> Self {
        self.created_at = Some(ts);
        self
    }

    /// Consume the builder, parse the expression and compute `next_run`.
    ///
    /// # Errors
    ///
    /// - [`VoxlineError::Validation`] if the command text is empty
    /// - [`CommandError::InvalidSchedule`] if the expression does not parse,
    ///   has no future occurrence, or is an absolute timestamp flagged as
    ///   recurring
    pub fn build(self) -> Result<ScheduleEntry, VoxlineError> {
        let command = self.command.unwrap_or_default();
        if command.trim().is_empty() {
            return Err(ValidationError::EmptyText.into());
        }
        let expression = self.expression.unwrap_or_default();
        let expr = ScheduleExpr::parse(&expression)?;
        if self.recurring && !expr.is_recurrence() {
            return Err(CommandError::InvalidSchedule {
                expression,
                reason: "an absolute timestamp cannot recur".to_string(),
            }
            .into());
        }

        let created_at = self.created_at.unwrap_or_else(now);
        let Some(next_run) = expr.next_after(created_at) else {
            return Err(CommandError::InvalidSchedule {
                expression,
                reason: "expression has no upcoming occurrence".to_string(),
            }
            .into());
        };

        Ok(ScheduleEntry {
            id: self.id.unwrap_or_default(),
            command_id: self.command_id.unwrap_or_default(),
            command,
            expression,
            recurring: self.recurring,
            metadata: self.metadata,
            next_run,
            last_run: None,
            created_at,
        })
    }
}

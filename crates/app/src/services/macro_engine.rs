//! Macro engine: expands a macro into sequential sub-commands.
//!
//! Steps run strictly in order. Each one waits for its delay, then for its
//! condition (polled through the submission contract once per interval),
//! then submits its command and waits for it to become terminal. The first
//! failure aborts the remaining steps. A step that would lead back into the
//! macro being expanded fails before anything is submitted.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use voxline_domain::command::{CommandOrigin, Variables};
use voxline_domain::command_macro::{
    CONDITION_POLL_INTERVAL, Macro, MacroAborted, MacroStep, StepResult,
};
use voxline_domain::error::{CommandError, VoxlineError};

use crate::ports::CommandSubmitter;
use crate::registry::MacroRegistry;

/// Runs macros from a [`MacroRegistry`].
pub struct MacroEngine {
    registry: Arc<MacroRegistry>,
    poll_interval: Duration,
}

impl MacroEngine {
    pub fn new(registry: Arc<MacroRegistry>) -> Self {
        Self {
            registry,
            poll_interval: CONDITION_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &MacroRegistry {
        &self.registry
    }

    /// The macro registered under `name`, if it can run.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::MacroNotFound`] or [`CommandError::MacroDisabled`].
    pub fn runnable(&self, name: &str) -> Result<Macro, CommandError> {
        match self.registry.get(name) {
            None => Err(CommandError::MacroNotFound(name.to_string())),
            Some(m) if !m.enabled => Err(CommandError::MacroDisabled(m.name)),
            Some(m) => Ok(m),
        }
    }

    /// Run macro `name` with the caller's `variables` layered over the
    /// macro defaults.
    ///
    /// # Errors
    ///
    /// Returns [`MacroAborted`] carrying the steps completed so far when the
    /// macro is unknown or disabled, a condition times out, a step does not
    /// complete successfully, `cancel` fires, or the store fails.
    #[tracing::instrument(skip(self, variables, submitter, cancel))]
    pub async fn expand_and_run<S>(
        &self,
        name: &str,
        variables: &Variables,
        submitter: &S,
        cancel: &CancellationToken,
    ) -> Result<Vec<StepResult>, MacroAborted>
    where
        S: CommandSubmitter + ?Sized,
    {
        let command_macro = self.runnable(name).map_err(MacroAborted::before_start)?;
        let variables = command_macro.resolve_variables(variables);

        let mut completed = Vec::with_capacity(command_macro.steps.len());
        for (index, step) in command_macro.steps.iter().enumerate() {
            let step = step.render(&variables);
            let outcome = match self.cycle_through(&command_macro.name, &step, &variables) {
                Some(chain) => Err(CommandError::MacroCycle { chain }.into()),
                None => {
                    self.run_step(index, &step, &variables, submitter, cancel)
                        .await
                }
            };

            match outcome {
                Ok(result) => {
                    debug!(index, step = %result.step, "macro step completed");
                    completed.push(result);
                }
                Err(error) => {
                    info!(index, %error, "macro aborted");
                    return Err(MacroAborted {
                        completed,
                        failed_step: Some(index),
                        error,
                    });
                }
            }
        }
        Ok(completed)
    }

    /// The chain of macros by which `step` would invoke `root` again, if
    /// any. Follows invocations in step commands and conditions.
    fn cycle_through(
        &self,
        root: &str,
        step: &MacroStep,
        variables: &Variables,
    ) -> Option<Vec<String>> {
        let mut chain = vec![root.to_string()];
        let mut seen = HashSet::new();
        self.reaches(root, &invoked_texts(step), variables, &mut chain, &mut seen)
            .then_some(chain)
    }

    fn reaches(
        &self,
        root: &str,
        texts: &[String],
        variables: &Variables,
        chain: &mut Vec<String>,
        seen: &mut HashSet<String>,
    ) -> bool {
        for text in texts {
            let Some(nested) = self.registry.find_invocation(text) else {
                continue;
            };
            chain.push(nested.name.clone());
            if nested.name.eq_ignore_ascii_case(root) {
                return true;
            }
            if seen.insert(nested.name.to_lowercase()) {
                let variables = nested.resolve_variables(variables);
                let texts: Vec<String> = nested
                    .steps
                    .iter()
                    .flat_map(|step| invoked_texts(&step.render(&variables)))
                    .collect();
                if self.reaches(root, &texts, &variables, chain, seen) {
                    return true;
                }
            }
            chain.pop();
        }
        false
    }

    async fn run_step<S>(
        &self,
        index: usize,
        step: &MacroStep,
        variables: &Variables,
        submitter: &S,
        cancel: &CancellationToken,
    ) -> Result<StepResult, VoxlineError>
    where
        S: CommandSubmitter + ?Sized,
    {
        if !step.delay.is_zero() {
            tokio::select! {
                () = cancel.cancelled() => return Err(CommandError::Cancelled.into()),
                () = sleep(step.delay) => {}
            }
        }
        if let Some(condition) = &step.condition {
            self.await_condition(condition, step.timeout, variables, submitter, cancel)
                .await?;
        }
        let command = submitter
            .submit_and_wait(step.command.clone(), CommandOrigin::MacroStep, variables.clone(), cancel)
            .await?;
        let result = StepResult {
            index,
            step: step.command.clone(),
            command_id: command.id,
            state: command.state,
            result: command.result,
        };
        if result.succeeded() {
            Ok(result)
        } else {
            Err(CommandError::MacroStepFailed {
                index,
                state: result.state,
            }
            .into())
        }
    }

    /// Poll `condition` until it succeeds or `limit` elapses.
    ///
    /// Evaluation errors count as "not yet", except store failures, which
    /// abort the wait.
    async fn await_condition<S>(
        &self,
        condition: &str,
        limit: Duration,
        variables: &Variables,
        submitter: &S,
        cancel: &CancellationToken,
    ) -> Result<(), VoxlineError>
    where
        S: CommandSubmitter + ?Sized,
    {
        let poll = async {
            let mut ticker = interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match submitter
                    .submit_and_wait(condition.to_string(), CommandOrigin::MacroStep, variables.clone(), cancel)
                    .await
                {
                    Ok(command) if command.succeeded() => return Ok(()),
                    Ok(command) => trace!(state = %command.state, "condition not satisfied yet"),
                    Err(err) if err.is_storage() => return Err(err),
                    Err(err) => trace!(%err, "condition evaluation failed"),
                }
            }
        };

        tokio::select! {
            () = cancel.cancelled() => Err(CommandError::Cancelled.into()),
            polled = timeout(limit, poll) => polled.unwrap_or_else(|_| {
                Err(CommandError::ConditionTimeout {
                    condition: condition.to_string(),
                    timeout: limit,
                }
                .into())
            }),
        }
    }
}

/// Texts a step submits: its condition, then its command.
fn invoked_texts(step: &MacroStep) -> Vec<String> {
    step.condition
        .iter()
        .cloned()
        .chain(std::iter::once(step.command.clone()))
        .collect()
}

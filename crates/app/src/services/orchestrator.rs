//! Command lifecycle orchestrator.
//!
//! The orchestrator is the only writer of command state. It resolves new
//! input (macro invocation, template, intent backend), picks the delivery
//! path (realtime transport or offline queue) and reacts to schedule firings
//! and drain results by moving the affected command along its lifecycle.
//!
//! Every transition is a load, transition, store cycle guarded by the
//! command's `version`. A write that loses the race is retried on the fresh
//! state; a command that became terminal in the meantime keeps its terminal
//! state and the late result is dropped.

mod recovery;

pub use recovery::RecoveryReport;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures_util::future::BoxFuture;
use serde_json::json;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use voxline_domain::command::{
    Command, CommandOrigin, CommandState, DeliveryReceipt, Resolution, TransitionError, Variables,
};
use voxline_domain::command_macro::{MacroAborted, StepResult};
use voxline_domain::error::{CommandError, NotFoundError, VoxlineError};
use voxline_domain::event::{Event, EventType};
use voxline_domain::id::CommandId;
use voxline_domain::schedule::ScheduleEntry;

use super::macro_engine::MacroEngine;
use super::offline_queue::{OfflineQueue, SyncOutcome, SyncResult};
use super::scheduler::{FiringHandler, Scheduler};
use super::template_matcher::TemplateMatcher;
use crate::ports::{
    Clock, CommandGateway, CommandRepository, CommandSubmitter, EventPublisher, IntentBackend,
    NoIntentBackend, QueueRepository, Recognizer, ScheduleRepository, ScheduleRequest, Submission,
    Transport,
};

/// Reason recorded on input nothing recognised.
pub const UNMATCHED_REASON: &str = "unmatched";

/// Reason recorded on an explicit cancel.
pub const CANCELLED_REASON: &str = "cancelled by request";

const MAX_WRITE_ATTEMPTS: usize = 3;

/// Everything the orchestrator is built from.
pub struct Collaborators<CR, QR, SR, T, P, I = NoIntentBackend> {
    pub commands: CR,
    pub queue: OfflineQueue<QR>,
    pub scheduler: Scheduler<SR>,
    pub transport: T,
    pub publisher: P,
    pub intents: I,
    pub matcher: TemplateMatcher,
    pub macros: MacroEngine,
    pub clock: Arc<dyn Clock>,
}

/// Owner of the command state machine.
///
/// Always handled through an [`Arc`]: delivery and macro execution run on
/// spawned tasks that hold on to the orchestrator.
pub struct Orchestrator<CR, QR, SR, T, P, I = NoIntentBackend> {
    commands: CR,
    queue: OfflineQueue<QR>,
    scheduler: Scheduler<SR>,
    transport: T,
    publisher: P,
    intents: I,
    matcher: TemplateMatcher,
    macros: MacroEngine,
    clock: Arc<dyn Clock>,
    /// Latest state of commands somebody is waiting on.
    waiters: Mutex<HashMap<CommandId, watch::Sender<CommandState>>>,
    /// Cancellation of in-flight macro runs, by parent command.
    running: Mutex<HashMap<CommandId, CancellationToken>>,
    me: Weak<Self>,
}

impl<CR, QR, SR, T, P, I> Orchestrator<CR, QR, SR, T, P, I>
where
    CR: CommandRepository + Send + Sync + 'static,
    QR: QueueRepository + Send + Sync + 'static,
    SR: ScheduleRepository + Send + Sync + 'static,
    T: Transport + 'static,
    P: EventPublisher + Send + Sync + 'static,
    I: IntentBackend + 'static,
{
    pub fn new(parts: Collaborators<CR, QR, SR, T, P, I>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            commands: parts.commands,
            queue: parts.queue,
            scheduler: parts.scheduler,
            transport: parts.transport,
            publisher: parts.publisher,
            intents: parts.intents,
            matcher: parts.matcher,
            macros: parts.macros,
            clock: parts.clock,
            waiters: Mutex::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            me: me.clone(),
        })
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler<SR> {
        &self.scheduler
    }

    #[must_use]
    pub fn queue(&self) -> &OfflineQueue<QR> {
        &self.queue
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    // ── Intake ─────────────────────────────────────────────────────

    /// Recognise `audio` and submit the transcript.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::MatchNotFound`] when nothing intelligible was
    /// heard, or whatever [`submit`](CommandGateway::submit) returns.
    #[tracing::instrument(skip_all, fields(bytes = audio.len(), %origin))]
    pub async fn submit_audio<R>(
        &self,
        recognizer: &R,
        audio: &[u8],
        origin: CommandOrigin,
    ) -> Result<Submission, VoxlineError>
    where
        R: Recognizer + ?Sized,
    {
        let recognition = recognizer.recognize(audio).await?;
        let Some(recognition) = recognition.filter(|r| !r.text.trim().is_empty()) else {
            debug!("nothing recognised");
            return Err(CommandError::MatchNotFound.into());
        };
        debug!(confidence = recognition.confidence, "audio recognised");
        self.accept(recognition.text, origin, Variables::new(), false)
            .await
            .map(|accepted| accepted.submission())
    }

    /// Create, resolve and launch a command. With `track`, the returned
    /// receiver follows the command's state until it is terminal.
    async fn accept(
        &self,
        text: String,
        origin: CommandOrigin,
        variables: Variables,
        track: bool,
    ) -> Result<Accepted, VoxlineError> {
        let now = self.clock.now();
        let command = Command::builder()
            .text(text)
            .origin(origin)
            .variables(variables)
            .created_at(now)
            .build()?;
        let command = self.commands.create(command).await?;
        info!(command_id = %command.id, %origin, text = %command.text, "command created");
        self.publish(Event::new(
            EventType::CommandCreated,
            Some(command.id),
            json!({ "text": command.text, "origin": command.origin }),
            now,
        ))
        .await;

        let id = command.id;
        let waiter = track.then(|| self.track(id));
        match self.resolve_and_advance(command).await {
            Ok(command) => Ok(Accepted { command, waiter }),
            Err(err) => {
                self.untrack(id);
                Err(err)
            }
        }
    }

    /// Resolve a `Pending` command and, when it matched, launch it.
    async fn resolve_and_advance(&self, command: Command) -> Result<Command, VoxlineError> {
        let command = self.resolve_pending(command).await?;
        if command.state == CommandState::Matched {
            self.spawn_advance(command.clone());
        }
        Ok(command)
    }

    /// Move a `Pending` command to `Matched`, or cancel it as unmatched.
    async fn resolve_pending(&self, command: Command) -> Result<Command, VoxlineError> {
        let id = command.id;
        let (resolution, variables) = self.resolve(&command).await?;

        let outcome = if resolution.is_actionable() {
            info!(command_id = %id, kind = resolution.kind(), "command matched");
            self.try_transition(id, CommandState::Matched, move |c| {
                c.resolution = Some(resolution.clone());
                c.variables.clone_from(&variables);
            })
            .await?
        } else {
            info!(command_id = %id, text = %command.text, "no handler recognised the command");
            let outcome = self
                .try_transition(id, CommandState::Cancelled, |c| {
                    c.resolution = Some(Resolution::Unmatched);
                    c.reason = Some(UNMATCHED_REASON.to_string());
                })
                .await?;
            if outcome.is_some() {
                self.publish(Event::new(
                    EventType::CommandUnmatched,
                    Some(id),
                    json!({ "text": command.text }),
                    self.clock.now(),
                ))
                .await;
            }
            outcome
        };

        match outcome {
            Some(command) => Ok(command),
            None => self.load(id).await,
        }
    }

    /// Decide how `command` is handled: macro invocation, then template,
    /// then the intent backend.
    async fn resolve(&self, command: &Command) -> Result<(Resolution, Variables), VoxlineError> {
        if let Some(found) = self.macros.registry().find_invocation(&command.text) {
            return Ok((Resolution::Macro { name: found.name }, command.variables.clone()));
        }

        if let Some(found) = self.matcher.match_text(&command.text).await {
            let mut variables = found.variables;
            variables.extend(command.variables.clone());
            let response = found.template.render_response(&variables);
            return Ok((
                Resolution::MatchedTemplate {
                    template: found.template.name,
                    confidence: found.confidence,
                    response,
                },
                variables,
            ));
        }

        let context = json!({ "origin": command.origin, "variables": command.variables });
        match self.intents.process(&command.text, &context).await {
            Ok(Some(reply)) if reply.is_actionable() => {
                return Ok((
                    Resolution::RawPassthrough {
                        actions: reply.allowed_actions(),
                        response: reply.response,
                        confidence: reply.confidence,
                    },
                    command.variables.clone(),
                ));
            }
            Ok(Some(reply)) => {
                debug!(confidence = reply.confidence, "intent reply not actionable");
            }
            Ok(None) => {}
            Err(err) if err.is_storage() => return Err(err),
            Err(err) => warn!(command_id = %command.id, %err, "intent backend failed"),
        }
        Ok((Resolution::Unmatched, command.variables.clone()))
    }

    // ── Execution ──────────────────────────────────────────────────

    fn spawn_advance(&self, command: Command) {
        let Some(this) = self.me.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let id = command.id;
            if let Err(err) = this.advance(command).await {
                error!(command_id = %id, %err, "command lifecycle stalled");
            }
        });
    }

    /// Carry a `Matched` command to its next resting state.
    async fn advance(&self, command: Command) -> Result<(), VoxlineError> {
        match &command.resolution {
            Some(Resolution::Macro { name }) => self
                .execute_macro(command.id, name, &command.variables)
                .await
                .map(|_| ()),
            Some(Resolution::MatchedTemplate { .. } | Resolution::RawPassthrough { .. }) => {
                self.deliver(command).await
            }
            Some(Resolution::Unmatched) | None => Ok(()),
        }
    }

    async fn deliver(&self, command: Command) -> Result<(), VoxlineError> {
        let id = command.id;
        if !self.transport.is_available() {
            return self.fall_back_to_queue(id, "transport unavailable").await;
        }
        let Some(dispatched) = self
            .try_transition(id, CommandState::Dispatched, |_| {})
            .await?
        else {
            return Ok(());
        };

        match self.transport.deliver(&dispatched).await {
            Ok(receipt) => {
                self.try_transition(id, CommandState::Completed, move |c| {
                    c.result = Some(receipt.clone());
                })
                .await?;
                Ok(())
            }
            Err(err) => {
                warn!(command_id = %id, %err, "delivery failed, falling back to the offline queue");
                self.fall_back_to_queue(id, &err.to_string()).await
            }
        }
    }

    /// Park the command in the offline queue.
    ///
    /// The command is marked `Queued` before the entry is written; a crash
    /// in between is repaired by startup recovery.
    async fn fall_back_to_queue(&self, id: CommandId, reason: &str) -> Result<(), VoxlineError> {
        let reason = reason.to_string();
        let Some(queued) = self
            .try_transition(id, CommandState::Queued, move |c| {
                c.reason = Some(reason.clone());
            })
            .await?
        else {
            return Ok(());
        };
        self.queue.enqueue(&queued, self.clock.now()).await?;
        Ok(())
    }

    /// Create the parent command of a macro run requested by name.
    async fn open_macro_run(
        &self,
        name: &str,
        variables: Variables,
    ) -> Result<Command, VoxlineError> {
        let now = self.clock.now();
        let parent = Command::builder()
            .text(format!("run macro {name}"))
            .variables(variables)
            .created_at(now)
            .build()?;
        let parent = self.commands.create(parent).await?;
        info!(command_id = %parent.id, macro_name = name, "macro run requested");
        self.publish(Event::new(
            EventType::CommandCreated,
            Some(parent.id),
            json!({ "text": parent.text, "origin": parent.origin }),
            now,
        ))
        .await;

        let resolution = Resolution::Macro {
            name: name.to_string(),
        };
        match self
            .try_transition(parent.id, CommandState::Matched, move |c| {
                c.resolution = Some(resolution.clone());
            })
            .await?
        {
            Some(matched) => Ok(matched),
            None => Err(CommandError::Cancelled.into()),
        }
    }

    /// Run the macro of parent command `id` and settle the parent.
    ///
    /// The outer error is a failure to record the outcome; the inner one is
    /// the macro's own abort, already reflected on the parent.
    async fn execute_macro(
        &self,
        id: CommandId,
        name: &str,
        variables: &Variables,
    ) -> Result<Result<Vec<StepResult>, MacroAborted>, VoxlineError> {
        let token = CancellationToken::new();
        self.lock_running().insert(id, token.clone());
        if self
            .try_transition(id, CommandState::Dispatched, |_| {})
            .await?
            .is_none()
        {
            self.lock_running().remove(&id);
            return Ok(Err(MacroAborted::before_start(CommandError::Cancelled)));
        }

        let outcome = self.macros.expand_and_run(name, variables, self, &token).await;
        self.lock_running().remove(&id);

        let steps = match &outcome {
            Ok(steps) => steps.as_slice(),
            Err(aborted) => aborted.completed.as_slice(),
        };
        for step in steps {
            self.publish(Event::new(
                EventType::MacroStepCompleted,
                Some(id),
                json!({
                    "macro": name,
                    "index": step.index,
                    "step": step.step,
                    "step_command_id": step.command_id,
                    "state": step.state,
                }),
                self.clock.now(),
            ))
            .await;
        }

        match &outcome {
            Ok(steps) => {
                let receipt = DeliveryReceipt::ok(json!({ "steps": steps }));
                self.try_transition(id, CommandState::Completed, move |c| {
                    c.result = Some(receipt.clone());
                })
                .await?;
            }
            Err(aborted) => {
                let reason = aborted.error.to_string();
                let receipt = DeliveryReceipt {
                    success: false,
                    data: json!({
                        "steps": aborted.completed,
                        "failed_step": aborted.failed_step,
                    }),
                };
                self.try_transition(id, CommandState::Failed, move |c| {
                    c.reason = Some(reason.clone());
                    c.result = Some(receipt.clone());
                })
                .await?;
            }
        }
        Ok(outcome)
    }

    // ── Offline queue ──────────────────────────────────────────────

    /// Deliver queued commands if the transport is up, and move each one
    /// along according to its outcome. Returns how many were delivered.
    ///
    /// # Errors
    ///
    /// Returns a storage error. Problems with a single command are logged
    /// and do not stop the pass.
    #[tracing::instrument(skip_all)]
    pub async fn drain_offline_queue(&self) -> Result<usize, VoxlineError> {
        if !self.transport.is_available() {
            debug!("transport unavailable, drain skipped");
            return Ok(0);
        }
        let results = self.queue.drain(&self.transport).await?;
        if results.is_empty() {
            return Ok(0);
        }

        let mut delivered = 0;
        for result in &results {
            if matches!(result.outcome, SyncOutcome::Delivered(_)) {
                delivered += 1;
            }
            match self.settle_sync(result).await {
                Ok(()) => {}
                Err(err) if err.is_storage() => return Err(err),
                Err(err) => warn!(command_id = %result.entry.command_id, %err, "sync result not applied"),
            }
        }

        self.publish(Event::new(
            EventType::QueueDrained,
            None,
            json!({ "attempted": results.len(), "delivered": delivered }),
            self.clock.now(),
        ))
        .await;
        Ok(delivered)
    }

    async fn settle_sync(&self, result: &SyncResult) -> Result<(), VoxlineError> {
        let id = result.entry.command_id;
        match &result.outcome {
            SyncOutcome::Delivered(receipt) => {
                let receipt = receipt.clone();
                let synced = self
                    .try_transition(id, CommandState::Synced, move |c| {
                        c.result = Some(receipt.clone());
                        c.reason = None;
                    })
                    .await?;
                if synced.is_some() {
                    self.try_transition(id, CommandState::Completed, |_| {}).await?;
                }
            }
            SyncOutcome::Retry(err) => {
                let reason = err.to_string();
                self.try_transition(id, CommandState::Queued, move |c| {
                    c.reason = Some(reason.clone());
                })
                .await?;
            }
            SyncOutcome::Exhausted(err) => {
                let last = err.to_string();
                let retried = self
                    .try_transition(id, CommandState::Queued, move |c| {
                        c.reason = Some(last.clone());
                    })
                    .await?;
                if retried.is_some() {
                    let reason = CommandError::RetriesExhausted {
                        attempts: result.entry.retry_count,
                    }
                    .to_string();
                    self.try_transition(id, CommandState::Failed, move |c| {
                        c.reason = Some(reason.clone());
                    })
                    .await?;
                }
            }
        }
        Ok(())
    }

    // ── Scheduling ─────────────────────────────────────────────────

    /// Fire every due schedule entry. Returns how many fired.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the scheduler.
    pub async fn poll_schedules(&self) -> Result<usize, VoxlineError> {
        self.scheduler.poll_once(self.clock.now(), self).await
    }

    async fn fire_entry(&self, entry: &ScheduleEntry) -> Result<(), VoxlineError> {
        let anchor = self.load(entry.command_id).await?;
        if anchor.state.is_terminal() {
            return Err(CommandError::Cancelled.into());
        }

        self.publish(Event::new(
            EventType::ScheduleFired,
            Some(anchor.id),
            json!({
                "entry_id": entry.id,
                "command": entry.command,
                "recurring": entry.recurring,
                "metadata": entry.metadata,
            }),
            self.clock.now(),
        ))
        .await;

        if entry.recurring {
            let accepted = self
                .accept(entry.command.clone(), CommandOrigin::Scheduled, Variables::new(), false)
                .await?;
            debug!(entry_id = %entry.id, command_id = %accepted.command.id, "recurring firing submitted");
            return Ok(());
        }

        if anchor.state != CommandState::Scheduled {
            // already fired before a restart
            return Err(CommandError::Cancelled.into());
        }
        let Some(pending) = self
            .try_transition(anchor.id, CommandState::Pending, |c| {
                c.origin = CommandOrigin::Scheduled;
            })
            .await?
        else {
            return Err(CommandError::Cancelled.into());
        };
        self.resolve_and_advance(pending).await?;
        Ok(())
    }

    // ── State ──────────────────────────────────────────────────────

    async fn load(&self, id: CommandId) -> Result<Command, VoxlineError> {
        self.commands.get_by_id(id).await?.ok_or_else(|| {
            NotFoundError {
                entity: "Command",
                id: id.to_string(),
            }
            .into()
        })
    }

    /// Apply `next` to the stored command, then `apply` further changes.
    ///
    /// Returns `None` when the command is already terminal.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidTransition`] when the edge does not
    /// exist from the stored state, a conflict after repeated lost races,
    /// or a storage error.
    async fn try_transition<F>(
        &self,
        id: CommandId,
        next: CommandState,
        apply: F,
    ) -> Result<Option<Command>, VoxlineError>
    where
        F: Fn(&mut Command) + Send + Sync,
    {
        let mut attempt = 1;
        loop {
            let mut command = self.load(id).await?;
            let from = command.state;
            if from.is_terminal() {
                debug!(command_id = %id, state = %from, to = %next, "command already terminal, result dropped");
                return Ok(None);
            }
            command.transition(next, self.clock.now())?;
            apply(&mut command);

            match self.commands.update(command).await {
                Ok(updated) => {
                    self.after_transition(&updated, from).await;
                    return Ok(Some(updated));
                }
                Err(VoxlineError::Conflict(conflict)) if attempt < MAX_WRITE_ATTEMPTS => {
                    debug!(command_id = %id, %conflict, attempt, "stale write, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn after_transition(&self, command: &Command, from: CommandState) {
        debug!(command_id = %command.id, %from, to = %command.state, "state changed");
        {
            let mut waiters = self.lock_waiters();
            if let Some(tx) = waiters.get(&command.id) {
                tx.send_replace(command.state);
            }
            if command.state.is_terminal() {
                waiters.remove(&command.id);
            }
        }
        if command.state.is_terminal() {
            if let Some(token) = self.lock_running().remove(&command.id) {
                token.cancel();
            }
        }
        self.publish(Event::state_changed(command, from)).await;
    }

    fn track(&self, id: CommandId) -> watch::Receiver<CommandState> {
        let (tx, rx) = watch::channel(CommandState::Pending);
        self.lock_waiters().insert(id, tx);
        rx
    }

    fn untrack(&self, id: CommandId) {
        self.lock_waiters().remove(&id);
    }

    fn lock_waiters(&self) -> std::sync::MutexGuard<'_, HashMap<CommandId, watch::Sender<CommandState>>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, HashMap<CommandId, CancellationToken>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn publish(&self, event: Event) {
        let event_type = event.event_type;
        if let Err(err) = self.publisher.publish(event).await {
            warn!(%event_type, %err, "event not published");
        }
    }
}

/// A freshly submitted command, optionally with a watch on its state.
struct Accepted {
    command: Command,
    waiter: Option<watch::Receiver<CommandState>>,
}

impl Accepted {
    fn submission(self) -> Submission {
        Submission {
            command_id: self.command.id,
            resolution: self.command.resolution.unwrap_or(Resolution::Unmatched),
        }
    }
}

impl<CR, QR, SR, T, P, I> CommandGateway for Orchestrator<CR, QR, SR, T, P, I>
where
    CR: CommandRepository + Send + Sync + 'static,
    QR: QueueRepository + Send + Sync + 'static,
    SR: ScheduleRepository + Send + Sync + 'static,
    T: Transport + 'static,
    P: EventPublisher + Send + Sync + 'static,
    I: IntentBackend + 'static,
{
    fn submit(
        &self,
        text: String,
        origin: CommandOrigin,
    ) -> impl Future<Output = Result<Submission, VoxlineError>> + Send {
        async move {
            self.accept(text, origin, Variables::new(), false)
                .await
                .map(Accepted::submission)
        }
    }

    fn get_status(&self, id: CommandId) -> impl Future<Output = Result<Command, VoxlineError>> + Send {
        self.load(id)
    }

    fn cancel(&self, id: CommandId) -> impl Future<Output = Result<Command, VoxlineError>> + Send {
        async move {
            let current = self.load(id).await?;
            let terminal = TransitionError {
                from: current.state,
                to: CommandState::Cancelled,
            };
            if current.state.is_terminal() {
                return Err(terminal.into());
            }
            let Some(cancelled) = self
                .try_transition(id, CommandState::Cancelled, |c| {
                    c.reason = Some(CANCELLED_REASON.to_string());
                })
                .await?
            else {
                let current = self.load(id).await?;
                return Err(TransitionError {
                    from: current.state,
                    to: CommandState::Cancelled,
                }
                .into());
            };

            let removed = self.scheduler.remove_for_command(id).await?;
            let discarded = self.queue.discard(id, CANCELLED_REASON).await?;
            info!(command_id = %id, schedule_entries = removed, discarded, "command cancelled");
            Ok(cancelled)
        }
    }

    fn schedule(
        &self,
        request: ScheduleRequest,
    ) -> impl Future<Output = Result<ScheduleEntry, VoxlineError>> + Send {
        async move {
            let now = self.clock.now();
            let anchor_id = CommandId::new();
            let entry = self.scheduler.prepare(
                anchor_id,
                &request.text,
                &request.expression,
                request.recurring,
                request.metadata,
                now,
            )?;

            let anchor = Command::builder()
                .id(anchor_id)
                .text(request.text)
                .created_at(now)
                .build()?;
            let anchor = self.commands.create(anchor).await?;
            self.publish(Event::new(
                EventType::CommandCreated,
                Some(anchor_id),
                json!({ "text": anchor.text, "origin": anchor.origin, "schedule": entry.expression }),
                now,
            ))
            .await;

            let matched = self.resolve_pending(anchor).await?;
            if matched.state != CommandState::Matched {
                return Err(CommandError::MatchNotFound.into());
            }
            // parked before the entry exists, so a poll never sees a due
            // entry whose anchor is still Matched
            self.try_transition(anchor_id, CommandState::Scheduled, |_| {})
                .await?;
            match self.scheduler.register(entry).await {
                Ok(entry) => Ok(entry),
                Err(err) => {
                    warn!(command_id = %anchor_id, %err, "schedule entry not stored, dropping anchor");
                    let reason = format!("schedule not registered: {err}");
                    self.try_transition(anchor_id, CommandState::Cancelled, move |c| {
                        c.reason = Some(reason.clone());
                    })
                    .await?;
                    Err(err)
                }
            }
        }
    }

    fn run_macro(
        &self,
        name: String,
        variables: Variables,
    ) -> impl Future<Output = Result<Vec<StepResult>, MacroAborted>> + Send {
        async move {
            let command_macro = self.macros.runnable(&name).map_err(MacroAborted::before_start)?;
            let parent = self
                .open_macro_run(&command_macro.name, variables)
                .await
                .map_err(MacroAborted::before_start)?;
            self.execute_macro(parent.id, &command_macro.name, &parent.variables)
                .await
                .unwrap_or_else(|err| Err(MacroAborted::before_start(err)))
        }
    }
}

impl<CR, QR, SR, T, P, I> CommandSubmitter for Orchestrator<CR, QR, SR, T, P, I>
where
    CR: CommandRepository + Send + Sync + 'static,
    QR: QueueRepository + Send + Sync + 'static,
    SR: ScheduleRepository + Send + Sync + 'static,
    T: Transport + 'static,
    P: EventPublisher + Send + Sync + 'static,
    I: IntentBackend + 'static,
{
    fn submit_and_wait<'a>(
        &'a self,
        text: String,
        origin: CommandOrigin,
        variables: Variables,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Command, VoxlineError>> {
        Box::pin(async move {
            let Accepted { command, waiter } = self.accept(text, origin, variables, true).await?;
            let Some(mut waiter) = waiter else {
                return Ok(command);
            };
            loop {
                let terminal = waiter.borrow_and_update().is_terminal();
                if terminal {
                    break;
                }
                tokio::select! {
                    () = cancel.cancelled() => {
                        self.untrack(command.id);
                        return Err(CommandError::Cancelled.into());
                    }
                    changed = waiter.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            self.load(command.id).await
        })
    }
}

impl<CR, QR, SR, T, P, I> FiringHandler for Orchestrator<CR, QR, SR, T, P, I>
where
    CR: CommandRepository + Send + Sync + 'static,
    QR: QueueRepository + Send + Sync + 'static,
    SR: ScheduleRepository + Send + Sync + 'static,
    T: Transport + 'static,
    P: EventPublisher + Send + Sync + 'static,
    I: IntentBackend + 'static,
{
    fn fire(&self, entry: &ScheduleEntry) -> impl Future<Output = Result<(), VoxlineError>> + Send {
        self.fire_entry(entry)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;
    use voxline_domain::command_macro::{Macro, MacroStep};
    use voxline_domain::error::ValidationError;
    use voxline_domain::template::Template;

    use super::*;
    use crate::ports::{IntentResponse, Recognition};
    use crate::registry::{MacroRegistry, TemplateRegistry};
    use crate::testing::{
        FakeTransport, InMemoryCommandRepo, InMemoryQueueRepo, InMemoryScheduleRepo, ManualClock,
        SpyPublisher,
    };

    /// Intent backend replying with a fixed answer.
    #[derive(Default)]
    pub(super) struct StubIntents(pub Option<IntentResponse>);

    impl IntentBackend for StubIntents {
        fn process(
            &self,
            _text: &str,
            _context: &serde_json::Value,
        ) -> impl Future<Output = Result<Option<IntentResponse>, VoxlineError>> + Send {
            let reply = self.0.clone();
            async { Ok(reply) }
        }
    }

    pub(super) type TestOrchestrator = Orchestrator<
        InMemoryCommandRepo,
        InMemoryQueueRepo,
        InMemoryScheduleRepo,
        FakeTransport,
        SpyPublisher,
        StubIntents,
    >;

    pub(super) struct Harness {
        pub orchestrator: Arc<TestOrchestrator>,
        pub commands: InMemoryCommandRepo,
        pub queue: InMemoryQueueRepo,
        pub schedules: InMemoryScheduleRepo,
        pub transport: FakeTransport,
        pub events: SpyPublisher,
        pub clock: Arc<ManualClock>,
    }

    fn exact(name: &str, pattern: &str) -> Template {
        Template::builder().name(name).pattern(pattern).build().unwrap()
    }

    pub(super) fn harness_with(
        transport: FakeTransport,
        intents: StubIntents,
        macros: Vec<Macro>,
    ) -> Harness {
        let templates = Arc::new(TemplateRegistry::new());
        templates.register(exact("lock_door", "lock the door")).unwrap();
        templates.register(exact("close_blinds", "close the blinds")).unwrap();
        let macro_registry = Arc::new(MacroRegistry::new());
        for command_macro in macros {
            macro_registry.register(command_macro).unwrap();
        }

        let commands = InMemoryCommandRepo::default();
        let queue = InMemoryQueueRepo::default();
        let schedules = InMemoryScheduleRepo::default();
        let events = SpyPublisher::default();
        let clock = ManualClock::at("2030-01-01T10:00:00Z");

        let orchestrator = Orchestrator::new(Collaborators {
            commands: commands.clone(),
            queue: OfflineQueue::with_default_retries(queue.clone()),
            scheduler: Scheduler::new(schedules.clone(), Duration::from_secs(60)),
            transport: transport.clone(),
            publisher: events.clone(),
            intents,
            matcher: TemplateMatcher::with_defaults(templates, 2).unwrap(),
            macros: MacroEngine::new(macro_registry),
            clock: clock.clone(),
        });

        Harness {
            orchestrator,
            commands,
            queue,
            schedules,
            transport,
            events,
            clock,
        }
    }

    pub(super) fn harness(transport: FakeTransport) -> Harness {
        harness_with(transport, StubIntents::default(), Vec::new())
    }

    pub(super) async fn eventually(h: &Harness, id: CommandId, state: CommandState) -> Command {
        for _ in 0..400 {
            if let Some(command) = h.commands.get(id) {
                if command.state == state {
                    return command;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "command {id} never reached {state}, stuck in {:?}",
            h.commands.get(id).map(|c| c.state)
        );
    }

    async fn submit(h: &Harness, text: &str) -> Submission {
        h.orchestrator
            .submit(text.to_string(), CommandOrigin::Interactive)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn should_complete_matched_command_over_available_transport() {
        let h = harness(FakeTransport::online());

        let submission = submit(&h, "lock the door").await;
        let command = eventually(&h, submission.command_id, CommandState::Completed).await;

        assert_eq!(submission.resolution.kind(), "matched_template");
        assert_eq!(
            h.events.transitions(command.id),
            vec![CommandState::Matched, CommandState::Dispatched, CommandState::Completed]
        );
        assert_eq!(h.transport.delivered(), vec![command.id]);
        assert!(command.succeeded());
    }

    #[tokio::test]
    async fn should_cancel_unmatched_input_without_delivery() {
        let h = harness(FakeTransport::online());

        let submission = submit(&h, "what is the capital of France").await;

        assert!(submission.is_unmatched());
        assert_eq!(submission.accepted(), Err(CommandError::MatchNotFound));
        let command = h.commands.get(submission.command_id).unwrap();
        assert_eq!(command.state, CommandState::Cancelled);
        assert_eq!(command.reason.as_deref(), Some(UNMATCHED_REASON));
        assert!(h.transport.delivered().is_empty());
        assert!(h
            .events
            .events()
            .iter()
            .any(|e| e.event_type == EventType::CommandUnmatched));
    }

    #[tokio::test]
    async fn should_reject_blank_input() {
        let h = harness(FakeTransport::online());

        let result = h
            .orchestrator
            .submit("   ".to_string(), CommandOrigin::Interactive)
            .await;

        assert!(matches!(
            result,
            Err(VoxlineError::Validation(ValidationError::EmptyText))
        ));
        assert!(h.commands.all().is_empty());
    }

    #[tokio::test]
    async fn should_queue_while_offline_and_complete_after_drain() {
        let h = harness(FakeTransport::offline());

        let submission = submit(&h, "lock the door").await;
        let id = submission.command_id;
        eventually(&h, id, CommandState::Queued).await;
        assert_eq!(h.queue.all().len(), 1);
        assert_eq!(h.orchestrator.drain_offline_queue().await.unwrap(), 0);

        h.transport.set_available(true);
        let delivered = h.orchestrator.drain_offline_queue().await.unwrap();

        assert_eq!(delivered, 1);
        let command = h.commands.get(id).unwrap();
        assert_eq!(command.state, CommandState::Completed);
        assert_eq!(command.retry_count, 0);
        assert_eq!(
            h.events.transitions(id),
            vec![
                CommandState::Matched,
                CommandState::Queued,
                CommandState::Synced,
                CommandState::Completed
            ]
        );
        assert!(h.queue.all()[0].synced);
    }

    #[tokio::test]
    async fn should_count_one_retry_per_failed_drain() {
        let h = harness(FakeTransport::offline());
        let id = submit(&h, "lock the door").await.command_id;
        eventually(&h, id, CommandState::Queued).await;
        h.transport.set_available(true);
        h.transport.fail_next(1);

        h.orchestrator.drain_offline_queue().await.unwrap();

        let command = h.commands.get(id).unwrap();
        assert_eq!(command.state, CommandState::Queued);
        assert_eq!(command.retry_count, 1);
        assert_eq!(h.queue.all()[0].retry_count, 1);
    }

    #[tokio::test]
    async fn should_fail_command_after_three_failed_deliveries_and_keep_entry() {
        let h = harness(FakeTransport::offline());
        let id = submit(&h, "lock the door").await.command_id;
        eventually(&h, id, CommandState::Queued).await;
        h.transport.set_available(true);
        h.transport.fail_next(3);

        for _ in 0..3 {
            h.orchestrator.drain_offline_queue().await.unwrap();
        }

        let command = h.commands.get(id).unwrap();
        assert_eq!(command.state, CommandState::Failed);
        assert_eq!(command.retry_count, 3);
        assert_eq!(
            command.reason.as_deref(),
            Some(CommandError::RetriesExhausted { attempts: 3 }.to_string().as_str())
        );
        let entries = h.queue.all();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_exhausted());
        assert_eq!(h.orchestrator.drain_offline_queue().await.unwrap(), 0);
        assert!(h.transport.delivered().is_empty());
    }

    #[tokio::test]
    async fn should_fall_back_to_queue_when_delivery_breaks() {
        let h = harness(FakeTransport::online());
        h.transport.fail_next(1);

        let id = submit(&h, "lock the door").await.command_id;
        eventually(&h, id, CommandState::Queued).await;

        assert_eq!(
            h.events.transitions(id),
            vec![CommandState::Matched, CommandState::Dispatched, CommandState::Queued]
        );
        assert_eq!(h.queue.all()[0].command_id, id);

        h.orchestrator.drain_offline_queue().await.unwrap();
        assert_eq!(h.commands.get(id).unwrap().state, CommandState::Completed);
        assert_eq!(h.transport.delivered(), vec![id]);
    }

    #[tokio::test]
    async fn should_run_macro_steps_as_separate_commands() {
        let bedtime = Macro::builder()
            .name("bedtime")
            .step(MacroStep::new("lock the door"))
            .step(MacroStep::new("close the blinds"))
            .build()
            .unwrap();
        let h = harness_with(FakeTransport::online(), StubIntents::default(), vec![bedtime]);

        let submission = submit(&h, "run bedtime").await;
        let parent = eventually(&h, submission.command_id, CommandState::Completed).await;

        assert_eq!(submission.resolution.kind(), "macro");
        let steps = h
            .commands
            .all()
            .into_iter()
            .filter(|c| c.origin == CommandOrigin::MacroStep)
            .collect::<Vec<_>>();
        assert_eq!(steps.len(), 2);
        assert_eq!(h.transport.delivered(), vec![steps[0].id, steps[1].id]);
        assert_eq!(parent.result.unwrap().data["steps"].as_array().unwrap().len(), 2);
        let step_events = h
            .events
            .events()
            .into_iter()
            .filter(|e| e.event_type == EventType::MacroStepCompleted)
            .count();
        assert_eq!(step_events, 2);
    }

    #[tokio::test]
    async fn should_fail_macro_when_a_step_is_unmatched() {
        let broken = Macro::builder()
            .name("broken")
            .step(MacroStep::new("lock the door"))
            .step(MacroStep::new("sing me a song"))
            .step(MacroStep::new("close the blinds"))
            .build()
            .unwrap();
        let h = harness_with(FakeTransport::online(), StubIntents::default(), vec![broken]);

        let id = submit(&h, "run macro broken").await.command_id;
        let parent = eventually(&h, id, CommandState::Failed).await;

        assert_eq!(h.transport.delivered().len(), 1);
        assert!(parent.reason.unwrap().contains("step 1"));
        assert_eq!(parent.result.unwrap().data["failed_step"], 1);
    }

    #[tokio::test]
    async fn should_return_step_results_from_run_macro() {
        let bedtime = Macro::builder()
            .name("bedtime")
            .step(MacroStep::new("lock the door"))
            .build()
            .unwrap();
        let h = harness_with(FakeTransport::online(), StubIntents::default(), vec![bedtime]);

        let steps = h
            .orchestrator
            .run_macro("bedtime".to_string(), Variables::new())
            .await
            .unwrap();

        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].state, CommandState::Completed);
        let unknown = h
            .orchestrator
            .run_macro("nope".to_string(), Variables::new())
            .await
            .unwrap_err();
        assert!(matches!(
            unknown.error,
            VoxlineError::Command(CommandError::MacroNotFound(_))
        ));
    }

    #[tokio::test]
    async fn should_record_parent_command_for_macro_run_by_name() {
        let bedtime = Macro::builder()
            .name("bedtime")
            .step(MacroStep::new("lock the door"))
            .build()
            .unwrap();
        let h = harness_with(FakeTransport::online(), StubIntents::default(), vec![bedtime]);

        h.orchestrator
            .run_macro("bedtime".to_string(), Variables::new())
            .await
            .unwrap();

        let parent = h
            .commands
            .all()
            .into_iter()
            .find(|c| c.is_macro())
            .unwrap();
        assert_eq!(parent.text, "run macro bedtime");
        assert_eq!(parent.state, CommandState::Completed);
        assert_eq!(
            h.events.transitions(parent.id),
            vec![CommandState::Matched, CommandState::Dispatched, CommandState::Completed]
        );
    }

    #[tokio::test]
    async fn should_stop_macro_run_by_name_when_parent_is_cancelled() {
        let slow = Macro::builder()
            .name("slow")
            .step(MacroStep::new("lock the door"))
            .step(MacroStep::new("close the blinds").with_delay(Duration::from_secs(600)))
            .build()
            .unwrap();
        let h = harness_with(FakeTransport::online(), StubIntents::default(), vec![slow]);

        let orchestrator = h.orchestrator.clone();
        let run = tokio::spawn(async move {
            orchestrator
                .run_macro("slow".to_string(), Variables::new())
                .await
        });
        let parent = loop {
            if let Some(parent) = h.commands.all().into_iter().find(|c| c.is_macro()) {
                break parent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        while h.transport.delivered().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        h.orchestrator.cancel(parent.id).await.unwrap();
        let aborted = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();

        assert!(matches!(
            aborted.error,
            VoxlineError::Command(CommandError::Cancelled)
        ));
        assert_eq!(h.commands.get(parent.id).unwrap().state, CommandState::Cancelled);
        assert_eq!(h.transport.delivered().len(), 1);
    }

    #[tokio::test]
    async fn should_wait_for_terminal_state_when_submitting_and_waiting() {
        let h = harness(FakeTransport::online());
        let token = CancellationToken::new();

        let command = h
            .orchestrator
            .submit_and_wait("close the blinds".into(), CommandOrigin::Interactive, Variables::new(), &token)
            .await
            .unwrap();

        assert_eq!(command.state, CommandState::Completed);
        let unmatched = h
            .orchestrator
            .submit_and_wait("hum a tune".into(), CommandOrigin::Interactive, Variables::new(), &token)
            .await
            .unwrap();
        assert_eq!(unmatched.state, CommandState::Cancelled);
    }

    #[tokio::test]
    async fn should_cancel_queued_command_and_withdraw_entry() {
        let h = harness(FakeTransport::offline());
        let id = submit(&h, "lock the door").await.command_id;
        eventually(&h, id, CommandState::Queued).await;

        let cancelled = h.orchestrator.cancel(id).await.unwrap();

        assert_eq!(cancelled.state, CommandState::Cancelled);
        assert_eq!(cancelled.reason.as_deref(), Some(CANCELLED_REASON));
        h.transport.set_available(true);
        h.orchestrator.drain_offline_queue().await.unwrap();
        assert!(h.transport.delivered().is_empty());
    }

    #[tokio::test]
    async fn should_refuse_to_cancel_terminal_command() {
        let h = harness(FakeTransport::online());
        let id = submit(&h, "lock the door").await.command_id;
        eventually(&h, id, CommandState::Completed).await;

        let err = h.orchestrator.cancel(id).await.unwrap_err();

        assert!(matches!(
            err,
            VoxlineError::Command(CommandError::InvalidTransition(_))
        ));
        assert_eq!(h.commands.get(id).unwrap().state, CommandState::Completed);
    }

    #[tokio::test]
    async fn should_return_not_found_for_unknown_command() {
        let h = harness(FakeTransport::online());
        let err = h.orchestrator.get_status(CommandId::new()).await.unwrap_err();
        assert!(matches!(err, VoxlineError::NotFound(_)));
    }

    fn one_shot(text: &str, at: &str) -> ScheduleRequest {
        ScheduleRequest {
            text: text.to_string(),
            expression: at.to_string(),
            recurring: false,
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn should_fire_one_shot_schedule_through_the_lifecycle() {
        let h = harness(FakeTransport::online());

        let entry = h
            .orchestrator
            .schedule(one_shot("lock the door", "2030-01-01T10:05:00Z"))
            .await
            .unwrap();
        let anchor = entry.command_id;
        assert_eq!(h.commands.get(anchor).unwrap().state, CommandState::Scheduled);
        assert_eq!(h.orchestrator.poll_schedules().await.unwrap(), 0);

        h.clock.advance(TimeDelta::minutes(5));
        assert_eq!(h.orchestrator.poll_schedules().await.unwrap(), 1);
        let command = eventually(&h, anchor, CommandState::Completed).await;

        assert_eq!(command.origin, CommandOrigin::Scheduled);
        assert_eq!(
            h.events.transitions(anchor),
            vec![
                CommandState::Matched,
                CommandState::Scheduled,
                CommandState::Pending,
                CommandState::Matched,
                CommandState::Dispatched,
                CommandState::Completed
            ]
        );
        assert!(h.schedules.all().is_empty());
    }

    #[tokio::test]
    async fn should_deliver_due_one_shot_polled_while_registration_is_in_flight() {
        let h = harness(FakeTransport::online());
        h.schedules.slow_create(50);

        let poll_when_visible = async {
            while h.schedules.all().is_empty() {
                tokio::task::yield_now().await;
            }
            h.orchestrator.poll_schedules().await.unwrap()
        };
        let (entry, fired) = tokio::join!(
            h.orchestrator
                .schedule(one_shot("lock the door", "2030-01-01T09:00:00Z")),
            poll_when_visible,
        );
        let anchor = entry.unwrap().command_id;

        assert_eq!(fired, 1);
        let command = eventually(&h, anchor, CommandState::Completed).await;
        assert_eq!(command.origin, CommandOrigin::Scheduled);
        assert_eq!(h.transport.delivered(), vec![anchor]);
        assert!(h.schedules.all().is_empty());
    }

    #[tokio::test]
    async fn should_cancel_anchor_when_schedule_entry_cannot_be_stored() {
        let h = harness(FakeTransport::online());
        h.schedules.fail_next_create();

        let err = h
            .orchestrator
            .schedule(one_shot("lock the door", "2030-01-01T12:00:00Z"))
            .await
            .unwrap_err();

        assert!(err.is_storage());
        let anchor = h.commands.all().pop().unwrap();
        assert_eq!(anchor.state, CommandState::Cancelled);
        assert!(anchor.reason.unwrap().starts_with("schedule not registered"));
        assert!(h.schedules.all().is_empty());
    }

    #[tokio::test]
    async fn should_reject_invalid_schedule_before_persisting() {
        let h = harness(FakeTransport::online());

        let err = h
            .orchestrator
            .schedule(one_shot("lock the door", "whenever you like"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            VoxlineError::Command(CommandError::InvalidSchedule { .. })
        ));
        assert!(h.commands.all().is_empty());
        assert!(h.schedules.all().is_empty());
    }

    #[tokio::test]
    async fn should_reject_schedule_for_unmatched_text() {
        let h = harness(FakeTransport::online());

        let err = h
            .orchestrator
            .schedule(one_shot("juggle", "2030-01-01T12:00:00Z"))
            .await
            .unwrap_err();

        assert!(matches!(err, VoxlineError::Command(CommandError::MatchNotFound)));
        assert!(h.schedules.all().is_empty());
    }

    #[tokio::test]
    async fn should_submit_new_command_on_each_recurring_firing() {
        let h = harness(FakeTransport::online());
        let entry = h
            .orchestrator
            .schedule(ScheduleRequest {
                text: "close the blinds".into(),
                expression: "* * * * *".into(),
                recurring: true,
                metadata: json!({ "room": "bedroom" }),
            })
            .await
            .unwrap();

        h.clock.advance(TimeDelta::seconds(61));
        assert_eq!(h.orchestrator.poll_schedules().await.unwrap(), 1);
        assert_eq!(h.orchestrator.poll_schedules().await.unwrap(), 0);

        let fired = h
            .commands
            .all()
            .into_iter()
            .find(|c| c.id != entry.command_id)
            .unwrap();
        assert_eq!(fired.origin, CommandOrigin::Scheduled);
        eventually(&h, fired.id, CommandState::Completed).await;
        assert_eq!(
            h.commands.get(entry.command_id).unwrap().state,
            CommandState::Scheduled
        );
        assert!(h.schedules.all()[0].next_run > h.clock.now());
    }

    #[tokio::test]
    async fn should_remove_schedule_entries_when_anchor_is_cancelled() {
        let h = harness(FakeTransport::online());
        let entry = h
            .orchestrator
            .schedule(ScheduleRequest {
                text: "close the blinds".into(),
                expression: "0 7 * * *".into(),
                recurring: true,
                metadata: serde_json::Value::Null,
            })
            .await
            .unwrap();

        h.orchestrator.cancel(entry.command_id).await.unwrap();

        assert!(h.schedules.all().is_empty());
    }

    #[tokio::test]
    async fn should_pass_through_confident_intent_with_allowed_actions() {
        let reply = IntentResponse {
            response: "Starting the coffee machine".into(),
            confidence: 0.92,
            actions: vec![json!({"type": "api_call", "target": "coffee"}), json!({"type": "rm -rf"})],
        };
        let h = harness_with(FakeTransport::online(), StubIntents(Some(reply)), Vec::new());

        let submission = submit(&h, "make me a coffee").await;
        eventually(&h, submission.command_id, CommandState::Completed).await;

        let Resolution::RawPassthrough { actions, .. } = submission.resolution else {
            panic!("expected raw passthrough, got {:?}", submission.resolution);
        };
        assert_eq!(actions, vec![json!({"type": "api_call", "target": "coffee"})]);
    }

    #[tokio::test]
    async fn should_treat_unsure_intent_as_unmatched() {
        let reply = IntentResponse {
            response: "Maybe?".into(),
            confidence: 0.5,
            actions: vec![json!({"type": "api_call"})],
        };
        let h = harness_with(FakeTransport::online(), StubIntents(Some(reply)), Vec::new());

        let submission = submit(&h, "make me a coffee").await;

        assert!(submission.is_unmatched());
    }

    struct StubRecognizer(Option<&'static str>);

    impl Recognizer for StubRecognizer {
        fn recognize(
            &self,
            _audio: &[u8],
        ) -> impl Future<Output = Result<Option<Recognition>, VoxlineError>> + Send {
            let recognition = self.0.map(|text| Recognition {
                text: text.to_string(),
                confidence: 0.93,
            });
            async { Ok(recognition) }
        }
    }

    #[tokio::test]
    async fn should_submit_recognised_audio() {
        let h = harness(FakeTransport::online());

        let submission = h
            .orchestrator
            .submit_audio(&StubRecognizer(Some("lock the door")), b"pcm", CommandOrigin::Interactive)
            .await
            .unwrap();

        assert!(submission.accepted().is_ok());
        let silence = h
            .orchestrator
            .submit_audio(&StubRecognizer(None), b"", CommandOrigin::Interactive)
            .await
            .unwrap_err();
        assert!(matches!(silence, VoxlineError::Command(CommandError::MatchNotFound)));
    }
}

//! In-memory port implementations shared by the unit tests of this crate.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::TimeDelta;
use voxline_domain::command::{Command, CommandState, DeliveryReceipt, Variables};
use voxline_domain::error::{ConflictError, NotFoundError, VoxlineError};
use voxline_domain::event::{Event, EventType};
use voxline_domain::id::{CommandId, ScheduleEntryId};
use voxline_domain::queue::QueuedCommand;
use voxline_domain::schedule::ScheduleEntry;
use voxline_domain::time::Timestamp;

use crate::ports::{
    Clock, CommandRepository, EntityExtractor, EventPublisher, ExtractionError, QueueRepository,
    ScheduleRepository, SemanticScorer, Transport, TransportError,
};

// ── Command repo ───────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct InMemoryCommandRepo {
    store: Arc<Mutex<HashMap<CommandId, Command>>>,
}

impl InMemoryCommandRepo {
    pub fn get(&self, id: CommandId) -> Option<Command> {
        self.store.lock().unwrap().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<Command> {
        let mut all: Vec<Command> = self.store.lock().unwrap().values().cloned().collect();
        all.sort_by_key(|c| c.created_at);
        all
    }
}

impl CommandRepository for InMemoryCommandRepo {
    fn create(&self, command: Command) -> impl Future<Output = Result<Command, VoxlineError>> + Send {
        self.store.lock().unwrap().insert(command.id, command.clone());
        async { Ok(command) }
    }

    fn get_by_id(
        &self,
        id: CommandId,
    ) -> impl Future<Output = Result<Option<Command>, VoxlineError>> + Send {
        let result = self.store.lock().unwrap().get(&id).cloned();
        async { Ok(result) }
    }

    fn update(&self, mut command: Command) -> impl Future<Output = Result<Command, VoxlineError>> + Send {
        let mut store = self.store.lock().unwrap();
        let result = match store.get(&command.id) {
            None => Err(NotFoundError {
                entity: "Command",
                id: command.id.to_string(),
            }
            .into()),
            Some(stored) if stored.version != command.version => Err(ConflictError {
                entity: "Command",
                id: command.id.to_string(),
                expected_version: command.version,
            }
            .into()),
            Some(_) => {
                command.version += 1;
                store.insert(command.id, command.clone());
                Ok(command)
            }
        };
        async { result }
    }

    fn find_by_state(
        &self,
        state: CommandState,
    ) -> impl Future<Output = Result<Vec<Command>, VoxlineError>> + Send {
        let result: Vec<Command> = self.all().into_iter().filter(|c| c.state == state).collect();
        async { Ok(result) }
    }

    fn delete_terminal_before(
        &self,
        cutoff: Timestamp,
    ) -> impl Future<Output = Result<u64, VoxlineError>> + Send {
        let mut store = self.store.lock().unwrap();
        let before = store.len();
        store.retain(|_, c| !(c.state.is_terminal() && c.updated_at < cutoff));
        let removed = (before - store.len()) as u64;
        async move { Ok(removed) }
    }
}

// ── Schedule repo ──────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct InMemoryScheduleRepo {
    store: Arc<Mutex<HashMap<ScheduleEntryId, ScheduleEntry>>>,
    /// Times `create` yields to the runtime after the row is visible.
    slow_create: Arc<AtomicUsize>,
    fail_create: Arc<AtomicBool>,
}

impl InMemoryScheduleRepo {
    pub fn all(&self) -> Vec<ScheduleEntry> {
        self.store.lock().unwrap().values().cloned().collect()
    }

    /// Make `create` return to the caller only after `yields` scheduler
    /// turns, leaving the inserted entry visible to concurrent readers.
    pub fn slow_create(&self, yields: usize) {
        self.slow_create.store(yields, Ordering::SeqCst);
    }

    pub fn fail_next_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }
}

impl ScheduleRepository for InMemoryScheduleRepo {
    fn create(
        &self,
        entry: ScheduleEntry,
    ) -> impl Future<Output = Result<ScheduleEntry, VoxlineError>> + Send {
        let failed = self.fail_create.swap(false, Ordering::SeqCst);
        if !failed {
            self.store.lock().unwrap().insert(entry.id, entry.clone());
        }
        let yields = self.slow_create.load(Ordering::SeqCst);
        async move {
            for _ in 0..yields {
                tokio::task::yield_now().await;
            }
            if failed {
                return Err(VoxlineError::Storage("schedule table locked".into()));
            }
            Ok(entry)
        }
    }

    fn get_by_id(
        &self,
        id: ScheduleEntryId,
    ) -> impl Future<Output = Result<Option<ScheduleEntry>, VoxlineError>> + Send {
        let result = self.store.lock().unwrap().get(&id).cloned();
        async { Ok(result) }
    }

    fn find_due(
        &self,
        now: Timestamp,
    ) -> impl Future<Output = Result<Vec<ScheduleEntry>, VoxlineError>> + Send {
        let mut due: Vec<ScheduleEntry> = self
            .store
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.next_run <= now)
            .cloned()
            .collect();
        due.sort_by_key(|e| e.next_run);
        async { Ok(due) }
    }

    fn find_by_command(
        &self,
        command_id: CommandId,
    ) -> impl Future<Output = Result<Vec<ScheduleEntry>, VoxlineError>> + Send {
        let result: Vec<ScheduleEntry> = self
            .store
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.command_id == command_id)
            .cloned()
            .collect();
        async { Ok(result) }
    }

    fn update(
        &self,
        entry: ScheduleEntry,
    ) -> impl Future<Output = Result<ScheduleEntry, VoxlineError>> + Send {
        self.store.lock().unwrap().insert(entry.id, entry.clone());
        async { Ok(entry) }
    }

    fn delete(&self, id: ScheduleEntryId) -> impl Future<Output = Result<(), VoxlineError>> + Send {
        self.store.lock().unwrap().remove(&id);
        async { Ok(()) }
    }
}

// ── Queue repo ─────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct InMemoryQueueRepo {
    entries: Arc<Mutex<Vec<QueuedCommand>>>,
}

impl InMemoryQueueRepo {
    pub fn all(&self) -> Vec<QueuedCommand> {
        self.entries.lock().unwrap().clone()
    }
}

impl QueueRepository for InMemoryQueueRepo {
    fn enqueue(
        &self,
        entry: QueuedCommand,
    ) -> impl Future<Output = Result<QueuedCommand, VoxlineError>> + Send {
        self.entries.lock().unwrap().push(entry.clone());
        async { Ok(entry) }
    }

    fn find_pending(&self) -> impl Future<Output = Result<Vec<QueuedCommand>, VoxlineError>> + Send {
        let result: Vec<QueuedCommand> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.is_eligible())
            .cloned()
            .collect();
        async { Ok(result) }
    }

    fn find_by_command(
        &self,
        command_id: CommandId,
    ) -> impl Future<Output = Result<Option<QueuedCommand>, VoxlineError>> + Send {
        let result = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|e| e.command_id == command_id)
            .cloned();
        async { Ok(result) }
    }

    fn update(
        &self,
        entry: QueuedCommand,
    ) -> impl Future<Output = Result<QueuedCommand, VoxlineError>> + Send {
        let mut entries = self.entries.lock().unwrap();
        let result = match entries.iter_mut().find(|e| e.id == entry.id) {
            Some(stored) => {
                *stored = entry.clone();
                Ok(entry)
            }
            None => Err(NotFoundError {
                entity: "QueuedCommand",
                id: entry.id.to_string(),
            }
            .into()),
        };
        async { result }
    }
}

// ── Event publisher ────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct SpyPublisher {
    events: Arc<Mutex<Vec<Event>>>,
}

impl SpyPublisher {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn transitions(&self, id: CommandId) -> Vec<CommandState> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == EventType::StateChanged && e.command_id == Some(id))
            .filter_map(|e| serde_json::from_value(e.data["to"].clone()).ok())
            .collect()
    }
}

impl EventPublisher for SpyPublisher {
    fn publish(&self, event: Event) -> impl Future<Output = Result<(), VoxlineError>> + Send {
        self.events.lock().unwrap().push(event);
        async { Ok(()) }
    }
}

// ── Transport ──────────────────────────────────────────────────

/// Scriptable transport: replies are popped from a script, falling back to
/// a successful receipt once the script is exhausted.
#[derive(Clone)]
pub struct FakeTransport {
    available: Arc<AtomicBool>,
    script: Arc<Mutex<VecDeque<Result<DeliveryReceipt, TransportError>>>>,
    delivered: Arc<Mutex<Vec<CommandId>>>,
}

impl FakeTransport {
    pub fn online() -> Self {
        Self {
            available: Arc::new(AtomicBool::new(true)),
            script: Arc::default(),
            delivered: Arc::default(),
        }
    }

    pub fn offline() -> Self {
        let transport = Self::online();
        transport.set_available(false);
        transport
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn fail_next(&self, times: usize) {
        let mut script = self.script.lock().unwrap();
        for _ in 0..times {
            script.push_back(Err(TransportError::ConnectionLost("reset by peer".into())));
        }
    }

    pub fn reply_next(&self, receipt: DeliveryReceipt) {
        self.script.lock().unwrap().push_back(Ok(receipt));
    }

    pub fn delivered(&self) -> Vec<CommandId> {
        self.delivered.lock().unwrap().clone()
    }
}

impl Transport for FakeTransport {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn deliver(
        &self,
        command: &Command,
    ) -> impl Future<Output = Result<DeliveryReceipt, TransportError>> + Send {
        let result = if self.is_available() {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(DeliveryReceipt::ok(serde_json::json!({"echo": command.text}))))
        } else {
            Err(TransportError::NotConnected)
        };
        if result.is_ok() {
            self.delivered.lock().unwrap().push(command.id);
        }
        async { result }
    }
}

// ── Clock ──────────────────────────────────────────────────────

pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn at(rfc3339: &str) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(rfc3339.parse().unwrap()),
        })
    }

    pub fn advance(&self, delta: TimeDelta) {
        *self.now.lock().unwrap() += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap()
    }
}

// ── NLP stubs ──────────────────────────────────────────────────

/// Semantic scorer returning a fixed value.
pub struct FixedScorer(pub f64);

impl SemanticScorer for FixedScorer {
    fn similarity(&self, _text: &str, _pattern: &str) -> f64 {
        self.0
    }
}

/// Extractor returning fixed variables, or failing for listed patterns.
#[derive(Default)]
pub struct StubExtractor {
    pub variables: Variables,
    pub failing_patterns: Vec<String>,
}

impl EntityExtractor for StubExtractor {
    fn extract(&self, _text: &str, pattern: &str) -> Result<Variables, ExtractionError> {
        if self.failing_patterns.iter().any(|p| p == pattern) {
            return Err(ExtractionError(format!("cannot analyse against {pattern}")));
        }
        Ok(self.variables.clone())
    }
}

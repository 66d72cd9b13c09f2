//! # voxline-app
//!
//! Application layer: use-cases and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **driven ports** that adapters implement:
//!   - `CommandRepository`, `ScheduleRepository`, `QueueRepository`: the durable store
//!   - `Transport`: realtime delivery to the processing backend
//!   - `EventPublisher`: lifecycle notifications
//!   - `SemanticScorer`, `EntityExtractor`, `Recognizer`, `IntentBackend`: language collaborators
//! - Define **driving ports** the outer surfaces call:
//!   - `CommandGateway`: submit, status, cancel, schedule, run macro
//! - Implement the lifecycle services:
//!   - `TemplateMatcher`, `MacroEngine`, `Scheduler`, `OfflineQueue`
//!   - `Orchestrator`, the only writer of command state
//! - Provide **in-process infrastructure** (event bus, registries, background loops)
//!
//! ## Dependency rule
//! Depends on `voxline-domain` only (plus `tokio` for tasks and channels).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod background;
pub mod event_bus;
pub mod nlp;
pub mod ports;
pub mod registry;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;

//! # voxline-domain
//!
//! Pure domain model for the voxline command lifecycle orchestrator.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error taxonomy, timestamps
//! - Define **Commands** and their lifecycle state machine
//! - Define **Templates** (pattern-plus-response intent definitions) and the
//!   string similarity used to score them
//! - Define **Macros** (ordered sub-command sequences with delays/conditions)
//! - Define **Schedule entries** and the schedule expressions that drive them
//! - Define **Queued commands** (offline-buffered delivery records)
//! - Define **Events** (state-transition notifications)
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod command;
pub mod command_macro;
pub mod event;
pub mod queue;
pub mod schedule;
pub mod template;

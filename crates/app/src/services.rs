//! Application services: the command lifecycle use-cases.
//!
//! Each service accepts port trait implementations via generic parameters
//! (constructor injection), keeping this layer decoupled from concrete adapters.

pub mod macro_engine;
pub mod offline_queue;
pub mod orchestrator;
pub mod scheduler;
pub mod template_matcher;

//! # voxline-adapter-realtime-ws
//!
//! Realtime channel to the remote processing backend over a WebSocket.
//!
//! ## Responsibilities
//! - Hold one authenticated duplex session at a time
//! - Keep it alive with periodic pings and dispatch inbound JSON by `type`
//! - Reconnect with bounded exponential backoff when the session breaks
//! - Implement the [`Transport`](voxline_app::ports::Transport) port: push a
//!   command and wait for its `command_result`
//!
//! ## Dependency rule
//! Depends on `voxline-app` (for port traits) and `voxline-domain` (for domain types).

pub mod backoff;
pub mod channel;
pub mod config;
pub mod error;
pub mod protocol;

pub use channel::{ChannelStatus, RealtimeChannel};
pub use config::RealtimeConfig;
pub use error::RealtimeError;

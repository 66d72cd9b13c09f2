//! Shared application state for axum handlers.

use std::sync::Arc;

use voxline_app::event_bus::CommandEventBus;
use voxline_app::ports::CommandGateway;

/// Application state shared across all axum handlers.
///
/// Generic over the gateway to avoid dynamic dispatch. `Clone` is
/// implemented manually so the gateway itself does not need to be `Clone`.
pub struct AppState<G> {
    /// Entry point into the command lifecycle.
    pub gateway: Arc<G>,
    /// Bus the SSE stream subscribes to.
    pub event_bus: Arc<CommandEventBus>,
}

impl<G> Clone for AppState<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            event_bus: Arc::clone(&self.event_bus),
        }
    }
}

impl<G: CommandGateway + 'static> AppState<G> {
    pub fn new(gateway: Arc<G>, event_bus: Arc<CommandEventBus>) -> Self {
        Self { gateway, event_bus }
    }
}

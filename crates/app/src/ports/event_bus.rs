//! Event bus port: publish/subscribe for command lifecycle events.

use std::future::Future;

use voxline_domain::error::VoxlineError;
use voxline_domain::event::Event;

/// Publishes lifecycle events to interested subscribers.
pub trait EventPublisher {
    /// Publish an event to all current subscribers.
    fn publish(&self, event: Event) -> impl Future<Output = Result<(), VoxlineError>> + Send;
}

impl<T: EventPublisher + Send + Sync> EventPublisher for std::sync::Arc<T> {
    fn publish(&self, event: Event) -> impl Future<Output = Result<(), VoxlineError>> + Send {
        (**self).publish(event)
    }
}

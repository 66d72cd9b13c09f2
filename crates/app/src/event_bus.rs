//! Command lifecycle notifications for in-process subscribers.
//!
//! Everything the orchestrator publishes goes through one broadcast channel.
//! A subscriber states what it follows with an [`EventFilter`] (a single
//! command, some event types, or both) and only sees matching events.

use std::future::Future;

use futures_util::stream::{self, Stream};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;
use voxline_domain::command::CommandState;
use voxline_domain::error::VoxlineError;
use voxline_domain::event::{Event, EventType};
use voxline_domain::id::CommandId;

use crate::ports::EventPublisher;

/// What a [`Subscription`] lets through. The default follows everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    command_id: Option<CommandId>,
    types: Vec<EventType>,
}

impl EventFilter {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Events about `id` only.
    #[must_use]
    pub fn command(id: CommandId) -> Self {
        Self {
            command_id: Some(id),
            types: Vec::new(),
        }
    }

    /// Restrict to `types`. An empty list keeps every type.
    #[must_use]
    pub fn with_types(mut self, types: impl IntoIterator<Item = EventType>) -> Self {
        self.types = types.into_iter().collect();
        self
    }

    #[must_use]
    pub fn accepts(&self, event: &Event) -> bool {
        self.command_id.is_none_or(|id| event.command_id == Some(id))
            && (self.types.is_empty() || self.types.contains(&event.event_type))
    }
}

/// A filtered view on the bus.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
    filter: EventFilter,
    missed: u64,
}

impl Subscription {
    /// The next matching event, or `None` once the bus is gone.
    ///
    /// A subscriber that falls behind by more than the bus capacity loses
    /// the oldest events; they are counted in [`missed`](Self::missed).
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.accepts(&event) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged, events dropped");
                    self.missed += skipped;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Wait until the followed command announces a terminal state.
    ///
    /// Returns `None` if the bus closes first.
    pub async fn until_terminal(&mut self) -> Option<CommandState> {
        while let Some(event) = self.recv().await {
            if event.event_type != EventType::StateChanged {
                continue;
            }
            match serde_json::from_value::<CommandState>(event.data["to"].clone()) {
                Ok(state) if state.is_terminal() => return Some(state),
                _ => {}
            }
        }
        None
    }

    /// Events lost to lagging so far.
    #[must_use]
    pub fn missed(&self) -> u64 {
        self.missed
    }

    pub fn into_stream(self) -> impl Stream<Item = Event> + Send + 'static {
        stream::unfold(self, |mut subscription| async move {
            subscription.recv().await.map(|event| (event, subscription))
        })
    }
}

/// In-process fan-out of lifecycle events.
///
/// Publishing never fails: with nobody subscribed the event is dropped.
pub struct CommandEventBus {
    sender: broadcast::Sender<Event>,
}

impl CommandEventBus {
    /// `capacity` is how far a subscriber may fall behind before it starts
    /// losing events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Follow events published from now on that pass `filter`.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            filter,
            missed: 0,
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventPublisher for CommandEventBus {
    fn publish(&self, event: Event) -> impl Future<Output = Result<(), VoxlineError>> + Send {
        // only fails without receivers
        let _ = self.sender.send(event);
        async { Ok(()) }
    }
}

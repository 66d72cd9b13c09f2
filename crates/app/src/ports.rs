//! Port definitions: traits that adapters implement.
//!
//! Ports are the boundaries between the application core and the outside world.
//! They are defined here (in `app`) so that both the use-case layer and the
//! adapter layer can depend on them without creating circular dependencies.

pub mod clock;
pub mod event_bus;
pub mod gateway;
pub mod nlp;
pub mod storage;
pub mod transport;

pub use clock::{Clock, SystemClock};
pub use event_bus::EventPublisher;
pub use gateway::{CommandGateway, CommandSubmitter, ScheduleRequest, Submission};
pub use nlp::{
    EntityExtractor, ExtractionError, IntentBackend, IntentResponse, NoIntentBackend,
    Recognition, Recognizer, SemanticScorer,
};
pub use storage::{CommandRepository, QueueRepository, ScheduleRepository};
pub use transport::{CredentialProvider, StaticCredential, Transport, TransportError};

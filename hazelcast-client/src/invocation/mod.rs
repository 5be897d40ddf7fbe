//! Invocation dispatch: correlating requests with responses and events.

mod events;
mod pending;
pub(crate) mod retry;
mod service;

pub use events::{EventHandler, EventHandlerRegistry};
pub use pending::{InvocationTable, PendingResponse};
pub use service::{ClusterMessaging, CorrelationIdSequence, InvocationService, InvocationTarget};

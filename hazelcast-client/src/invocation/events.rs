//! Routing of event messages to listener handlers by correlation id.

use std::collections::HashMap;
use std::sync::Arc;

use hazelcast_core::ClientMessage;
use parking_lot::RwLock;
use tracing::debug;

/// Callback invoked with every event message of one listener registration.
///
/// Handlers run on the connection's read loop and must not block.
pub type EventHandler = Arc<dyn Fn(ClientMessage) + Send + Sync>;

/// Event handlers keyed by the correlation id of the registering request.
#[derive(Default)]
pub struct EventHandlerRegistry {
    handlers: RwLock<HashMap<i64, EventHandler>>,
}

impl std::fmt::Debug for EventHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlerRegistry")
            .field("handlers", &self.handlers.read().len())
            .finish()
    }
}

impl EventHandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for events carrying `correlation_id`, replacing
    /// any previous handler.
    pub fn add(&self, correlation_id: i64, handler: EventHandler) {
        self.handlers.write().insert(correlation_id, handler);
    }

    /// Removes the handler for `correlation_id`.
    pub fn remove(&self, correlation_id: i64) -> bool {
        self.handlers.write().remove(&correlation_id).is_some()
    }

    /// Returns true if a handler is registered for `correlation_id`.
    pub fn contains(&self, correlation_id: i64) -> bool {
        self.handlers.read().contains_key(&correlation_id)
    }

    /// Returns the number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Returns true if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hands `message` to its handler. Returns false if none is registered.
    pub fn dispatch(&self, message: ClientMessage) -> bool {
        let Some(correlation_id) = message.correlation_id() else {
            debug!("dropping event without an initial frame");
            return false;
        };
        let handler = self.handlers.read().get(&correlation_id).cloned();
        match handler {
            Some(handler) => {
                handler(message);
                true
            }
            None => {
                debug!(correlation_id, message_type = ?message.message_type(), "dropping event for unknown handler");
                false
            }
        }
    }
}

//! Client lifecycle events.

use std::fmt;

use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Events emitted during client lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// The client is starting and initializing resources.
    Starting,
    /// The client has started and is ready to accept operations.
    Started,
    /// The client is connected to the cluster and known objects are replayed.
    ClientConnected,
    /// The client lost its last connection to the cluster.
    ClientDisconnected,
    /// The client is beginning the shutdown process.
    ShuttingDown,
    /// The client has completed shutdown.
    Shutdown,
}

impl LifecycleEvent {
    /// Returns a human-readable name for this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::ClientConnected => "CLIENT_CONNECTED",
            Self::ClientDisconnected => "CLIENT_DISCONNECTED",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Shutdown => "SHUTDOWN",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Broadcasts lifecycle events and remembers the latest one.
///
/// Receivers only see events fired after they subscribed.
#[derive(Debug)]
pub struct LifecycleService {
    sender: broadcast::Sender<LifecycleEvent>,
    last: Mutex<Option<LifecycleEvent>>,
}

impl LifecycleService {
    /// Creates a service whose subscribers may lag by up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            last: Mutex::new(None),
        }
    }

    /// Subscribes to future lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Returns the most recently fired event.
    pub fn last_event(&self) -> Option<LifecycleEvent> {
        *self.last.lock()
    }

    /// Returns true while the client has not begun shutting down.
    pub fn is_running(&self) -> bool {
        !matches!(
            self.last_event(),
            Some(LifecycleEvent::ShuttingDown | LifecycleEvent::Shutdown)
        )
    }

    pub(crate) fn fire(&self, event: LifecycleEvent) {
        *self.last.lock() = Some(event);
        tracing::info!(event = %event, "lifecycle event");
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}

impl Default for LifecycleService {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_event_display() {
        assert_eq!(LifecycleEvent::Starting.to_string(), "STARTING");
        assert_eq!(LifecycleEvent::ClientConnected.to_string(), "CLIENT_CONNECTED");
        assert_eq!(LifecycleEvent::ClientDisconnected.to_string(), "CLIENT_DISCONNECTED");
        assert_eq!(LifecycleEvent::Shutdown.to_string(), "SHUTDOWN");
    }

    #[tokio::test]
    async fn test_subscribers_receive_events_in_order() {
        let service = LifecycleService::default();
        let mut events = service.subscribe();

        service.fire(LifecycleEvent::Starting);
        service.fire(LifecycleEvent::Started);

        assert_eq!(events.recv().await.unwrap(), LifecycleEvent::Starting);
        assert_eq!(events.recv().await.unwrap(), LifecycleEvent::Started);
        assert_eq!(service.last_event(), Some(LifecycleEvent::Started));
    }

    #[test]
    fn test_is_running_until_shutdown_starts() {
        let service = LifecycleService::default();
        assert!(service.is_running());

        service.fire(LifecycleEvent::ClientDisconnected);
        assert!(service.is_running());

        service.fire(LifecycleEvent::ShuttingDown);
        assert!(!service.is_running());
    }
}

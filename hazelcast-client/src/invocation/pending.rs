//! Outstanding invocations of one connection, keyed by correlation id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use hazelcast_core::{ClientMessage, HazelcastError, Result};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

struct PendingInvocation {
    serial: u64,
    sender: oneshot::Sender<Result<ClientMessage>>,
}

#[derive(Default)]
struct TableInner {
    entries: HashMap<i64, PendingInvocation>,
    closed: Option<HazelcastError>,
}

/// Completion slots of the invocations waiting on one connection.
///
/// Each correlation id has at most one entry, and an entry is removed the
/// moment it completes, fails, or its waiter goes away.
#[derive(Default)]
pub struct InvocationTable {
    inner: Mutex<TableInner>,
    next_serial: AtomicU64,
}

impl std::fmt::Debug for InvocationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("InvocationTable")
            .field("pending", &inner.entries.len())
            .field("closed", &inner.closed.is_some())
            .finish()
    }
}

impl InvocationTable {
    /// Creates an empty, open table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for `correlation_id`.
    ///
    /// Fails with `InvalidOperation` if the id is already pending, or with
    /// the closing error once the table was failed.
    pub fn register(self: &Arc<Self>, correlation_id: i64) -> Result<PendingResponse> {
        let mut inner = self.inner.lock();
        if let Some(cause) = &inner.closed {
            return Err(cause.clone());
        }
        if inner.entries.contains_key(&correlation_id) {
            return Err(HazelcastError::InvalidOperation(format!(
                "correlation id {} is already pending",
                correlation_id
            )));
        }

        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        inner
            .entries
            .insert(correlation_id, PendingInvocation { serial, sender });

        Ok(PendingResponse {
            correlation_id,
            serial,
            receiver,
            table: Arc::downgrade(self),
        })
    }

    /// Returns true if `correlation_id` is pending.
    pub fn contains(&self, correlation_id: i64) -> bool {
        self.inner.lock().entries.contains_key(&correlation_id)
    }

    /// Returns the number of pending invocations.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true once [`InvocationTable::fail_all`] ran.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed.is_some()
    }

    /// Resolves the invocation waiting on the message's correlation id.
    ///
    /// Returns false for late or duplicate responses, which are discarded.
    pub fn complete(&self, message: ClientMessage) -> bool {
        match message.correlation_id() {
            Some(correlation_id) => self.resolve(correlation_id, Ok(message)),
            None => {
                debug!("discarding response without an initial frame");
                false
            }
        }
    }

    /// Fails the invocation waiting on `correlation_id`.
    pub fn fail(&self, correlation_id: i64, error: HazelcastError) -> bool {
        self.resolve(correlation_id, Err(error))
    }

    fn resolve(&self, correlation_id: i64, outcome: Result<ClientMessage>) -> bool {
        let entry = self.inner.lock().entries.remove(&correlation_id);
        match entry {
            Some(pending) => {
                if pending.sender.send(outcome).is_err() {
                    debug!(correlation_id, "invocation was abandoned before completion");
                }
                true
            }
            None => {
                debug!(correlation_id, "discarding response without pending invocation");
                false
            }
        }
    }

    /// Removes an entry without completing it.
    pub fn remove(&self, correlation_id: i64) -> bool {
        self.inner.lock().entries.remove(&correlation_id).is_some()
    }

    fn remove_if_serial(&self, correlation_id: i64, serial: u64) {
        let mut inner = self.inner.lock();
        if inner
            .entries
            .get(&correlation_id)
            .is_some_and(|entry| entry.serial == serial)
        {
            inner.entries.remove(&correlation_id);
        }
    }

    /// Fails every pending invocation with `cause` and rejects further
    /// registrations with the same error.
    pub fn fail_all(&self, cause: HazelcastError) -> usize {
        let entries = {
            let mut inner = self.inner.lock();
            if inner.closed.is_none() {
                inner.closed = Some(cause.clone());
            }
            std::mem::take(&mut inner.entries)
        };

        let count = entries.len();
        for (_, pending) in entries {
            let _ = pending.sender.send(Err(cause.clone()));
        }
        count
    }
}

/// The receiving side of a registered invocation.
///
/// Dropping it before completion removes the entry from its table.
#[must_use = "dropping a pending response abandons the invocation"]
pub struct PendingResponse {
    correlation_id: i64,
    serial: u64,
    receiver: oneshot::Receiver<Result<ClientMessage>>,
    table: Weak<InvocationTable>,
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse")
            .field("correlation_id", &self.correlation_id)
            .finish_non_exhaustive()
    }
}

impl PendingResponse {
    /// Returns the correlation id this response is waiting for.
    pub fn correlation_id(&self) -> i64 {
        self.correlation_id
    }

    /// Waits for the response or the failure of the invocation.
    pub async fn wait(mut self) -> Result<ClientMessage> {
        match (&mut self.receiver).await {
            Ok(outcome) => outcome,
            Err(_) => Err(HazelcastError::TargetDisconnected(format!(
                "invocation {} was dropped by its connection",
                self.correlation_id
            ))),
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.remove_if_serial(self.correlation_id, self.serial);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hazelcast_core::protocol::CLIENT_PING;

    fn response(correlation_id: i64) -> ClientMessage {
        ClientMessage::create_response(CLIENT_PING + 1, correlation_id, 0)
    }

    #[tokio::test]
    async fn test_complete_resolves_waiter() {
        let table = Arc::new(InvocationTable::new());
        let pending = table.register(7).unwrap();
        assert!(table.contains(7));

        assert!(table.complete(response(7)));
        assert!(!table.contains(7));
        assert_eq!(pending.wait().await.unwrap().correlation_id(), Some(7));
    }

    #[tokio::test]
    async fn test_duplicate_response_is_discarded() {
        let table = Arc::new(InvocationTable::new());
        let pending = table.register(1).unwrap();

        assert!(table.complete(response(1)));
        assert!(!table.complete(response(1)));
        assert!(pending.wait().await.is_ok());
    }

    #[test]
    fn test_register_duplicate_id_fails() {
        let table = Arc::new(InvocationTable::new());
        let _pending = table.register(3).unwrap();
        assert!(matches!(
            table.register(3),
            Err(HazelcastError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_drop_removes_entry() {
        let table = Arc::new(InvocationTable::new());
        let pending = table.register(9).unwrap();
        assert_eq!(table.len(), 1);
        drop(pending);
        assert!(table.is_empty());
        assert!(!table.complete(response(9)));
    }

    #[test]
    fn test_stale_guard_keeps_newer_entry() {
        let table = Arc::new(InvocationTable::new());
        let first = table.register(4).unwrap();
        assert!(table.remove(4));
        let _second = table.register(4).unwrap();

        drop(first);
        assert!(table.contains(4));
    }

    #[tokio::test]
    async fn test_fail_all_fails_every_waiter_and_closes() {
        let table = Arc::new(InvocationTable::new());
        let waiters: Vec<_> = (1..=3).map(|id| table.register(id).unwrap()).collect();

        let failed = table.fail_all(HazelcastError::TargetDisconnected("gone".into()));
        assert_eq!(failed, 3);
        assert!(table.is_empty());

        for waiter in waiters {
            assert!(matches!(
                waiter.wait().await,
                Err(HazelcastError::TargetDisconnected(_))
            ));
        }
        assert!(matches!(
            table.register(10),
            Err(HazelcastError::TargetDisconnected(_))
        ));
    }

    #[tokio::test]
    async fn test_fail_single_invocation() {
        let table = Arc::new(InvocationTable::new());
        let pending = table.register(5).unwrap();
        assert!(table.fail(5, HazelcastError::Timeout("late".into())));
        assert!(pending.wait().await.unwrap_err().is_timeout());
    }
}

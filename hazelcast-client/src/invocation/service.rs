//! Request/response invocations: correlation, targeting, retry and deadlines.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use hazelcast_core::{ClientMessage, HazelcastError, Result};

use super::events::{EventHandler, EventHandlerRegistry};
use super::pending::PendingResponse;
use super::retry::Backoff;
use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionManager};

/// Source of correlation ids, unique per client.
///
/// Ids start at 1 and wrap from `i64::MAX` back to 1.
#[derive(Debug)]
pub struct CorrelationIdSequence {
    next: AtomicI64,
}

impl CorrelationIdSequence {
    /// Creates a sequence starting at 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates a sequence whose first id is `first` (at least 1).
    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first.max(1)),
        }
    }

    /// Returns the next id.
    pub fn next_id(&self) -> i64 {
        let mut current = self.next.load(Ordering::Relaxed);
        loop {
            let following = if current == i64::MAX { 1 } else { current + 1 };
            match self.next.compare_exchange_weak(
                current,
                following,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return current,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for CorrelationIdSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Where an invocation is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationTarget {
    /// Any connected member, picked by the load balancer.
    Any,
    /// The owner of a partition.
    Partition(i32),
    /// A specific member.
    Member(Uuid),
}

impl std::fmt::Display for InvocationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => write!(f, "any member"),
            Self::Partition(id) => write!(f, "partition {}", id),
            Self::Member(uuid) => write!(f, "member {}", uuid),
        }
    }
}

/// The messaging surface the rest of the client builds on.
#[async_trait]
pub trait ClusterMessaging: Send + Sync {
    /// Sends `message` to `target` and waits for its response, retrying
    /// transient failures until the invocation deadline.
    async fn invoke(&self, message: ClientMessage, target: InvocationTarget)
        -> Result<ClientMessage>;

    /// Sends `message` on `connection` only and waits for its response.
    async fn send_to_connection(
        &self,
        message: ClientMessage,
        connection: &Arc<Connection>,
    ) -> Result<ClientMessage>;
}

impl std::fmt::Debug for dyn ClusterMessaging {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ClusterMessaging")
    }
}

/// How far an attempt got before it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptStage {
    /// No connection for the target could be picked.
    Resolve,
    /// The request never reached the wire.
    Send,
    /// The request was written and may have executed.
    Await,
}

/// Failure of one attempt.
struct AttemptError {
    error: HazelcastError,
    stage: AttemptStage,
}

impl AttemptError {
    fn unresolved(error: HazelcastError) -> Self {
        Self {
            error,
            stage: AttemptStage::Resolve,
        }
    }

    fn unsent(error: HazelcastError) -> Self {
        Self {
            error,
            stage: AttemptStage::Send,
        }
    }

    fn written(error: HazelcastError) -> Self {
        Self {
            error,
            stage: AttemptStage::Await,
        }
    }
}

/// Sends requests to cluster members and correlates their responses.
#[derive(Debug)]
pub struct InvocationService {
    config: Arc<ClientConfig>,
    connections: Arc<ConnectionManager>,
    events: Arc<EventHandlerRegistry>,
    correlation_ids: CorrelationIdSequence,
}

impl InvocationService {
    /// Creates a service sending over the connections of `connections`.
    pub fn new(
        config: Arc<ClientConfig>,
        connections: Arc<ConnectionManager>,
        events: Arc<EventHandlerRegistry>,
    ) -> Self {
        Self::with_correlation_ids(config, connections, events, CorrelationIdSequence::new())
    }

    /// Creates a service drawing correlation ids from `correlation_ids`.
    pub fn with_correlation_ids(
        config: Arc<ClientConfig>,
        connections: Arc<ConnectionManager>,
        events: Arc<EventHandlerRegistry>,
        correlation_ids: CorrelationIdSequence,
    ) -> Self {
        Self {
            config,
            connections,
            events,
            correlation_ids,
        }
    }

    /// Returns the connection manager.
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    fn invocation_timeout(&self) -> Duration {
        self.config.invocation().invocation_timeout()
    }

    /// Sends `message` to `target` and waits for its response.
    ///
    /// Retryable messages (or all messages with `redo_operation`) are re-sent
    /// with backoff on transient failures until the invocation timeout. On
    /// expiry the caller receives `HazelcastError::Timeout`. Other messages
    /// surface the first failure, unless the request never reached the wire
    /// after a connection was picked. A member target that is not part of the
    /// cluster fails at once with `TargetUnknown`.
    #[instrument(
        name = "invocation_service.invoke",
        skip(self, message),
        fields(operation = message.operation_name().unwrap_or("unknown"), target = %target)
    )]
    pub async fn invoke(
        &self,
        mut message: ClientMessage,
        target: InvocationTarget,
    ) -> Result<ClientMessage> {
        self.ensure_running()?;
        if let InvocationTarget::Partition(partition_id) = target {
            message.set_partition_id(partition_id);
        }

        let timeout = self.invocation_timeout();
        let deadline = Instant::now() + timeout;
        let operation = message.operation_name().unwrap_or("invocation");

        match tokio::time::timeout_at(deadline, self.invoke_with_retry(&message, target, deadline))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(HazelcastError::Timeout(format!(
                "{} to {} did not complete within {:?}",
                operation, target, timeout
            ))),
        }
    }

    /// Sends `message` on `connection` only, without retrying elsewhere.
    #[instrument(
        name = "invocation_service.send_to_connection",
        skip(self, message, connection),
        fields(operation = message.operation_name().unwrap_or("unknown"), id = %connection.id())
    )]
    pub async fn send_to_connection(
        &self,
        message: ClientMessage,
        connection: &Arc<Connection>,
    ) -> Result<ClientMessage> {
        self.ensure_running()?;
        let timeout = self.invocation_timeout();
        let operation = message.operation_name().unwrap_or("invocation");

        match tokio::time::timeout(timeout, self.send_on(message, connection)).await {
            Ok(result) => result.map_err(|attempt| attempt.error),
            Err(_) => Err(HazelcastError::Timeout(format!(
                "{} on {} did not complete within {:?}",
                operation,
                connection.id(),
                timeout
            ))),
        }
    }

    /// Sends a listener registration on `connection`, routing every event
    /// correlated with it to `handler`.
    ///
    /// Returns the response and the correlation id the handler is registered
    /// under. The handler is removed again if the registration fails.
    pub async fn register_listener(
        &self,
        mut message: ClientMessage,
        connection: &Arc<Connection>,
        handler: EventHandler,
    ) -> Result<(ClientMessage, i64)> {
        self.ensure_running()?;
        let (correlation_id, pending) = self
            .register_on(connection)
            .map_err(|attempt| attempt.error)?;
        message.set_correlation_id(correlation_id);
        self.events.add(correlation_id, handler);

        let timeout = self.invocation_timeout();
        let outcome = tokio::time::timeout(timeout, async {
            connection.send(message).await?;
            pending.wait().await
        })
        .await
        .unwrap_or_else(|_| {
            Err(HazelcastError::Timeout(format!(
                "listener registration on {} did not complete within {:?}",
                connection.id(),
                timeout
            )))
        });

        match outcome {
            Ok(response) => Ok((response, correlation_id)),
            Err(e) => {
                self.events.remove(correlation_id);
                Err(e)
            }
        }
    }

    /// Routes events correlated with `correlation_id` to `handler`.
    pub fn add_event_handler(&self, correlation_id: i64, handler: EventHandler) {
        self.events.add(correlation_id, handler);
    }

    /// Stops routing events correlated with `correlation_id`.
    pub fn remove_event_handler(&self, correlation_id: i64) -> bool {
        self.events.remove(correlation_id)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.connections.is_shut_down() {
            return Err(HazelcastError::Disposed("invocation service"));
        }
        Ok(())
    }

    async fn invoke_with_retry(
        &self,
        message: &ClientMessage,
        target: InvocationTarget,
        deadline: Instant,
    ) -> Result<ClientMessage> {
        let retryable = message.is_retryable() || self.config.invocation().redo_operation();
        let mut backoff = Backoff::new(self.config.retry());

        loop {
            let attempt = match self.resolve_target(target).await {
                Ok(connection) => self.send_on(message.clone(), &connection).await,
                Err(e) => Err(AttemptError::unresolved(e)),
            };

            let failure = match attempt {
                Ok(response) => return Ok(response),
                Err(failure) => failure,
            };
            let unknown_member = matches!(target, InvocationTarget::Member(_))
                && matches!(failure.error, HazelcastError::TargetUnknown(_));
            if unknown_member || !self.should_retry(&failure, retryable) {
                return Err(failure.error);
            }

            let delay = backoff.next_delay();
            if Instant::now() + delay >= deadline {
                return Err(HazelcastError::Timeout(format!(
                    "invocation to {} ran out of time after {} attempts, last failure: {}",
                    target,
                    backoff.attempts(),
                    failure.error
                )));
            }
            debug!(
                attempt = backoff.attempts(),
                delay = ?delay,
                error = %failure.error,
                "retrying invocation"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn should_retry(&self, failure: &AttemptError, retryable: bool) -> bool {
        if self.connections.is_shut_down() || !failure.error.is_retryable() {
            return false;
        }
        // a request that never reached the wire cannot have executed
        retryable || failure.stage == AttemptStage::Send
    }

    async fn resolve_target(&self, target: InvocationTarget) -> Result<Arc<Connection>> {
        match target {
            InvocationTarget::Any => self.any_connection().await,
            InvocationTarget::Member(member_id) => {
                if let Some(connection) = self.connections.connection_for_member(&member_id).await {
                    return Ok(connection);
                }
                if self.connections.get_member(&member_id).await.is_none() {
                    return Err(HazelcastError::TargetUnknown(format!(
                        "member {} is not part of the cluster",
                        member_id
                    )));
                }
                Err(HazelcastError::TargetDisconnected(format!(
                    "no active connection to member {}",
                    member_id
                )))
            }
            InvocationTarget::Partition(partition_id) => {
                let smart_routing = self.config.network().smart_routing();
                let owner = self.connections.partition_owner(partition_id).await;

                let owner_connection = match owner {
                    Some(owner) => self.connections.connection_for_member(&owner).await,
                    None => None,
                };
                if let Some(connection) = owner_connection {
                    return Ok(connection);
                }
                if !smart_routing {
                    return self.any_connection().await;
                }
                Err(match owner {
                    Some(owner) => HazelcastError::TargetDisconnected(format!(
                        "owner {} of partition {} is not connected",
                        owner, partition_id
                    )),
                    None => HazelcastError::TargetUnknown(format!(
                        "no owner known for partition {}",
                        partition_id
                    )),
                })
            }
        }
    }

    async fn any_connection(&self) -> Result<Arc<Connection>> {
        self.connections.random_connection().await.ok_or_else(|| {
            HazelcastError::TargetDisconnected("no active connection to the cluster".to_string())
        })
    }

    /// Picks a correlation id that is not pending on `connection` and
    /// registers it.
    fn register_on(
        &self,
        connection: &Arc<Connection>,
    ) -> std::result::Result<(i64, PendingResponse), AttemptError> {
        let table = connection.invocations();
        loop {
            let correlation_id = self.correlation_ids.next_id();
            if table.contains(correlation_id) {
                trace!(correlation_id, "skipping correlation id still in use");
                continue;
            }
            match table.register(correlation_id) {
                Ok(pending) => return Ok((correlation_id, pending)),
                Err(HazelcastError::InvalidOperation(_)) => continue,
                Err(e) => return Err(AttemptError::unsent(e)),
            }
        }
    }

    async fn send_on(
        &self,
        mut message: ClientMessage,
        connection: &Arc<Connection>,
    ) -> std::result::Result<ClientMessage, AttemptError> {
        let (correlation_id, pending) = self.register_on(connection)?;
        message.set_correlation_id(correlation_id);

        connection
            .send(message)
            .await
            .map_err(AttemptError::unsent)?;

        let response = pending.wait().await.map_err(AttemptError::written)?;
        if let Some(acks) = response.backup_acks().filter(|acks| *acks > 0) {
            trace!(correlation_id, backup_acks = acks, "response expects backup acks");
        }
        Ok(response)
    }
}

#[async_trait]
impl ClusterMessaging for InvocationService {
    async fn invoke(
        &self,
        message: ClientMessage,
        target: InvocationTarget,
    ) -> Result<ClientMessage> {
        InvocationService::invoke(self, message, target).await
    }

    async fn send_to_connection(
        &self,
        message: ClientMessage,
        connection: &Arc<Connection>,
    ) -> Result<ClientMessage> {
        InvocationService::send_to_connection(self, message, connection).await
    }
}

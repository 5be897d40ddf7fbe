//! Active member connections and the member/partition view they serve.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, RwLock};
use tracing::{instrument, Span};
use uuid::Uuid;

use hazelcast_core::{HazelcastError, Result};

use super::connection::{Connection, ConnectionId};
use super::load_balancer::{load_balancer_for, LoadBalancer};
use crate::cluster::{Member, PartitionTable};
use crate::config::ClientConfig;
use crate::invocation::retry::Backoff;
use crate::invocation::EventHandlerRegistry;

/// Events emitted during connection lifecycle.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A connection to a member became active.
    Opened {
        /// The connection identifier.
        id: ConnectionId,
        /// The member at the other end.
        member: Member,
    },
    /// A connection to a member closed.
    Closed {
        /// The connection identifier.
        id: ConnectionId,
        /// The member at the other end.
        member: Member,
        /// The error that closed the connection, if any.
        error: Option<String>,
    },
}

/// Outcome of adding a connection to the manager.
#[derive(Debug, Clone)]
pub struct ConnectionOpened {
    /// The connection, possibly one that was already open to the member.
    pub connection: Arc<Connection>,
    /// True if the client had no other active connection.
    pub is_first: bool,
    /// True if this first connection reaches a cluster the client was not
    /// connected to before.
    pub is_new_cluster: bool,
}

#[derive(Debug, Default)]
struct ClusterIdentity {
    current: Option<Uuid>,
    last_connected: Option<Uuid>,
    ever_connected: bool,
}

/// Manages connections to Hazelcast cluster members.
///
/// Members and partition ownership are fed in through
/// [`ConnectionManager::set_members`] and
/// [`ConnectionManager::set_partition_table`].
#[derive(Debug)]
pub struct ConnectionManager {
    config: Arc<ClientConfig>,
    events: Arc<EventHandlerRegistry>,
    load_balancer: Arc<dyn LoadBalancer>,
    connections: Arc<RwLock<HashMap<Uuid, Arc<Connection>>>>,
    members: RwLock<HashMap<Uuid, Member>>,
    partition_table: RwLock<PartitionTable>,
    cluster: Mutex<ClusterIdentity>,
    event_sender: broadcast::Sender<ConnectionEvent>,
    shut_down: AtomicBool,
}

impl ConnectionManager {
    /// Creates a connection manager that routes events of all its
    /// connections to `events`.
    pub fn new(config: Arc<ClientConfig>, events: Arc<EventHandlerRegistry>) -> Self {
        let (event_sender, _) = broadcast::channel(64);
        let load_balancer = load_balancer_for(config.load_balancer());

        Self {
            config,
            events,
            load_balancer,
            connections: Arc::new(RwLock::new(HashMap::new())),
            members: RwLock::new(HashMap::new()),
            partition_table: RwLock::new(PartitionTable::new()),
            cluster: Mutex::new(ClusterIdentity::default()),
            event_sender,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &Arc<ClientConfig> {
        &self.config
    }

    /// Subscribes to connection lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_sender.subscribe()
    }

    /// Returns the current list of known cluster members.
    pub async fn members(&self) -> Vec<Member> {
        self.members.read().await.values().cloned().collect()
    }

    /// Returns a specific member by UUID, if known.
    pub async fn get_member(&self, uuid: &Uuid) -> Option<Member> {
        self.members.read().await.get(uuid).cloned()
    }

    /// Replaces the member list.
    pub async fn set_members(&self, members: Vec<Member>) {
        let mut member_map = self.members.write().await;
        member_map.clear();
        for member in members {
            member_map.insert(member.uuid(), member);
        }
        tracing::info!(count = member_map.len(), "updated cluster member list");
    }

    /// Applies `table` if it is newer than the current partition table.
    pub async fn set_partition_table(&self, table: PartitionTable) -> bool {
        let version = table.version();
        let applied = self.partition_table.write().await.apply(table);
        if applied {
            tracing::debug!(version, "applied partition table");
        }
        applied
    }

    /// Returns the owner of `partition_id`, if known.
    pub async fn partition_owner(&self, partition_id: i32) -> Option<Uuid> {
        self.partition_table.read().await.owner(partition_id)
    }

    /// Returns the number of partitions, or 0 before the first table.
    pub async fn partition_count(&self) -> i32 {
        self.partition_table.read().await.partition_count()
    }

    /// Records the id of the cluster the client authenticates against.
    pub fn set_cluster_id(&self, cluster_id: Uuid) {
        self.cluster.lock().current = Some(cluster_id);
    }

    /// Returns true once [`ConnectionManager::shutdown`] ran.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Returns the active connection to `member_id`, if any.
    pub async fn connection_for_member(&self, member_id: &Uuid) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .await
            .get(member_id)
            .filter(|connection| connection.is_active())
            .cloned()
    }

    /// Returns every active connection.
    pub async fn active_connections(&self) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .await
            .values()
            .filter(|connection| connection.is_active())
            .cloned()
            .collect()
    }

    /// Returns true if at least one connection is active.
    pub async fn is_connected(&self) -> bool {
        self.connections
            .read()
            .await
            .values()
            .any(|connection| connection.is_active())
    }

    /// Picks an active connection with the configured load balancer.
    pub async fn random_connection(&self) -> Option<Arc<Connection>> {
        let mut connections = self.active_connections().await;
        connections.sort_by_key(|connection| connection.member_id());
        let index = self.load_balancer.next_index(connections.len())?;
        Some(connections.swap_remove(index))
    }

    /// Connects to `member`, or returns the active connection to it.
    #[instrument(
        name = "connection_manager.connect",
        skip(self, member),
        fields(member = %member.uuid(), address = %member.address())
    )]
    pub async fn connect_to_member(&self, member: Member) -> Result<ConnectionOpened> {
        if let Some(connection) = self.connection_for_member(&member.uuid()).await {
            return Ok(ConnectionOpened {
                connection,
                is_first: false,
                is_new_cluster: false,
            });
        }
        self.ensure_running()?;

        let connection = Connection::connect(member, &self.config, Arc::clone(&self.events)).await?;
        self.add_connection(connection).await
    }

    /// Opens a connection to `member` over an already established stream.
    pub async fn open_stream<S>(&self, stream: S, member: Member) -> Result<ConnectionOpened>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.ensure_running()?;
        let connection = Connection::open(stream, member, &self.config, Arc::clone(&self.events))?;
        self.add_connection(connection).await
    }

    /// Connects to every known member, retrying with backoff until at least
    /// one connection is active or the retry budget is spent.
    ///
    /// Members not yet fed in are seeded from the configured addresses.
    #[instrument(
        name = "connection_manager.connect_to_cluster",
        skip(self),
        fields(cluster = %self.config.cluster_name(), attempts = tracing::field::Empty)
    )]
    pub async fn connect_to_cluster(&self) -> Result<Vec<ConnectionOpened>> {
        self.seed_members_from_config().await;

        let retry_config = self.config.retry();
        let mut backoff = Backoff::new(retry_config);

        loop {
            self.ensure_running()?;
            let mut opened = Vec::new();
            for member in self.members().await {
                match self.connect_to_member(member.clone()).await {
                    Ok(outcome) => opened.push(outcome),
                    Err(e) => {
                        tracing::warn!(member = %member, error = %e, "failed to connect to member");
                    }
                }
            }

            if self.is_connected().await {
                Span::current().record("attempts", backoff.attempts() + 1);
                return Ok(opened);
            }

            if backoff.attempts() >= retry_config.max_retries() {
                tracing::error!(attempts = backoff.attempts() + 1, "failed to connect to cluster");
                return Err(HazelcastError::Connection(format!(
                    "failed to connect to any member after {} attempts",
                    backoff.attempts() + 1
                )));
            }

            let delay = backoff.next_delay();
            tracing::debug!(attempt = backoff.attempts(), delay = ?delay, "retrying cluster connection");
            tokio::time::sleep(delay).await;
        }
    }

    async fn seed_members_from_config(&self) {
        let mut members = self.members.write().await;
        if !members.is_empty() {
            return;
        }
        for address in self.config.network().addresses() {
            let member = Member::new(Uuid::new_v4(), *address);
            members.insert(member.uuid(), member);
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(HazelcastError::Disposed("connection manager"));
        }
        Ok(())
    }

    /// Adds an open connection and watches it for closure.
    pub async fn add_connection(&self, connection: Arc<Connection>) -> Result<ConnectionOpened> {
        let member = connection.member().clone();
        let member_id = member.uuid();

        let (is_first, replaced) = {
            let mut connections = self.connections.write().await;
            if self.is_shut_down() {
                drop(connections);
                connection.close().await;
                return Err(HazelcastError::Disposed("connection manager"));
            }
            let is_first = !connections.values().any(|c| c.is_active());
            let replaced = connections.insert(member_id, Arc::clone(&connection));
            (is_first, replaced)
        };

        if let Some(previous) = replaced.filter(|previous| previous.id() != connection.id()) {
            tracing::debug!(id = %previous.id(), "replacing connection to member");
            previous.close().await;
        }

        let is_new_cluster = is_first && self.mark_connected();
        let _ = self.event_sender.send(ConnectionEvent::Opened {
            id: connection.id(),
            member: member.clone(),
        });
        tracing::info!(
            id = %connection.id(),
            member = %member,
            is_first,
            is_new_cluster,
            "connected to cluster member"
        );

        let connections = Arc::clone(&self.connections);
        let event_sender = self.event_sender.clone();
        let watched = Arc::downgrade(&connection);
        connection
            .add_close_listener(move |id| -> BoxFuture<'static, ()> {
                Box::pin(async move {
                    {
                        let mut connections = connections.write().await;
                        if connections.get(&member_id).is_some_and(|c| c.id() == id) {
                            connections.remove(&member_id);
                        }
                    }
                    let error = watched
                        .upgrade()
                        .and_then(|connection| connection.close_cause())
                        .map(|e| e.to_string());
                    tracing::info!(id = %id, member = %member, error = ?error, "connection to member closed");
                    let _ = event_sender.send(ConnectionEvent::Closed { id, member, error });
                })
            })
            .await;

        Ok(ConnectionOpened {
            connection,
            is_first,
            is_new_cluster,
        })
    }

    /// Returns true if the cluster reached now differs from the last one.
    ///
    /// With no cluster id fed in, every reconnection counts as a new cluster.
    fn mark_connected(&self) -> bool {
        let mut cluster = self.cluster.lock();
        let is_new = !cluster.ever_connected
            || cluster.current.is_none()
            || cluster.current != cluster.last_connected;
        cluster.last_connected = cluster.current;
        cluster.ever_connected = true;
        is_new
    }

    /// Closes the connection to `member_id`, if any.
    #[instrument(name = "connection_manager.disconnect", skip(self), fields(member = %member_id))]
    pub async fn disconnect(&self, member_id: &Uuid) {
        let connection = self.connections.read().await.get(member_id).cloned();
        match connection {
            Some(connection) => connection.close().await,
            None => tracing::debug!("no active connection to disconnect"),
        }
    }

    /// Closes every connection and rejects new ones.
    #[instrument(name = "connection_manager.shutdown", skip(self))]
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let connections: Vec<_> = self.connections.read().await.values().cloned().collect();
        for connection in connections {
            connection
                .close_with(HazelcastError::TargetDisconnected(
                    "client is shutting down".to_string(),
                ))
                .await;
        }
        tracing::info!("connection manager shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::duplex;

    fn manager() -> ConnectionManager {
        ConnectionManager::new(
            Arc::new(ClientConfig::default()),
            Arc::new(EventHandlerRegistry::new()),
        )
    }

    fn member(port: u16) -> Member {
        Member::new(Uuid::new_v4(), SocketAddr::from(([127, 0, 0, 1], port)))
    }

    #[test]
    fn test_connection_manager_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ConnectionManager>();
    }

    #[tokio::test]
    async fn test_first_connection_flags() {
        let manager = manager();
        let (first, _peer1) = duplex(1024);
        let (second, _peer2) = duplex(1024);

        let opened = manager.open_stream(first, member(5701)).await.unwrap();
        assert!(opened.is_first);
        assert!(opened.is_new_cluster);

        let opened = manager.open_stream(second, member(5702)).await.unwrap();
        assert!(!opened.is_first);
        assert!(!opened.is_new_cluster);
        assert_eq!(manager.active_connections().await.len(), 2);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_same_cluster_reconnect_is_not_new() {
        let manager = manager();
        manager.set_cluster_id(Uuid::new_v4());

        let (stream, peer) = duplex(1024);
        let opened = manager.open_stream(stream, member(5701)).await.unwrap();
        assert!(opened.is_new_cluster);
        drop(peer);
        opened.connection.closed().await;

        let (stream, _peer) = duplex(1024);
        let opened = manager.open_stream(stream, member(5701)).await.unwrap();
        assert!(opened.is_first);
        assert!(!opened.is_new_cluster);

        manager.set_cluster_id(Uuid::new_v4());
        opened.connection.close().await;
        let (stream, _peer) = duplex(1024);
        let opened = manager.open_stream(stream, member(5701)).await.unwrap();
        assert!(opened.is_new_cluster);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_closed_connection_is_removed_and_reported() {
        let manager = manager();
        let mut events = manager.subscribe();
        let target = member(5701);
        let (stream, peer) = duplex(1024);

        let opened = manager.open_stream(stream, target.clone()).await.unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            ConnectionEvent::Opened { .. }
        ));

        drop(peer);
        match tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap()
        {
            ConnectionEvent::Closed { id, member, .. } => {
                assert_eq!(id, opened.connection.id());
                assert_eq!(member, target);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(manager.connection_for_member(&target.uuid()).await.is_none());
        assert!(!manager.is_connected().await);
    }

    #[tokio::test]
    async fn test_random_connection_picks_active_connection() {
        let manager = manager();
        assert!(manager.random_connection().await.is_none());

        let (stream, _peer) = duplex(1024);
        let opened = manager.open_stream(stream, member(5701)).await.unwrap();
        let picked = manager.random_connection().await.unwrap();
        assert_eq!(picked.id(), opened.connection.id());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_partition_owner_lookup() {
        let manager = manager();
        let owner = Uuid::new_v4();
        assert_eq!(manager.partition_owner(0).await, None);

        assert!(
            manager
                .set_partition_table(PartitionTable::from_owners(1, &[(owner, vec![0, 1])]))
                .await
        );
        assert_eq!(manager.partition_owner(1).await, Some(owner));
        assert_eq!(manager.partition_count().await, 2);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_connections() {
        let manager = manager();
        let (stream, _peer) = duplex(1024);
        let opened = manager.open_stream(stream, member(5701)).await.unwrap();

        manager.shutdown().await;
        assert!(!opened.connection.is_active());

        let (stream, _peer) = duplex(1024);
        assert!(matches!(
            manager.open_stream(stream, member(5702)).await,
            Err(HazelcastError::Disposed(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_to_cluster_gives_up_after_retries() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let config = ClientConfig::builder()
            .add_address(address)
            .connection_timeout(Duration::from_millis(200))
            .retry(|r| {
                r.initial_backoff(Duration::from_millis(1))
                    .max_backoff(Duration::from_millis(2))
                    .max_retries(2)
            })
            .build()
            .unwrap();
        let manager = ConnectionManager::new(Arc::new(config), Arc::new(EventHandlerRegistry::new()));

        let err = manager.connect_to_cluster().await.unwrap_err();
        assert!(matches!(err, HazelcastError::Connection(_)));
        assert_eq!(manager.members().await.len(), 1);
    }
}

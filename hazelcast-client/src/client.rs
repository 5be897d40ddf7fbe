//! Hazelcast client entry point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

use hazelcast_core::{DistributedObjectInfo, HazelcastError, Result};

use crate::cluster::{Member, PartitionTable};
use crate::config::ClientConfig;
use crate::connection::{
    spawn_heartbeat, Connection, ConnectionEvent, ConnectionManager, ConnectionOpened,
};
use crate::invocation::retry::Backoff;
use crate::invocation::{ClusterMessaging, EventHandlerRegistry, InvocationService};
use crate::listener::{LifecycleEvent, LifecycleService};
use crate::proxy::{DistributedObject, DistributedObjectFactory};

/// The main entry point for connecting to a Hazelcast cluster.
///
/// `HazelcastClient` wires the connection manager, the invocation service and
/// the distributed object factory together. It reports its progress through
/// [`LifecycleEvent`]s and reconnects when it loses its last connection.
///
/// # Example
///
/// ```ignore
/// use hazelcast_client::{ClientConfig, HazelcastClient};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ClientConfig::builder()
///         .cluster_name("dev")
///         .build()?;
///
///     let client = HazelcastClient::new(config).await?;
///     let objects = client.distributed_objects().await?;
///     println!("{} objects on the cluster", objects.len());
///
///     client.shutdown().await;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct HazelcastClient {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    config: Arc<ClientConfig>,
    connections: Arc<ConnectionManager>,
    invocations: Arc<InvocationService>,
    objects: DistributedObjectFactory,
    lifecycle: LifecycleService,
    started: AtomicBool,
    connected: AtomicBool,
    shutting_down: AtomicBool,
    shutdown: CancellationToken,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl HazelcastClient {
    /// Creates a client, starts it and connects to the cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if no member could be reached within the retry budget
    /// or if replaying known objects on the first connection failed.
    pub async fn new(config: ClientConfig) -> Result<Self> {
        let client = Self::with_config(config);
        client.start()?;
        client.connect().await?;
        Ok(client)
    }

    /// Creates a client without connecting it.
    ///
    /// Call [`start`](Self::start) and then [`connect`](Self::connect) or
    /// [`open_stream`](Self::open_stream).
    pub fn with_config(config: ClientConfig) -> Self {
        let config = Arc::new(config);
        let events = Arc::new(EventHandlerRegistry::new());
        let connections = Arc::new(ConnectionManager::new(Arc::clone(&config), Arc::clone(&events)));
        let invocations = Arc::new(InvocationService::new(
            Arc::clone(&config),
            Arc::clone(&connections),
            events,
        ));
        let messaging: Arc<dyn ClusterMessaging> = invocations.clone();
        let objects = DistributedObjectFactory::new(messaging);

        let lifecycle = LifecycleService::default();
        lifecycle.fire(LifecycleEvent::Starting);

        Self {
            inner: Arc::new(ClientInner {
                config,
                connections,
                invocations,
                objects,
                lifecycle,
                started: AtomicBool::new(false),
                connected: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                heartbeat: Mutex::new(None),
            }),
        }
    }

    /// Starts the heartbeat and the connection monitor.
    ///
    /// Must be called within a Tokio runtime. Calling it again does nothing.
    pub fn start(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.shutting_down.load(Ordering::Acquire) {
            return Err(HazelcastError::Disposed("client"));
        }
        if inner.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let heartbeat = spawn_heartbeat(Arc::clone(&inner.invocations), inner.shutdown.child_token());
        *inner.heartbeat.lock() = Some(heartbeat);

        tokio::spawn(monitor_connections(
            Arc::downgrade(inner),
            inner.connections.subscribe(),
            inner.shutdown.child_token(),
        ));

        inner.lifecycle.fire(LifecycleEvent::Started);
        Ok(())
    }

    /// Connects to the configured or fed-in members.
    ///
    /// Returns once at least one connection is active and known objects have
    /// been replayed on it.
    #[instrument(name = "client.connect", skip(self), fields(cluster = %self.inner.config.cluster_name()))]
    pub async fn connect(&self) -> Result<()> {
        self.inner.ensure_running()?;
        let opened = self.inner.connections.connect_to_cluster().await?;
        self.inner.restore(opened).await
    }

    /// Opens a connection to `member` over an already established stream.
    ///
    /// The stream must be past any TLS or authentication exchange; the client
    /// protocol preamble is expected to have been written.
    pub async fn open_stream<S>(&self, stream: S, member: Member) -> Result<Arc<Connection>>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.inner.ensure_running()?;
        let outcome = self.inner.connections.open_stream(stream, member).await?;
        let connection = Arc::clone(&outcome.connection);
        self.inner.on_connection_opened(outcome).await?;
        Ok(connection)
    }

    /// Returns the cluster name this client connects to.
    pub fn cluster_name(&self) -> &str {
        self.inner.config.cluster_name()
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Returns the lifecycle service.
    pub fn lifecycle(&self) -> &LifecycleService {
        &self.inner.lifecycle
    }

    /// Returns the connection manager.
    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.inner.connections
    }

    /// Returns the invocation service.
    pub fn invocation_service(&self) -> &Arc<InvocationService> {
        &self.inner.invocations
    }

    /// Returns the distributed object factory.
    pub fn object_factory(&self) -> &DistributedObjectFactory {
        &self.inner.objects
    }

    /// Subscribes to connection lifecycle events.
    pub fn subscribe_connections(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.connections.subscribe()
    }

    /// Returns true until shutdown begins.
    pub fn is_running(&self) -> bool {
        !self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// Returns true while at least one connection is active.
    pub async fn is_connected(&self) -> bool {
        self.inner.connections.is_connected().await
    }

    /// Returns the number of active connections to cluster members.
    pub async fn connection_count(&self) -> usize {
        self.inner.connections.active_connections().await.len()
    }

    /// Returns the known cluster members.
    pub async fn members(&self) -> Vec<Member> {
        self.inner.connections.members().await
    }

    /// Replaces the known cluster members.
    pub async fn set_members(&self, members: Vec<Member>) {
        self.inner.connections.set_members(members).await;
    }

    /// Installs `table` if it is newer than the current partition table.
    pub async fn set_partition_table(&self, table: PartitionTable) -> bool {
        self.inner.connections.set_partition_table(table).await
    }

    /// Records the id of the cluster the client is connected to.
    pub fn set_cluster_id(&self, cluster_id: Uuid) {
        self.inner.connections.set_cluster_id(cluster_id);
    }

    /// Returns the proxy for `service_name`/`name`, creating it on the
    /// cluster first if this client does not know it yet.
    ///
    /// See [`DistributedObjectFactory::get_or_create`].
    pub async fn get_distributed_object<T, F>(
        &self,
        service_name: &str,
        name: &str,
        build: F,
    ) -> Result<Arc<T>>
    where
        T: DistributedObject,
        F: FnOnce(&DistributedObjectInfo) -> Result<T> + Send + 'static,
    {
        self.inner
            .objects
            .get_or_create(service_name, name, true, build)
            .await
    }

    /// Destroys `object` on the cluster and forgets its proxy.
    pub async fn destroy(&self, object: &dyn DistributedObject) -> Result<()> {
        self.inner.objects.destroy(object).await
    }

    /// Returns every distributed object the cluster knows about, dropping
    /// local proxies the cluster no longer has.
    pub async fn distributed_objects(&self) -> Result<Vec<DistributedObjectInfo>> {
        self.inner.objects.reconcile_all().await
    }

    /// Shuts down the client: disposes proxies and closes all connections.
    ///
    /// After shutdown, the client cannot be used for any operations. Calling
    /// it again does nothing.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}

impl Drop for HazelcastClient {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl ClientInner {
    fn ensure_running(&self) -> Result<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(HazelcastError::Disposed("client"));
        }
        Ok(())
    }

    async fn on_connection_opened(&self, outcome: ConnectionOpened) -> Result<()> {
        if !outcome.is_first {
            return Ok(());
        }
        self.objects
            .on_connection_opened(&outcome.connection, outcome.is_new_cluster)
            .await?;

        if outcome.connection.is_active() && !self.connected.swap(true, Ordering::AcqRel) {
            self.lifecycle.fire(LifecycleEvent::ClientConnected);
        }
        Ok(())
    }

    async fn on_connection_lost(&self, shutdown: &CancellationToken) {
        if self.shutting_down.load(Ordering::Acquire)
            || self.connections.is_connected().await
            || !self.connected.swap(false, Ordering::AcqRel)
        {
            return;
        }
        self.lifecycle.fire(LifecycleEvent::ClientDisconnected);

        if !self.config.network().reconnect() {
            tracing::warn!("lost the last connection and reconnect is disabled, shutting down");
            self.shutdown().await;
            return;
        }

        tracing::info!("lost the last connection, reconnecting");
        let mut backoff = Backoff::new(self.config.retry());
        loop {
            let opened = tokio::select! {
                _ = shutdown.cancelled() => return,
                opened = self.connections.connect_to_cluster() => opened,
            };
            let opened = match opened {
                Ok(opened) => opened,
                Err(e) => {
                    tracing::error!(error = %e, "unable to reconnect to the cluster, shutting down");
                    self.shutdown().await;
                    return;
                }
            };

            let Err(e) = self.restore(opened).await else {
                return;
            };
            if backoff.attempts() >= self.config.retry().max_retries() {
                tracing::error!(
                    error = %e,
                    attempts = backoff.attempts() + 1,
                    "unable to restore distributed objects after reconnect, shutting down"
                );
                self.shutdown().await;
                return;
            }

            // the replay stays pending and runs again on the next first connection
            let delay = backoff.next_delay();
            tracing::warn!(
                error = %e,
                attempt = backoff.attempts(),
                delay = ?delay,
                "failed to restore distributed objects, reconnecting"
            );
            for connection in self.connections.active_connections().await {
                connection.close().await;
            }
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn restore(&self, opened: Vec<ConnectionOpened>) -> Result<()> {
        for outcome in opened {
            self.on_connection_opened(outcome).await?;
        }
        Ok(())
    }

    #[instrument(name = "client.shutdown", skip(self), fields(cluster = %self.config.cluster_name()))]
    async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.lifecycle.fire(LifecycleEvent::ShuttingDown);
        self.shutdown.cancel();

        let heartbeat = self.heartbeat.lock().take();
        if let Some(heartbeat) = heartbeat {
            let _ = heartbeat.await;
        }

        self.objects.dispose().await;
        self.connections.shutdown().await;

        if self.connected.swap(false, Ordering::AcqRel) {
            self.lifecycle.fire(LifecycleEvent::ClientDisconnected);
        }
        self.lifecycle.fire(LifecycleEvent::Shutdown);
    }
}

async fn monitor_connections(
    client: Weak<ClientInner>,
    mut events: broadcast::Receiver<ConnectionEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(ConnectionEvent::Opened { .. }) => {}
            Ok(ConnectionEvent::Closed { .. }) | Err(RecvError::Lagged(_)) => {
                let Some(client) = client.upgrade() else {
                    break;
                };
                client.on_connection_lost(&shutdown).await;
            }
            Err(RecvError::Closed) => break,
        }
    }
    tracing::debug!("connection monitor stopped");
}

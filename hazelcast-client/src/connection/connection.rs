//! Single connection to a Hazelcast cluster member.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use bytes::BytesMut;
use futures::future::BoxFuture;
use hazelcast_core::protocol::client_codecs::error_from_response;
use hazelcast_core::protocol::CLIENT_PROTOCOL_PREAMBLE;
use hazelcast_core::{ClientMessage, ClientMessageCodec, HazelcastError, Result};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};
use uuid::Uuid;

use super::pipe::{PipeState, SocketPipe};
use crate::cluster::Member;
use crate::config::ClientConfig;
use crate::invocation::{EventHandlerRegistry, InvocationTable, PendingResponse};

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generates a new unique connection ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A connection to a single Hazelcast cluster member.
///
/// Owns one [`SocketPipe`] and the table of invocations waiting for
/// responses on it. When the pipe shuts down, every pending invocation
/// fails with `TargetDisconnected`.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    member: Member,
    pipe: Arc<SocketPipe>,
    encoder: Mutex<ClientMessageCodec>,
    invocations: Arc<InvocationTable>,
}

impl Connection {
    /// Establishes a TCP connection to `member` and sends the protocol
    /// preamble.
    pub async fn connect(
        member: Member,
        config: &ClientConfig,
        events: Arc<EventHandlerRegistry>,
    ) -> Result<Arc<Self>> {
        let address = member.address();
        let connect_timeout = config.network().connection_timeout();

        let mut stream = tokio::time::timeout(connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                HazelcastError::Timeout(format!(
                    "connecting to {} took longer than {:?}",
                    address, connect_timeout
                ))
            })?
            .map_err(|e| {
                HazelcastError::Connection(format!("failed to connect to {}: {}", address, e))
            })?;

        stream.set_nodelay(true).map_err(|e| {
            HazelcastError::Connection(format!("failed to set TCP_NODELAY: {}", e))
        })?;
        stream.write_all(CLIENT_PROTOCOL_PREAMBLE).await.map_err(|e| {
            HazelcastError::Connection(format!("failed to write preamble to {}: {}", address, e))
        })?;

        let local_address = stream.local_addr().ok();
        tracing::debug!(address = %address, member = %member.uuid(), "established connection");
        Self::start(stream, member, config, events, Some(address), local_address)
    }

    /// Opens a connection over an already established stream.
    ///
    /// The stream must be past any handshake; the first bytes read from it
    /// are expected to be frames.
    pub fn open<S>(
        stream: S,
        member: Member,
        config: &ClientConfig,
        events: Arc<EventHandlerRegistry>,
    ) -> Result<Arc<Self>>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let remote = Some(member.address());
        Self::start(stream, member, config, events, remote, None)
    }

    fn start<S>(
        stream: S,
        member: Member,
        config: &ClientConfig,
        events: Arc<EventHandlerRegistry>,
        remote_address: Option<SocketAddr>,
        local_address: Option<SocketAddr>,
    ) -> Result<Arc<Self>>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let id = ConnectionId::new();
        let max_frame_set_size = config.messaging().max_frame_set_size();
        let pipe = Arc::new(
            SocketPipe::new(
                id,
                config.network().staging_buffer_size(),
                config.messaging().outgoing_queue_capacity(),
            )
            .with_addresses(remote_address, local_address),
        );
        let invocations = Arc::new(InvocationTable::new());

        let table = Arc::clone(&invocations);
        let mut decoder = ClientMessageCodec::with_max_frame_set_size(max_frame_set_size);
        pipe.on_receive_message_bytes(move |buf: &mut BytesMut| match decoder.decode(buf)? {
            Some(message) => {
                route_incoming(&table, &events, message);
                Ok(true)
            }
            None => Ok(false),
        })?;

        let table = Arc::clone(&invocations);
        let weak_pipe: Weak<SocketPipe> = Arc::downgrade(&pipe);
        let address = member.address();
        pipe.on_shutdown(move |id| -> BoxFuture<'static, ()> {
            let cause = weak_pipe
                .upgrade()
                .and_then(|pipe| pipe.close_cause())
                .map(|cause| format!(": {}", cause))
                .unwrap_or_default();
            let failed = table.fail_all(HazelcastError::TargetDisconnected(format!(
                "{} to {} closed{}",
                id, address, cause
            )));
            if failed > 0 {
                debug!(id = %id, failed, "failed pending invocations of closed connection");
            }
            Box::pin(async {})
        })?;

        pipe.start(stream)?;

        Ok(Arc::new(Self {
            id,
            member,
            pipe,
            encoder: Mutex::new(ClientMessageCodec::with_max_frame_set_size(max_frame_set_size)),
            invocations,
        }))
    }

    /// Returns the connection's unique identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the member at the other end.
    pub fn member(&self) -> &Member {
        &self.member
    }

    /// Returns the UUID of the member at the other end.
    pub fn member_id(&self) -> Uuid {
        self.member.uuid()
    }

    /// Returns the remote address of this connection.
    pub fn address(&self) -> SocketAddr {
        self.member.address()
    }

    /// Returns the local address of this connection, if known.
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.pipe.local_address()
    }

    /// Returns the lifecycle state of the underlying pipe.
    pub fn state(&self) -> PipeState {
        self.pipe.state()
    }

    /// Returns true while messages can be sent and received.
    pub fn is_active(&self) -> bool {
        self.pipe.is_active()
    }

    /// Returns when this connection was created.
    pub fn created_at(&self) -> Instant {
        self.pipe.created_at()
    }

    /// Returns when data was last read from this connection.
    pub fn last_read_at(&self) -> Instant {
        self.pipe.last_read_at()
    }

    /// Returns when data was last written to this connection.
    pub fn last_write_at(&self) -> Instant {
        self.pipe.last_write_at()
    }

    /// Returns the invocations waiting on this connection.
    pub fn invocations(&self) -> &Arc<InvocationTable> {
        &self.invocations
    }

    /// Returns the error that closed this connection, if any.
    pub fn close_cause(&self) -> Option<HazelcastError> {
        self.pipe.close_cause()
    }

    /// Registers `message` as pending and writes it.
    ///
    /// The correlation id must already be set on the message.
    pub async fn invoke(&self, message: ClientMessage) -> Result<PendingResponse> {
        let correlation_id = message.correlation_id().ok_or_else(|| {
            HazelcastError::InvalidOperation("cannot invoke an empty message".to_string())
        })?;
        let pending = self.invocations.register(correlation_id)?;
        self.send(message).await?;
        Ok(pending)
    }

    /// Writes a message without waiting for a response.
    pub async fn send(&self, message: ClientMessage) -> Result<()> {
        let mut buf = BytesMut::with_capacity(message.wire_size());
        self.encoder.lock().encode(message, &mut buf)?;

        if !self.pipe.send(buf.freeze()).await {
            return Err(HazelcastError::TargetDisconnected(format!(
                "{} to {} is not active",
                self.id,
                self.address()
            )));
        }
        Ok(())
    }

    /// Registers a listener invoked once when the connection has closed.
    ///
    /// If it already closed, the listener runs before this call returns.
    pub async fn add_close_listener<F>(&self, listener: F)
    where
        F: FnOnce(ConnectionId) -> BoxFuture<'static, ()> + Send + 'static,
    {
        self.pipe.add_shutdown_listener(listener).await;
    }

    /// Closes this connection and waits until every close listener ran.
    pub async fn close(&self) {
        self.pipe.close().await;
        tracing::debug!(id = %self.id, address = %self.address(), "connection closed");
    }

    /// Closes this connection, recording `cause` as the reason pending
    /// invocations fail with.
    pub async fn close_with(&self, cause: HazelcastError) {
        tracing::debug!(id = %self.id, address = %self.address(), cause = %cause, "closing connection");
        self.pipe.close_with(cause).await;
    }

    /// Waits until the connection is closed.
    pub async fn closed(&self) {
        self.pipe.closed().await;
    }
}

fn route_incoming(table: &InvocationTable, events: &EventHandlerRegistry, message: ClientMessage) {
    if message.is_event() {
        let backup_event = message
            .initial_frame()
            .is_some_and(|frame| frame.is_backup_event_frame());
        if backup_event {
            trace!(correlation_id = ?message.correlation_id(), "ignoring backup event");
            return;
        }
        events.dispatch(message);
        return;
    }

    if message.is_error() {
        if let Some(correlation_id) = message.correlation_id() {
            table.fail(correlation_id, error_from_response(&message));
        }
        return;
    }

    table.complete(message);
}

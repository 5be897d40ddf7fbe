//! Duplex byte pipe over one stream: a read loop feeding a message-bytes
//! handler, a write loop draining an outgoing queue, and a one-shot
//! coordinated shutdown.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::{BufMut, Bytes, BytesMut};
use futures::future::BoxFuture;
use hazelcast_core::{HazelcastError, Result};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::ConnectionId;

/// Largest single read into the staging buffer.
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Consumes complete units from the front of the staging buffer.
///
/// Returns `Ok(true)` while it extracted a unit, `Ok(false)` when more bytes
/// are needed. An error shuts the pipe down.
pub type MessageBytesHandler = Box<dyn FnMut(&mut BytesMut) -> Result<bool> + Send>;

/// Receives the fixed-length prefix read before any message bytes.
pub type PrefixBytesHandler = Box<dyn FnOnce(Bytes) -> BoxFuture<'static, Result<()>> + Send>;

/// Runs once when the pipe has shut down.
pub type ShutdownListener = Box<dyn FnOnce(ConnectionId) -> BoxFuture<'static, ()> + Send>;

/// Lifecycle state of a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipeState {
    /// Handlers may be registered; nothing is read or written yet.
    Opening = 0,
    /// Both loops are running.
    Active = 1,
    /// Shutdown was triggered; loops are winding down.
    ShuttingDown = 2,
    /// The stream is closed and shutdown listeners have run.
    Closed = 3,
}

impl PipeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Opening,
            1 => Self::Active,
            2 => Self::ShuttingDown,
            _ => Self::Closed,
        }
    }
}

#[derive(Default)]
struct Handlers {
    message: Option<MessageBytesHandler>,
    prefix_length: usize,
    prefix: Option<PrefixBytesHandler>,
}

#[derive(Default)]
struct ShutdownGate {
    listeners: Vec<ShutdownListener>,
    ran: bool,
}

/// Bridges a duplex stream and the handlers that interpret its bytes.
pub struct SocketPipe {
    id: ConnectionId,
    state: AtomicU8,
    handlers: Mutex<Handlers>,
    gate: Mutex<ShutdownGate>,
    outgoing: Mutex<Option<mpsc::Sender<Bytes>>>,
    cancel: CancellationToken,
    closed: watch::Sender<bool>,
    close_cause: Mutex<Option<HazelcastError>>,
    staging_buffer_size: usize,
    outgoing_queue_capacity: usize,
    created_at: Instant,
    last_read_at: Mutex<Instant>,
    last_write_at: Mutex<Instant>,
    remote_address: Option<SocketAddr>,
    local_address: Option<SocketAddr>,
}

impl std::fmt::Debug for SocketPipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketPipe")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("remote_address", &self.remote_address)
            .finish_non_exhaustive()
    }
}

impl SocketPipe {
    /// Creates a pipe in the `Opening` state.
    pub fn new(id: ConnectionId, staging_buffer_size: usize, outgoing_queue_capacity: usize) -> Self {
        let now = Instant::now();
        let (closed, _) = watch::channel(false);
        Self {
            id,
            state: AtomicU8::new(PipeState::Opening as u8),
            handlers: Mutex::new(Handlers::default()),
            gate: Mutex::new(ShutdownGate::default()),
            outgoing: Mutex::new(None),
            cancel: CancellationToken::new(),
            closed,
            close_cause: Mutex::new(None),
            staging_buffer_size,
            outgoing_queue_capacity: outgoing_queue_capacity.max(1),
            created_at: now,
            last_read_at: Mutex::new(now),
            last_write_at: Mutex::new(now),
            remote_address: None,
            local_address: None,
        }
    }

    /// Records the stream endpoints, for diagnostics.
    pub fn with_addresses(
        mut self,
        remote_address: Option<SocketAddr>,
        local_address: Option<SocketAddr>,
    ) -> Self {
        self.remote_address = remote_address;
        self.local_address = local_address;
        self
    }

    /// Returns the identifier of the connection owning this pipe.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the current state.
    pub fn state(&self) -> PipeState {
        PipeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns true while both loops are running and sends are accepted.
    pub fn is_active(&self) -> bool {
        self.state() == PipeState::Active
    }

    /// Returns the remote endpoint, if known.
    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.remote_address
    }

    /// Returns the local endpoint, if known.
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.local_address
    }

    /// Returns when the pipe was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Returns when bytes were last read.
    pub fn last_read_at(&self) -> Instant {
        *self.last_read_at.lock()
    }

    /// Returns when bytes were last written.
    pub fn last_write_at(&self) -> Instant {
        *self.last_write_at.lock()
    }

    /// Returns the error that brought the pipe down, if any.
    pub fn close_cause(&self) -> Option<HazelcastError> {
        self.close_cause.lock().clone()
    }

    fn ensure_opening(&self, what: &str) -> Result<()> {
        if self.state() != PipeState::Opening {
            return Err(HazelcastError::InvalidOperation(format!(
                "cannot {} on {} once it has started",
                what, self.id
            )));
        }
        Ok(())
    }

    /// Sets the handler that consumes received bytes.
    pub fn on_receive_message_bytes<F>(&self, handler: F) -> Result<()>
    where
        F: FnMut(&mut BytesMut) -> Result<bool> + Send + 'static,
    {
        let mut handlers = self.handlers.lock();
        self.ensure_opening("set the message handler")?;
        handlers.message = Some(Box::new(handler));
        Ok(())
    }

    /// Declares that `length` bytes precede the message stream.
    pub fn expect_prefix(&self, length: usize) -> Result<()> {
        let mut handlers = self.handlers.lock();
        self.ensure_opening("expect a prefix")?;
        handlers.prefix_length = length;
        Ok(())
    }

    /// Sets the handler that receives the prefix declared by
    /// [`SocketPipe::expect_prefix`].
    pub fn on_receive_prefix_bytes<F>(&self, handler: F) -> Result<()>
    where
        F: FnOnce(Bytes) -> BoxFuture<'static, Result<()>> + Send + 'static,
    {
        let mut handlers = self.handlers.lock();
        self.ensure_opening("set the prefix handler")?;
        handlers.prefix = Some(Box::new(handler));
        Ok(())
    }

    /// Registers a shutdown listener before the pipe starts.
    pub fn on_shutdown<F>(&self, listener: F) -> Result<()>
    where
        F: FnOnce(ConnectionId) -> BoxFuture<'static, ()> + Send + 'static,
    {
        let _handlers = self.handlers.lock();
        self.ensure_opening("set a shutdown handler")?;
        self.gate.lock().listeners.push(Box::new(listener));
        Ok(())
    }

    /// Registers a shutdown listener at any time.
    ///
    /// If shutdown already ran, the listener runs now and this call returns
    /// once it completed.
    pub async fn add_shutdown_listener<F>(&self, listener: F)
    where
        F: FnOnce(ConnectionId) -> BoxFuture<'static, ()> + Send + 'static,
    {
        {
            let mut gate = self.gate.lock();
            if !gate.ran {
                gate.listeners.push(Box::new(listener));
                return;
            }
        }
        listener(self.id).await;
    }

    /// Starts the read and write loops over `stream`.
    ///
    /// Fails with `InvalidOperation` if the pipe was already started or shut
    /// down, if no message handler is set, or if a prefix is expected but no
    /// prefix handler is set.
    pub fn start<S>(self: &Arc<Self>, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (message_handler, prefix, receiver) = {
            let mut handlers = self.handlers.lock();
            self.ensure_opening("start the pipe")?;

            if handlers.prefix_length > 0 && handlers.prefix.is_none() {
                return Err(HazelcastError::InvalidOperation(format!(
                    "{} expects a prefix but has no prefix handler",
                    self.id
                )));
            }
            let Some(message_handler) = handlers.message.take() else {
                return Err(HazelcastError::InvalidOperation(format!(
                    "{} has no message bytes handler",
                    self.id
                )));
            };

            self.state
                .compare_exchange(
                    PipeState::Opening as u8,
                    PipeState::Active as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .map_err(|_| {
                    HazelcastError::InvalidOperation(format!("{} was shut down", self.id))
                })?;

            let (sender, receiver) = mpsc::channel(self.outgoing_queue_capacity);
            *self.outgoing.lock() = Some(sender);

            let prefix = match handlers.prefix.take() {
                Some(handler) if handlers.prefix_length > 0 => {
                    Some((handlers.prefix_length, handler))
                }
                _ => None,
            };
            (message_handler, prefix, receiver)
        };

        debug!(id = %self.id, remote = ?self.remote_address, "pipe started");
        tokio::spawn(Arc::clone(self).run(stream, message_handler, prefix, receiver));
        Ok(())
    }

    /// Queues bytes for writing.
    ///
    /// Returns `false` if the pipe is not active or went down before the
    /// bytes could be queued.
    pub async fn send(&self, bytes: Bytes) -> bool {
        if !self.is_active() {
            return false;
        }
        let Some(sender) = self.outgoing.lock().clone() else {
            return false;
        };
        tokio::select! {
            result = sender.send(bytes) => result.is_ok(),
            _ = self.cancel.cancelled() => false,
        }
    }

    /// Triggers shutdown without waiting for it.
    pub fn shutdown(self: &Arc<Self>) {
        let previous = self.state.compare_exchange(
            PipeState::Opening as u8,
            PipeState::ShuttingDown as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if previous.is_ok() {
            // never started: no loops to stop
            tokio::spawn(Arc::clone(self).finish_shutdown());
            return;
        }
        self.begin_shutdown();
    }

    /// Shuts down and waits until the stream is closed and every shutdown
    /// listener has run.
    pub async fn close(self: &Arc<Self>) {
        self.shutdown();
        self.closed().await;
    }

    /// Shuts down with `cause` recorded as the reason, and waits like
    /// [`SocketPipe::close`].
    pub async fn close_with(self: &Arc<Self>, cause: HazelcastError) {
        self.record_cause(cause);
        self.close().await;
    }

    /// Discards shutdown listeners without running them, then shuts down.
    pub async fn clear_on_shutdown(self: &Arc<Self>) {
        self.gate.lock().listeners.clear();
        self.close().await;
    }

    /// Waits until the pipe is closed.
    pub async fn closed(&self) {
        let mut receiver = self.closed.subscribe();
        // the sender lives as long as self
        let _ = receiver.wait_for(|closed| *closed).await;
    }

    fn begin_shutdown(&self) {
        let _ = self.state.compare_exchange(
            PipeState::Active as u8,
            PipeState::ShuttingDown as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.cancel.cancel();
    }

    fn record_cause(&self, cause: HazelcastError) {
        let mut slot = self.close_cause.lock();
        if slot.is_none() {
            *slot = Some(cause);
        }
    }

    async fn run<S>(
        self: Arc<Self>,
        stream: S,
        message_handler: MessageBytesHandler,
        prefix: Option<(usize, PrefixBytesHandler)>,
        receiver: mpsc::Receiver<Bytes>,
    ) where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);

        let read = async {
            let mut reader = reader;
            let result = self.read_loop(&mut reader, message_handler, prefix).await;
            self.begin_shutdown();
            (reader, result)
        };
        let write = async {
            let mut writer = writer;
            let result = self.write_loop(&mut writer, receiver).await;
            self.begin_shutdown();
            (writer, result)
        };
        let ((reader, read_result), (writer, write_result)) = tokio::join!(read, write);

        for result in [read_result, write_result] {
            if let Err(e) = result {
                debug!(id = %self.id, error = %e, "pipe loop failed");
                self.record_cause(e);
            }
        }

        let mut stream = reader.unsplit(writer);
        if let Err(e) = stream.shutdown().await {
            trace!(id = %self.id, error = %e, "stream shutdown failed");
        }
        drop(stream);

        self.finish_shutdown().await;
    }

    async fn finish_shutdown(self: Arc<Self>) {
        self.outgoing.lock().take();
        self.state.store(PipeState::Closed as u8, Ordering::Release);

        let listeners = {
            let mut gate = self.gate.lock();
            gate.ran = true;
            std::mem::take(&mut gate.listeners)
        };
        for listener in listeners {
            listener(self.id).await;
        }

        debug!(id = %self.id, cause = ?self.close_cause(), "pipe closed");
        self.closed.send_replace(true);
    }

    async fn read_chunk<R>(&self, reader: &mut R, staging: &mut BytesMut) -> Result<Option<usize>>
    where
        R: AsyncRead + Unpin,
    {
        let room = self.staging_buffer_size.saturating_sub(staging.len());
        let limit = room.min(READ_CHUNK_SIZE);
        staging.reserve(limit);

        let read = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(None),
            read = async {
                let mut limited = (&mut *staging).limit(limit);
                reader.read_buf(&mut limited).await
            } => read?,
        };
        if read > 0 {
            *self.last_read_at.lock() = Instant::now();
        }
        Ok(Some(read))
    }

    async fn read_loop<R>(
        &self,
        reader: &mut R,
        mut handler: MessageBytesHandler,
        prefix: Option<(usize, PrefixBytesHandler)>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut staging = BytesMut::with_capacity(self.staging_buffer_size.min(READ_CHUNK_SIZE));

        if let Some((length, on_prefix)) = prefix {
            while staging.len() < length {
                match self.read_chunk(reader, &mut staging).await? {
                    Some(0) | None => return Ok(()),
                    Some(_) => {}
                }
            }
            let bytes = staging.split_to(length).freeze();
            on_prefix(bytes).await?;
        }

        loop {
            while handler(&mut staging)? {}

            if staging.len() >= self.staging_buffer_size {
                return Err(HazelcastError::Protocol(format!(
                    "{} staging buffer is full ({} bytes) and no message could be extracted",
                    self.id, self.staging_buffer_size
                )));
            }

            match self.read_chunk(reader, &mut staging).await? {
                None => return Ok(()),
                Some(0) if staging.is_empty() => {
                    debug!(id = %self.id, "stream closed by peer");
                    return Ok(());
                }
                Some(0) => {
                    return Err(HazelcastError::Connection(format!(
                        "{} closed by peer with {} unprocessed bytes",
                        self.id,
                        staging.len()
                    )));
                }
                Some(_) => {}
            }
        }
    }

    async fn write_loop<W>(&self, writer: &mut W, mut receiver: mpsc::Receiver<Bytes>) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            let bytes = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                next = receiver.recv() => match next {
                    Some(bytes) => bytes,
                    None => return Ok(()),
                },
            };

            let written = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                written = async {
                    writer.write_all(&bytes).await?;
                    writer.flush().await
                } => written,
            };
            if let Err(e) = written {
                warn!(id = %self.id, error = %e, "write failed");
                return Err(e.into());
            }
            *self.last_write_at.lock() = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::io::duplex;

    fn pipe() -> Arc<SocketPipe> {
        Arc::new(SocketPipe::new(ConnectionId::new(), 1024, 8))
    }

    fn line_handler(lines: Arc<Mutex<Vec<String>>>) -> impl FnMut(&mut BytesMut) -> Result<bool> {
        move |buf: &mut BytesMut| match buf.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                let line = buf.split_to(pos + 1);
                lines
                    .lock()
                    .push(String::from_utf8_lossy(&line[..pos]).into_owned());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn counting_listener(counter: Arc<AtomicUsize>) -> impl FnOnce(ConnectionId) -> BoxFuture<'static, ()> {
        move |_| {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    #[tokio::test]
    async fn test_start_without_handler_fails() {
        let pipe = pipe();
        let (client, _server) = duplex(64);
        let err = pipe.start(client).unwrap_err();
        assert!(matches!(err, HazelcastError::InvalidOperation(_)));
        assert_eq!(pipe.state(), PipeState::Opening);
    }

    #[tokio::test]
    async fn test_prefix_without_handler_fails() {
        let pipe = pipe();
        pipe.on_receive_message_bytes(|_| Ok(false)).unwrap();
        pipe.expect_prefix(3).unwrap();
        let (client, _server) = duplex(64);
        assert!(pipe.start(client).is_err());
    }

    #[tokio::test]
    async fn test_failed_start_keeps_message_handler() {
        let pipe = pipe();
        let received = Arc::new(AtomicUsize::new(0));
        {
            let received = Arc::clone(&received);
            pipe.on_receive_message_bytes(move |buf| {
                if buf.is_empty() {
                    return Ok(false);
                }
                received.fetch_add(buf.len(), Ordering::SeqCst);
                buf.clear();
                Ok(true)
            })
            .unwrap();
        }
        pipe.expect_prefix(2).unwrap();
        let (client, _server) = duplex(64);
        assert!(pipe.start(client).is_err());
        assert_eq!(pipe.state(), PipeState::Opening);

        pipe.on_receive_prefix_bytes(|_| -> BoxFuture<'static, Result<()>> {
            Box::pin(async { Ok(()) })
        })
        .unwrap();
        let (client, mut server) = duplex(64);
        pipe.start(client).unwrap();
        server.write_all(b"okdata").await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while received.load(Ordering::SeqCst) < 4 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        pipe.close().await;
    }

    #[tokio::test]
    async fn test_registration_after_start_fails() {
        let pipe = pipe();
        pipe.on_receive_message_bytes(|_| Ok(false)).unwrap();
        let (client, _server) = duplex(64);
        pipe.start(client).unwrap();

        assert!(pipe.on_receive_message_bytes(|_| Ok(false)).is_err());
        assert!(pipe.expect_prefix(2).is_err());
        assert!(pipe
            .on_shutdown(|_| -> BoxFuture<'static, ()> { Box::pin(async {}) })
            .is_err());
        let (other, _peer) = duplex(64);
        assert!(pipe.start(other).is_err());
        pipe.close().await;
    }

    #[tokio::test]
    async fn test_reads_and_writes() {
        let pipe = pipe();
        let lines = Arc::new(Mutex::new(Vec::new()));
        pipe.on_receive_message_bytes(line_handler(Arc::clone(&lines)))
            .unwrap();
        let (client, mut server) = duplex(64);
        pipe.start(client).unwrap();

        server.write_all(b"one\ntw").await.unwrap();
        server.write_all(b"o\nthree\n").await.unwrap();
        assert!(pipe.send(Bytes::from_static(b"hello")).await);

        let mut received = [0u8; 5];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"hello");

        tokio::time::timeout(Duration::from_secs(5), async {
            while lines.lock().len() < 3 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(*lines.lock(), vec!["one", "two", "three"]);
        pipe.close().await;
    }

    #[tokio::test]
    async fn test_prefix_is_delivered_once_before_messages() {
        let pipe = pipe();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let prefix = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&prefix);
        pipe.on_receive_message_bytes(line_handler(Arc::clone(&lines)))
            .unwrap();
        pipe.expect_prefix(3).unwrap();
        pipe.on_receive_prefix_bytes(move |bytes| -> BoxFuture<'static, Result<()>> {
            captured.lock().push(bytes);
            Box::pin(async { Ok(()) })
        })
        .unwrap();

        let (client, mut server) = duplex(64);
        pipe.start(client).unwrap();
        server.write_all(b"CP2ab\nCP2\n").await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while lines.lock().len() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(prefix.lock().len(), 1);
        assert_eq!(&prefix.lock()[0][..], b"CP2");
        assert_eq!(*lines.lock(), vec!["ab", "CP2"]);
        pipe.close().await;
    }

    #[tokio::test]
    async fn test_peer_close_runs_listeners_once() {
        let pipe = pipe();
        let counter = Arc::new(AtomicUsize::new(0));
        pipe.on_receive_message_bytes(|_| Ok(false)).unwrap();
        pipe.on_shutdown(counting_listener(Arc::clone(&counter)))
            .unwrap();
        let (client, server) = duplex(64);
        pipe.start(client).unwrap();

        drop(server);
        pipe.closed().await;
        assert_eq!(pipe.state(), PipeState::Closed);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        pipe.close().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!pipe.send(Bytes::from_static(b"late")).await);
    }

    #[tokio::test]
    async fn test_late_listener_runs_immediately() {
        let pipe = pipe();
        pipe.on_receive_message_bytes(|_| Ok(false)).unwrap();
        let (client, _server) = duplex(64);
        pipe.start(client).unwrap();
        pipe.close().await;

        let counter = Arc::new(AtomicUsize::new(0));
        pipe.add_shutdown_listener(counting_listener(Arc::clone(&counter)))
            .await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_listener_added_while_active_runs_at_shutdown() {
        let pipe = pipe();
        pipe.on_receive_message_bytes(|_| Ok(false)).unwrap();
        let (client, _server) = duplex(64);
        pipe.start(client).unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        pipe.add_shutdown_listener(counting_listener(Arc::clone(&counter)))
            .await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        pipe.close().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_listener_sees_inactive_pipe() {
        let pipe = pipe();
        let observed = Arc::new(Mutex::new(None));
        let (slot, weak) = (Arc::clone(&observed), Arc::downgrade(&pipe));
        pipe.on_receive_message_bytes(|_| Ok(false)).unwrap();
        pipe.on_shutdown(move |_| -> BoxFuture<'static, ()> {
            *slot.lock() = weak.upgrade().map(|p| p.is_active());
            Box::pin(async {})
        })
        .unwrap();
        let (client, _server) = duplex(64);
        pipe.start(client).unwrap();
        pipe.close().await;

        assert_eq!(*observed.lock(), Some(false));
    }

    #[tokio::test]
    async fn test_handler_error_shuts_down_with_cause() {
        let pipe = pipe();
        pipe.on_receive_message_bytes(|buf| {
            if buf.is_empty() {
                Ok(false)
            } else {
                Err(HazelcastError::Protocol("garbage".to_string()))
            }
        })
        .unwrap();
        let (client, mut server) = duplex(64);
        pipe.start(client).unwrap();

        server.write_all(b"x").await.unwrap();
        pipe.closed().await;
        assert!(matches!(pipe.close_cause(), Some(HazelcastError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_full_staging_buffer_is_protocol_error() {
        let pipe = Arc::new(SocketPipe::new(ConnectionId::new(), 16, 8));
        pipe.on_receive_message_bytes(|_| Ok(false)).unwrap();
        let (client, mut server) = duplex(64);
        pipe.start(client).unwrap();

        server.write_all(&[7u8; 32]).await.unwrap();
        pipe.closed().await;
        assert!(matches!(pipe.close_cause(), Some(HazelcastError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_shutdown_before_start_runs_listeners() {
        let pipe = pipe();
        let counter = Arc::new(AtomicUsize::new(0));
        pipe.on_shutdown(counting_listener(Arc::clone(&counter)))
            .unwrap();

        pipe.close().await;
        assert_eq!(pipe.state(), PipeState::Closed);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_on_shutdown_skips_listeners() {
        let pipe = pipe();
        let counter = Arc::new(AtomicUsize::new(0));
        pipe.on_receive_message_bytes(|_| Ok(false)).unwrap();
        pipe.on_shutdown(counting_listener(Arc::clone(&counter)))
            .unwrap();
        let (client, _server) = duplex(64);
        pipe.start(client).unwrap();

        pipe.clear_on_shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_send_before_start_returns_false() {
        let pipe = pipe();
        assert!(!pipe.send(Bytes::from_static(b"early")).await);
    }
}

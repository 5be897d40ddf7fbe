//! Common test utilities for integration tests: an in-process mock member.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use hazelcast_client::{ClientConfig, ClientConfigBuilder};
use hazelcast_core::protocol::client_codecs::{
    client_get_distributed_objects, encode_empty_response,
};
use hazelcast_core::protocol::{CLIENT_GET_DISTRIBUTED_OBJECTS, CLIENT_PROTOCOL_PREAMBLE};
use hazelcast_core::{ClientMessage, ClientMessageCodec, DistributedObjectInfo};

pub const MAP_SERVICE: &str = "hz:impl:mapService";

/// Builds the response to a request, or `None` to leave it unanswered.
///
/// The correlation id of the response is filled in by the mock.
pub type Responder = Arc<dyn Fn(&ClientMessage) -> Option<ClientMessage> + Send + Sync>;

/// Answers every request with an empty response, and lists `objects` for
/// `ClientGetDistributedObjects`.
pub fn default_responder(objects: Vec<DistributedObjectInfo>) -> Responder {
    Arc::new(move |request| {
        let message_type = request.message_type()?;
        if message_type == CLIENT_GET_DISTRIBUTED_OBJECTS {
            return Some(client_get_distributed_objects::encode_response(0, &objects));
        }
        Some(encode_empty_response(message_type, 0))
    })
}

/// A member that accepts client connections on a loopback port.
pub struct MockMember {
    address: SocketAddr,
    received: Arc<Mutex<Vec<ClientMessage>>>,
    connections: Arc<Mutex<CancellationToken>>,
    accepted: Arc<Mutex<usize>>,
    task: JoinHandle<()>,
}

impl MockMember {
    pub async fn start(responder: Responder) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(CancellationToken::new()));
        let accepted = Arc::new(Mutex::new(0));

        let task = {
            let received = Arc::clone(&received);
            let connections = Arc::clone(&connections);
            let accepted = Arc::clone(&accepted);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let cancel = connections.lock().clone();
                    *accepted.lock() += 1;
                    tokio::spawn(serve(
                        stream,
                        Arc::clone(&responder),
                        Arc::clone(&received),
                        cancel,
                    ));
                }
            })
        };

        Self {
            address,
            received,
            connections,
            accepted,
            task,
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Returns a config pointing at this member with short timeouts.
    pub fn config(&self) -> ClientConfigBuilder {
        ClientConfig::builder()
            .add_address(self.address)
            .connection_timeout(Duration::from_secs(2))
            .retry(|r| {
                r.initial_backoff(Duration::from_millis(20))
                    .max_backoff(Duration::from_millis(100))
                    .max_retries(5)
            })
    }

    pub fn accepted(&self) -> usize {
        *self.accepted.lock()
    }

    /// Waits until `n` connections were accepted.
    ///
    /// An accepted connection is already bound to the current
    /// [`drop_connections`](Self::drop_connections) generation.
    pub async fn wait_accepted(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.accepted() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {} accepted connections, got {}", n, self.accepted()));
    }

    pub fn received(&self) -> Vec<ClientMessage> {
        self.received.lock().clone()
    }

    pub fn count(&self, message_type: i32) -> usize {
        self.received
            .lock()
            .iter()
            .filter(|m| m.message_type() == Some(message_type))
            .count()
    }

    /// Waits until at least `n` requests of `message_type` arrived.
    pub async fn wait_for(&self, message_type: i32, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.count(message_type) < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "expected {} requests of type {:#x}, got {}",
                n,
                message_type,
                self.count(message_type)
            )
        });
    }

    /// Closes every open client connection; new ones are still accepted.
    pub fn drop_connections(&self) {
        let mut current = self.connections.lock();
        current.cancel();
        *current = CancellationToken::new();
    }
}

impl Drop for MockMember {
    fn drop(&mut self) {
        self.connections.lock().cancel();
        self.task.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    responder: Responder,
    received: Arc<Mutex<Vec<ClientMessage>>>,
    cancel: CancellationToken,
) {
    let mut preamble = [0u8; 3];
    if stream.read_exact(&mut preamble).await.is_err() {
        return;
    }
    assert_eq!(&preamble, CLIENT_PROTOCOL_PREAMBLE);

    let mut framed = Framed::new(stream, ClientMessageCodec::new());
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = framed.next() => match request {
                Some(Ok(request)) => request,
                _ => break,
            },
        };
        received.lock().push(request.clone());

        if let Some(mut response) = responder(&request) {
            if let Some(correlation_id) = request.correlation_id() {
                response.set_correlation_id(correlation_id);
            }
            if framed.send(response).await.is_err() {
                break;
            }
        }
    }
}

/// Installs a test log sink once, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

//! Keeps idle connections alive and closes silent ones.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use hazelcast_core::protocol::client_codecs::client_ping;
use hazelcast_core::HazelcastError;

use super::Connection;
use crate::invocation::InvocationService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeartbeatAction {
    None,
    Ping,
    Close,
}

fn heartbeat_action(
    now: Instant,
    last_read: Instant,
    last_write: Instant,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
) -> HeartbeatAction {
    if now.saturating_duration_since(last_read) >= heartbeat_timeout {
        HeartbeatAction::Close
    } else if now.saturating_duration_since(last_write) >= heartbeat_interval {
        HeartbeatAction::Ping
    } else {
        HeartbeatAction::None
    }
}

/// Spawns the heartbeat task. It stops when `shutdown` is cancelled.
pub(crate) fn spawn_heartbeat(
    invocations: Arc<InvocationService>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let network = invocations.connections().config().network().clone();
    let heartbeat_interval = network.heartbeat_interval();
    let heartbeat_timeout = network.heartbeat_timeout();

    tokio::spawn(async move {
        let mut ticker = interval(heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let now = Instant::now();
                    for connection in invocations.connections().active_connections().await {
                        let action = heartbeat_action(
                            now,
                            connection.last_read_at(),
                            connection.last_write_at(),
                            heartbeat_interval,
                            heartbeat_timeout,
                        );
                        match action {
                            HeartbeatAction::None => {}
                            HeartbeatAction::Ping => ping(&invocations, connection),
                            HeartbeatAction::Close => close_silent(connection, heartbeat_timeout),
                        }
                    }
                }
            }
        }
        tracing::debug!("heartbeat stopped");
    })
}

fn ping(invocations: &Arc<InvocationService>, connection: Arc<Connection>) {
    let invocations = Arc::clone(invocations);
    tokio::spawn(async move {
        let request = client_ping::encode_request();
        if let Err(e) = invocations.send_to_connection(request, &connection).await {
            tracing::debug!(id = %connection.id(), error = %e, "heartbeat ping failed");
        }
    });
}

fn close_silent(connection: Arc<Connection>, heartbeat_timeout: Duration) {
    tracing::warn!(
        id = %connection.id(),
        address = %connection.address(),
        timeout = ?heartbeat_timeout,
        "heartbeat timed out, closing connection"
    );
    tokio::spawn(async move {
        connection
            .close_with(HazelcastError::TargetDisconnected(format!(
                "no data received for {:?}",
                heartbeat_timeout
            )))
            .await;
    });
}

//! Connection management for Hazelcast client.

mod connection;
mod heartbeat;
mod load_balancer;
mod manager;
pub mod pipe;

pub use connection::{Connection, ConnectionId};
pub(crate) use heartbeat::spawn_heartbeat;
pub use load_balancer::{load_balancer_for, LoadBalancer, RandomLoadBalancer, RoundRobinLoadBalancer};
pub use manager::{ConnectionEvent, ConnectionManager, ConnectionOpened};
pub use pipe::{PipeState, SocketPipe};

//! Async client engine for [Hazelcast](https://hazelcast.com/) clusters.
//!
//! This crate drives the client side of the
//! [Hazelcast Open Binary Protocol](https://github.com/hazelcast/hazelcast-client-protocol)
//! on [Tokio](https://tokio.rs/): socket pipes that turn byte streams into
//! messages, connections to members, an invocation service that correlates
//! requests with responses, and a factory that keeps one proxy per
//! distributed object across reconnects.
//!
//! Cluster membership and partition ownership are not discovered; they are
//! fed in with [`HazelcastClient::set_members`],
//! [`HazelcastClient::set_partition_table`] and
//! [`HazelcastClient::set_cluster_id`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use hazelcast_client::{ClientConfig, HazelcastClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .cluster_name("dev")
//!         .add_address("127.0.0.1:5701".parse()?)
//!         .build()?;
//!     let client = HazelcastClient::new(config).await?;
//!
//!     for object in client.distributed_objects().await? {
//!         println!("{}/{}", object.service_name(), object.name());
//!     }
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! ```rust,no_run
//! use hazelcast_client::ClientConfig;
//! use std::time::Duration;
//!
//! let config = ClientConfig::builder()
//!     .cluster_name("production")
//!     .add_address("10.0.0.1:5701".parse().unwrap())
//!     .connection_timeout(Duration::from_secs(10))
//!     .invocation_timeout(Duration::from_secs(60))
//!     .retry(|r| r
//!         .initial_backoff(Duration::from_millis(100))
//!         .max_backoff(Duration::from_secs(30))
//!         .multiplier(2.0)
//!         .max_retries(10))
//!     .messaging(|m| m.max_frame_set_size(1024 * 1024))
//!     .build()
//!     .expect("invalid config");
//! ```

#![warn(missing_docs)]

pub mod cluster;
mod client;
pub mod config;
pub mod connection;
pub mod invocation;
pub mod listener;
pub mod proxy;

pub use client::HazelcastClient;
pub use cluster::{Member, PartitionTable};
pub use config::{
    ClientConfig, ClientConfigBuilder, ConfigError, InvocationConfig, InvocationConfigBuilder,
    LoadBalancerKind, MessagingConfig, MessagingConfigBuilder, NetworkConfig,
    NetworkConfigBuilder, RetryConfig, RetryConfigBuilder,
};
pub use connection::{
    Connection, ConnectionEvent, ConnectionId, ConnectionManager, ConnectionOpened, PipeState,
    SocketPipe,
};
pub use hazelcast_core as core;
pub use invocation::{
    ClusterMessaging, CorrelationIdSequence, EventHandler, InvocationService, InvocationTarget,
};
pub use listener::{LifecycleEvent, LifecycleService};
pub use proxy::{DistributedObject, DistributedObjectFactory};

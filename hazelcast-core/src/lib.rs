//! Core types and protocols for Hazelcast.

#![warn(missing_docs)]

pub mod error;
pub mod model;
pub mod protocol;

pub use error::{HazelcastError, Result};
pub use model::DistributedObjectInfo;
pub use protocol::{ClientMessage, ClientMessageCodec, Frame};

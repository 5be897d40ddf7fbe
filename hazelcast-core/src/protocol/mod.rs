//! Hazelcast Open Binary Protocol implementation.
//!
//! This module provides the core protocol types for communicating with
//! Hazelcast clusters using the Open Binary Protocol: frames, multi-frame
//! messages, fragmentation, the tokio codec and the message codecs the
//! client core needs.

pub mod builtin;
mod client_message;
pub mod client_codecs;
mod codec;
pub mod constants;
mod fragment;
mod frame;

pub use client_message::{compute_partition_hash, partition_id_for, ClientMessage, FrameIterator};
pub use codec::ClientMessageCodec;
pub use constants::*;
pub use fragment::FragmentAssembler;
pub use frame::Frame;

//! Codec implementation for encoding/decoding Hazelcast protocol messages.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::constants::*;
use super::fragment::FragmentAssembler;
use super::frame::Frame;
use super::ClientMessage;
use crate::error::{HazelcastError, Result};

/// Codec for encoding and decoding Hazelcast client messages.
///
/// Implements the `tokio_util::codec::{Encoder, Decoder}` traits for use
/// with tokio's framed I/O. Decoding collects frames up to IS_FINAL and
/// reassembles fragmented messages; encoding fragments messages larger than
/// the configured frame-set size.
#[derive(Debug)]
pub struct ClientMessageCodec {
    /// Frames of the frame set currently being read.
    pending_frames: Vec<Frame>,
    assembler: FragmentAssembler,
    max_frame_set_size: usize,
    next_fragmentation_id: i64,
}

impl ClientMessageCodec {
    /// Creates a new codec instance with the default fragmentation threshold.
    pub fn new() -> Self {
        Self::with_max_frame_set_size(DEFAULT_MAX_FRAME_SET_SIZE)
    }

    /// Creates a codec that fragments messages larger than
    /// `max_frame_set_size` bytes.
    pub fn with_max_frame_set_size(max_frame_set_size: usize) -> Self {
        Self {
            pending_frames: Vec::new(),
            assembler: FragmentAssembler::new(),
            max_frame_set_size,
            next_fragmentation_id: 1,
        }
    }

    /// Returns the fragmentation threshold.
    pub fn max_frame_set_size(&self) -> usize {
        self.max_frame_set_size
    }

    /// Returns true if a frame set or fragmented message is partially read.
    pub fn has_partial_message(&self) -> bool {
        !self.pending_frames.is_empty() || self.assembler.open_count() > 0
    }

    fn next_fragmentation_id(&mut self) -> i64 {
        let id = self.next_fragmentation_id;
        self.next_fragmentation_id = self.next_fragmentation_id.checked_add(1).unwrap_or(1);
        id
    }
}

impl Default for ClientMessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<ClientMessage> for ClientMessageCodec {
    type Error = HazelcastError;

    fn encode(&mut self, item: ClientMessage, dst: &mut BytesMut) -> Result<()> {
        if item.is_empty() {
            return Err(HazelcastError::Protocol(
                "cannot encode empty message".to_string(),
            ));
        }

        if item.wire_size() <= self.max_frame_set_size {
            item.write_to(dst);
            return Ok(());
        }

        let fragmentation_id = self.next_fragmentation_id();
        for fragment in item.fragment(self.max_frame_set_size, fragmentation_id) {
            fragment.write_to(dst);
        }
        Ok(())
    }
}

impl Decoder for ClientMessageCodec {
    type Item = ClientMessage;
    type Error = HazelcastError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        while let Some(frame) = Frame::read_from(src)? {
            let is_final = frame.is_final_frame();
            self.pending_frames.push(frame);

            if is_final {
                let frames = std::mem::take(&mut self.pending_frames);
                if let Some(message) = self.assembler.accept(frames)? {
                    return Ok(Some(message));
                }
            }
        }
        Ok(None)
    }
}

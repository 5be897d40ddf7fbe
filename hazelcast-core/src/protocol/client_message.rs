//! ClientMessage type for multi-frame Hazelcast protocol messages.

use bytes::{BufMut, BytesMut};

use super::constants::*;
use super::frame::Frame;
use crate::error::{HazelcastError, Result};

/// A client message composed of one or more frames.
///
/// The first frame is the "initial frame" containing the message header
/// (type, correlation ID, then partition ID for requests and events or the
/// backup-ack count for responses). Additional frames contain the message
/// payload.
///
/// The retryable flag and operation name are local attributes; they are not
/// transmitted and do not take part in equality.
#[derive(Debug, Clone, Default)]
pub struct ClientMessage {
    frames: Vec<Frame>,
    retryable: bool,
    operation_name: Option<&'static str>,
}

impl PartialEq for ClientMessage {
    fn eq(&self, other: &Self) -> bool {
        self.frames == other.frames
    }
}

impl Eq for ClientMessage {}

impl ClientMessage {
    /// Creates a new empty client message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a request message with the given type and partition ID.
    ///
    /// The correlation ID is left at zero; the invocation service assigns one
    /// right before the message is sent. Fixed-size request parameters are
    /// appended to [`ClientMessage::initial_frame_mut`].
    pub fn create_for_encode(message_type: i32, partition_id: i32) -> Self {
        let mut initial_frame = Frame::with_capacity(REQUEST_HEADER_SIZE, UNFRAGMENTED_MESSAGE);
        initial_frame.content.put_i32_le(message_type);
        initial_frame.content.put_i64_le(0);
        initial_frame.content.put_i32_le(partition_id);

        Self::from_frames(vec![initial_frame])
    }

    /// Creates a request message targeting any partition.
    pub fn create_for_encode_any_partition(message_type: i32) -> Self {
        Self::create_for_encode(message_type, PARTITION_ID_ANY)
    }

    /// Creates a response message, as a member would send it.
    pub fn create_response(message_type: i32, correlation_id: i64, backup_acks: u8) -> Self {
        let mut initial_frame = Frame::with_capacity(RESPONSE_HEADER_SIZE, UNFRAGMENTED_MESSAGE);
        initial_frame.content.put_i32_le(message_type);
        initial_frame.content.put_i64_le(correlation_id);
        initial_frame.content.put_u8(backup_acks);

        Self::from_frames(vec![initial_frame])
    }

    /// Creates an event message bound to the registration that `correlation_id`
    /// identifies.
    pub fn create_for_event(message_type: i32, correlation_id: i64, partition_id: i32) -> Self {
        let mut initial_frame = Frame::with_capacity(
            EVENT_HEADER_SIZE,
            UNFRAGMENTED_MESSAGE | IS_EVENT_FLAG,
        );
        initial_frame.content.put_i32_le(message_type);
        initial_frame.content.put_i64_le(correlation_id);
        initial_frame.content.put_i32_le(partition_id);

        Self::from_frames(vec![initial_frame])
    }

    /// Creates a client message from received frames.
    pub fn from_frames(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            retryable: false,
            operation_name: None,
        }
    }

    /// Marks the message as safe to re-send after a transient failure.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Sets the diagnostic operation name.
    pub fn with_operation_name(mut self, name: &'static str) -> Self {
        self.operation_name = Some(name);
        self
    }

    /// Returns true if the message may be re-sent after a transient failure.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Sets the retryable flag.
    pub fn set_retryable(&mut self, retryable: bool) {
        self.retryable = retryable;
    }

    /// Returns the diagnostic operation name, if one was set.
    pub fn operation_name(&self) -> Option<&'static str> {
        self.operation_name
    }

    /// Returns the message type from the initial frame.
    ///
    /// Returns `None` if there is no initial frame or if the frame content
    /// is too short to contain a message type field.
    pub fn message_type(&self) -> Option<i32> {
        self.frames.first()?.read_i32_at(TYPE_FIELD_OFFSET)
    }

    /// Returns the correlation ID from the initial frame.
    pub fn correlation_id(&self) -> Option<i64> {
        self.frames.first()?.read_i64_at(CORRELATION_ID_OFFSET)
    }

    /// Sets the correlation ID in the initial frame.
    ///
    /// Does nothing if the initial frame is too short to hold one.
    pub fn set_correlation_id(&mut self, correlation_id: i64) {
        self.write_header_bytes(CORRELATION_ID_OFFSET, &correlation_id.to_le_bytes());
    }

    /// Returns the partition ID from the initial frame (requests and events).
    pub fn partition_id(&self) -> Option<i32> {
        self.frames.first()?.read_i32_at(PARTITION_ID_OFFSET)
    }

    /// Sets the partition ID in the initial frame.
    pub fn set_partition_id(&mut self, partition_id: i32) {
        self.write_header_bytes(PARTITION_ID_OFFSET, &partition_id.to_le_bytes());
    }

    /// Returns the number of backup acknowledgements announced by a response.
    pub fn backup_acks(&self) -> Option<u8> {
        self.frames.first()?.read_u8_at(RESPONSE_BACKUP_ACKS_OFFSET)
    }

    fn write_header_bytes(&mut self, offset: usize, bytes: &[u8]) {
        if let Some(frame) = self.frames.first_mut() {
            if let Some(slot) = frame.content.get_mut(offset..offset + bytes.len()) {
                slot.copy_from_slice(bytes);
            }
        }
    }

    /// Adds a frame to the message.
    pub fn add_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// Returns a reference to the initial (first) frame, if present.
    pub fn initial_frame(&self) -> Option<&Frame> {
        self.frames.first()
    }

    /// Returns a mutable reference to the initial frame, if present.
    pub fn initial_frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.first_mut()
    }

    /// Returns a reference to all frames.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Consumes the message and returns its frames.
    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    /// Returns an iterator over the frames, used by decoders.
    pub fn iter(&self) -> FrameIterator<'_> {
        FrameIterator::new(&self.frames)
    }

    /// Returns the number of frames in the message.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Returns true if the message has no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Calculates the total size of the message on the wire.
    pub fn wire_size(&self) -> usize {
        self.frames.iter().map(Frame::wire_size).sum()
    }

    /// Sets the IS_FINAL flag on the last frame.
    pub fn finalize(&mut self) {
        if let Some(last) = self.frames.last_mut() {
            last.flags |= IS_FINAL_FLAG;
        }
    }

    /// Writes all frames to the destination buffer, with IS_FINAL set on the
    /// last one.
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_size());
        let last = self.frames.len().saturating_sub(1);
        for (index, frame) in self.frames.iter().enumerate() {
            if index == last && !frame.is_final_frame() {
                let mut final_frame = frame.clone();
                final_frame.flags |= IS_FINAL_FLAG;
                final_frame.write_to(dst);
            } else {
                frame.write_to(dst);
            }
        }
    }

    /// Returns true if this message is flagged as an event.
    pub fn is_event(&self) -> bool {
        self.frames
            .first()
            .map(Frame::is_event_frame)
            .unwrap_or(false)
    }

    /// Returns true if this message is an error response.
    pub fn is_error(&self) -> bool {
        !self.is_event() && self.message_type() == Some(ERROR_MESSAGE_TYPE)
    }
}

/// Cursor over the frames of a message.
///
/// Decoders pull frames one at a time; nested structures that a decoder does
/// not know about are skipped with [`FrameIterator::skip_to_struct_end`].
#[derive(Debug, Clone)]
pub struct FrameIterator<'a> {
    frames: &'a [Frame],
    position: usize,
}

impl<'a> FrameIterator<'a> {
    /// Creates an iterator positioned at the first frame.
    pub fn new(frames: &'a [Frame]) -> Self {
        Self {
            frames,
            position: 0,
        }
    }

    /// Returns true if frames remain.
    pub fn has_next(&self) -> bool {
        self.position < self.frames.len()
    }

    /// Returns the next frame without consuming it.
    pub fn peek(&self) -> Option<&'a Frame> {
        self.frames.get(self.position)
    }

    /// Consumes the next frame, failing if the message ended early.
    pub fn next_frame(&mut self) -> Result<&'a Frame> {
        let frame = self.peek().ok_or_else(|| {
            HazelcastError::Protocol("unexpected end of message".to_string())
        })?;
        self.position += 1;
        Ok(frame)
    }

    /// Consumes the next frame if it is a null frame. Returns true if it did.
    pub fn skip_null(&mut self) -> bool {
        match self.peek() {
            Some(frame) if frame.is_null_frame() => {
                self.position += 1;
                true
            }
            _ => false,
        }
    }

    /// Returns true if the next frame closes a data structure.
    pub fn next_is_struct_end(&self) -> bool {
        self.peek()
            .map(Frame::is_end_struct_frame)
            .unwrap_or(false)
    }

    /// Consumes frames up to and including the end of the data structure the
    /// iterator is currently inside, skipping nested structures.
    pub fn skip_to_struct_end(&mut self) -> Result<()> {
        let mut depth = 1usize;
        while depth > 0 {
            let frame = self.next_frame()?;
            if frame.is_end_struct_frame() {
                depth -= 1;
            } else if frame.is_begin_struct_frame() {
                depth += 1;
            }
        }
        Ok(())
    }
}

impl<'a> Iterator for FrameIterator<'a> {
    type Item = &'a Frame;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = self.peek()?;
        self.position += 1;
        Some(frame)
    }
}

/// Computes a partition hash for the given key data.
///
/// Uses MurmurHash3 algorithm compatible with Hazelcast.
pub fn compute_partition_hash(key: &[u8]) -> i32 {
    murmur_hash3_x86_32(key, 0x01000193)
}

/// Maps serialized key bytes to a partition ID.
///
/// Returns [`PARTITION_ID_ANY`] when the partition count is not known yet.
pub fn partition_id_for(key: &[u8], partition_count: i32) -> i32 {
    if partition_count <= 0 {
        return PARTITION_ID_ANY;
    }
    (compute_partition_hash(key) % partition_count).abs()
}

/// MurmurHash3 x86 32-bit implementation.
fn murmur_hash3_x86_32(data: &[u8], seed: u32) -> i32 {
    const C1: u32 = 0xcc9e2d51;
    const C2: u32 = 0x1b873593;

    let mix = |k1: u32| k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);

    let mut h1 = seed;
    let mut blocks = data.chunks_exact(4);
    for block in &mut blocks {
        let k1 = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        h1 ^= mix(k1);
        h1 = h1.rotate_left(13).wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let k1 = tail
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, b)| acc ^ ((*b as u32) << (8 * i)));
        h1 ^= mix(k1);
    }

    h1 ^= data.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85ebca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2ae35);
    h1 ^= h1 >> 16;

    h1 as i32
}

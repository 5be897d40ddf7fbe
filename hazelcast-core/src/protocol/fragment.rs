//! Splitting of large messages into fragments and their reassembly.

use std::collections::HashMap;

use super::client_message::ClientMessage;
use super::constants::*;
use super::frame::Frame;
use crate::error::{HazelcastError, Result};

const FRAGMENTATION_FRAME_SIZE: usize = FRAME_HEADER_SIZE + LONG_SIZE_IN_BYTES;

impl ClientMessage {
    /// Splits the message into fragments of at most `max_frame_set_size`
    /// bytes on the wire.
    ///
    /// Each fragment starts with a fragmentation frame carrying
    /// `fragmentation_id`. A frame that alone exceeds the limit gets a
    /// fragment of its own. A message that fits is returned untouched.
    pub fn fragment(self, max_frame_set_size: usize, fragmentation_id: i64) -> Vec<ClientMessage> {
        if self.wire_size() <= max_frame_set_size {
            return vec![self];
        }

        let mut groups: Vec<Vec<Frame>> = Vec::new();
        let mut current: Vec<Frame> = Vec::new();
        let mut current_size = FRAGMENTATION_FRAME_SIZE;

        for frame in self.frames().iter().cloned() {
            let frame_size = frame.wire_size();
            if !current.is_empty() && current_size + frame_size > max_frame_set_size {
                groups.push(std::mem::take(&mut current));
                current_size = FRAGMENTATION_FRAME_SIZE;
            }
            current_size += frame_size;
            current.push(frame);
        }
        if !current.is_empty() {
            groups.push(current);
        }

        if groups.len() < 2 {
            return vec![self];
        }

        let last = groups.len() - 1;
        groups
            .into_iter()
            .enumerate()
            .map(|(index, data_frames)| {
                let flags = match index {
                    0 => BEGIN_FRAGMENT_FLAG,
                    i if i == last => END_FRAGMENT_FLAG,
                    _ => DEFAULT_FLAGS,
                };
                let mut frames = Vec::with_capacity(data_frames.len() + 1);
                frames.push(Frame::new_fragmentation_frame(fragmentation_id, flags));
                frames.extend(data_frames);
                ClientMessage::from_frames(frames)
            })
            .collect()
    }
}

/// Reassembles fragmented messages from decoded frame sets.
///
/// Fragments sharing a fragmentation ID are merged in arrival order.
#[derive(Debug, Default)]
pub struct FragmentAssembler {
    open: HashMap<i64, Vec<Frame>>,
}

impl FragmentAssembler {
    /// Creates an assembler with no open fragmented messages.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts one frame set (frames up to and including IS_FINAL).
    ///
    /// Returns the complete message once it is available: immediately for
    /// an unfragmented set, or when the END fragment arrives.
    pub fn accept(&mut self, frames: Vec<Frame>) -> Result<Option<ClientMessage>> {
        let mut frames = frames.into_iter();
        let head = frames
            .next()
            .ok_or_else(|| HazelcastError::Protocol("empty frame set".to_string()))?;

        if head.is_unfragmented() {
            let mut all = Vec::with_capacity(frames.len() + 1);
            all.push(head);
            all.extend(frames);
            return Ok(Some(ClientMessage::from_frames(all)));
        }

        let fragmentation_id = head
            .read_i64_at(FRAGMENTATION_ID_OFFSET)
            .ok_or_else(|| {
                HazelcastError::Protocol("fragmentation frame is missing its id".to_string())
            })?;

        let mut data: Vec<Frame> = frames.collect();
        match data.last_mut() {
            Some(last) => last.flags &= !IS_FINAL_FLAG,
            None => {
                return Err(HazelcastError::Protocol(format!(
                    "fragment of message {} carries no frames",
                    fragmentation_id
                )))
            }
        }

        if head.is_begin_fragment() {
            if self.open.contains_key(&fragmentation_id) {
                return Err(HazelcastError::Protocol(format!(
                    "duplicate first fragment for message {}",
                    fragmentation_id
                )));
            }
            self.open.insert(fragmentation_id, data);
            return Ok(None);
        }

        let collected = self.open.get_mut(&fragmentation_id).ok_or_else(|| {
            HazelcastError::Protocol(format!(
                "fragment for message {} arrived without its first fragment",
                fragmentation_id
            ))
        })?;
        collected.extend(data);

        if !head.is_end_fragment() {
            return Ok(None);
        }

        let mut complete = self.open.remove(&fragmentation_id).unwrap_or_default();
        if let Some(last) = complete.last_mut() {
            last.flags |= IS_FINAL_FLAG;
        }
        Ok(Some(ClientMessage::from_frames(complete)))
    }

    /// Returns the number of messages with fragments still outstanding.
    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}

//! Encoders and decoders for the value shapes shared by all message codecs.
//!
//! Variable-size values occupy frames of their own; fixed-size values are
//! packed into the initial frame or into the initial frame of a structure.

use bytes::{BufMut, BytesMut};
use uuid::Uuid;

use super::client_message::{ClientMessage, FrameIterator};
use super::frame::Frame;
use crate::error::{HazelcastError, Result};
use crate::model::DistributedObjectInfo;

/// Writes a boolean as one byte.
pub fn put_bool(dst: &mut BytesMut, value: bool) {
    dst.put_u8(u8::from(value));
}

/// Writes a nullable UUID: a null flag followed by the two 64-bit halves.
pub fn put_uuid(dst: &mut BytesMut, value: Option<Uuid>) {
    match value {
        Some(uuid) => {
            let (msb, lsb) = uuid.as_u64_pair();
            put_bool(dst, false);
            dst.put_i64_le(msb as i64);
            dst.put_i64_le(lsb as i64);
        }
        None => {
            put_bool(dst, true);
            dst.put_i64_le(0);
            dst.put_i64_le(0);
        }
    }
}

/// Appends a UTF-8 string frame.
pub fn encode_string(message: &mut ClientMessage, value: &str) {
    message.add_frame(Frame::new_data_frame(value.as_bytes()));
}

/// Reads a UTF-8 string frame.
pub fn decode_string(iter: &mut FrameIterator<'_>) -> Result<String> {
    let frame = iter.next_frame()?;
    String::from_utf8(frame.content.to_vec())
        .map_err(|e| HazelcastError::Serialization(format!("invalid UTF-8 string: {}", e)))
}

/// Appends `value` with `encode`, or a null frame.
pub fn encode_nullable<T: ?Sized>(
    message: &mut ClientMessage,
    value: Option<&T>,
    encode: impl FnOnce(&mut ClientMessage, &T),
) {
    match value {
        Some(value) => encode(message, value),
        None => message.add_frame(Frame::new_null_frame()),
    }
}

/// Reads a value with `decode` unless the next frame is a null frame.
pub fn decode_nullable<T>(
    iter: &mut FrameIterator<'_>,
    decode: impl FnOnce(&mut FrameIterator<'_>) -> Result<T>,
) -> Result<Option<T>> {
    if iter.skip_null() {
        return Ok(None);
    }
    decode(iter).map(Some)
}

fn expect_struct_begin(iter: &mut FrameIterator<'_>, what: &str) -> Result<()> {
    let frame = iter.next_frame()?;
    if !frame.is_begin_struct_frame() {
        return Err(HazelcastError::Protocol(format!(
            "expected the start of {}, found frame with flags {:#06x}",
            what, frame.flags
        )));
    }
    Ok(())
}

/// Appends a list as a structure holding one encoded item after another.
pub fn encode_list_multi_frame<T>(
    message: &mut ClientMessage,
    items: &[T],
    mut encode: impl FnMut(&mut ClientMessage, &T),
) {
    message.add_frame(Frame::new_begin_struct_frame());
    for item in items {
        encode(message, item);
    }
    message.add_frame(Frame::new_end_struct_frame());
}

/// Reads a list written by [`encode_list_multi_frame`].
pub fn decode_list_multi_frame<T>(
    iter: &mut FrameIterator<'_>,
    mut decode: impl FnMut(&mut FrameIterator<'_>) -> Result<T>,
) -> Result<Vec<T>> {
    expect_struct_begin(iter, "a list")?;
    let mut items = Vec::new();
    while !iter.next_is_struct_end() {
        items.push(decode(iter)?);
    }
    iter.next_frame()?;
    Ok(items)
}

/// Appends string pairs as a structure of alternating key and value frames.
pub fn encode_string_entry_list(message: &mut ClientMessage, entries: &[(String, String)]) {
    message.add_frame(Frame::new_begin_struct_frame());
    for (key, value) in entries {
        encode_string(message, key);
        encode_string(message, value);
    }
    message.add_frame(Frame::new_end_struct_frame());
}

/// Reads pairs written by [`encode_string_entry_list`].
pub fn decode_string_entry_list(iter: &mut FrameIterator<'_>) -> Result<Vec<(String, String)>> {
    expect_struct_begin(iter, "an entry list")?;
    let mut entries = Vec::new();
    while !iter.next_is_struct_end() {
        let key = decode_string(iter)?;
        let value = decode_string(iter)?;
        entries.push((key, value));
    }
    iter.next_frame()?;
    Ok(entries)
}

/// Appends a [`DistributedObjectInfo`] structure.
pub fn encode_distributed_object_info(message: &mut ClientMessage, info: &DistributedObjectInfo) {
    message.add_frame(Frame::new_begin_struct_frame());
    encode_string(message, info.service_name());
    encode_string(message, info.name());
    message.add_frame(Frame::new_end_struct_frame());
}

/// Reads a [`DistributedObjectInfo`] structure, skipping fields added by
/// newer cluster versions.
pub fn decode_distributed_object_info(iter: &mut FrameIterator<'_>) -> Result<DistributedObjectInfo> {
    expect_struct_begin(iter, "a distributed object info")?;
    let service_name = decode_string(iter)?;
    let name = decode_string(iter)?;
    iter.skip_to_struct_end()?;
    Ok(DistributedObjectInfo::new(service_name, name))
}

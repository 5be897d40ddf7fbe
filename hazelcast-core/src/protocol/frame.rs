//! Frame type for the Hazelcast Open Binary Protocol.

use bytes::{Buf, BufMut, BytesMut};
use uuid::Uuid;

use super::constants::*;
use crate::error::{HazelcastError, Result};

/// A single frame in the Hazelcast protocol.
///
/// Each frame consists of:
/// - A 4-byte length field (little-endian), counting the header and content
/// - A 2-byte flags field (little-endian)
/// - Variable-length content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The frame content (payload after flags).
    pub content: BytesMut,
    /// Frame flags indicating frame type and properties.
    pub flags: u16,
}

impl Frame {
    /// Creates a new frame with the given content and flags.
    pub fn new(content: BytesMut, flags: u16) -> Self {
        Self { content, flags }
    }

    /// Creates a new frame with content and default flags.
    pub fn with_content(content: BytesMut) -> Self {
        Self::new(content, DEFAULT_FLAGS)
    }

    /// Creates a new empty frame with the given flags.
    pub fn with_flags(flags: u16) -> Self {
        Self::new(BytesMut::new(), flags)
    }

    /// Creates a new frame with the given capacity and flags.
    pub fn with_capacity(capacity: usize, flags: u16) -> Self {
        Self::new(BytesMut::with_capacity(capacity), flags)
    }

    /// Creates a data frame holding a copy of `data`.
    pub fn new_data_frame(data: &[u8]) -> Self {
        Self::with_content(BytesMut::from(data))
    }

    /// Creates a frame opening a nested data structure.
    pub fn new_begin_struct_frame() -> Self {
        Self::with_flags(BEGIN_DATA_STRUCTURE_FLAG)
    }

    /// Creates a frame closing a nested data structure.
    pub fn new_end_struct_frame() -> Self {
        Self::with_flags(END_DATA_STRUCTURE_FLAG)
    }

    /// Creates a null frame (represents a null value).
    pub fn new_null_frame() -> Self {
        Self::with_flags(IS_NULL_FLAG)
    }

    /// Creates the frame that heads one fragment of a fragmented message.
    ///
    /// `flags` is [`BEGIN_FRAGMENT_FLAG`] for the first fragment,
    /// [`END_FRAGMENT_FLAG`] for the last one and `0` in between.
    pub fn new_fragmentation_frame(fragmentation_id: i64, flags: u16) -> Self {
        let mut content = BytesMut::with_capacity(LONG_SIZE_IN_BYTES);
        content.put_i64_le(fragmentation_id);
        Self::new(content, flags)
    }

    /// Returns true if every bit of `flag` is set on this frame.
    pub fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag == flag
    }

    /// Returns true if this frame has the BEGIN_FRAGMENT flag set.
    pub fn is_begin_fragment(&self) -> bool {
        self.flags & BEGIN_FRAGMENT_FLAG != 0
    }

    /// Returns true if this frame has the END_FRAGMENT flag set.
    pub fn is_end_fragment(&self) -> bool {
        self.flags & END_FRAGMENT_FLAG != 0
    }

    /// Returns true if this frame starts a message sent in one piece.
    pub fn is_unfragmented(&self) -> bool {
        self.has_flag(UNFRAGMENTED_MESSAGE)
    }

    /// Returns true if this frame has the NULL flag set.
    pub fn is_null_frame(&self) -> bool {
        self.flags & IS_NULL_FLAG != 0
    }

    /// Returns true if this frame has the FINAL flag set.
    pub fn is_final_frame(&self) -> bool {
        self.flags & IS_FINAL_FLAG != 0
    }

    /// Returns true if this frame has the EVENT flag set.
    pub fn is_event_frame(&self) -> bool {
        self.flags & IS_EVENT_FLAG != 0
    }

    /// Returns true if this frame has the BACKUP_EVENT flag set.
    pub fn is_backup_event_frame(&self) -> bool {
        self.flags & BACKUP_EVENT_FLAG != 0
    }

    /// Returns true if this frame has the BACKUP_AWARE flag set.
    pub fn is_backup_aware(&self) -> bool {
        self.flags & BACKUP_AWARE_FLAG != 0
    }

    /// Returns true if this frame opens a nested data structure.
    pub fn is_begin_struct_frame(&self) -> bool {
        self.flags & BEGIN_DATA_STRUCTURE_FLAG != 0
    }

    /// Returns true if this frame closes a nested data structure.
    pub fn is_end_struct_frame(&self) -> bool {
        self.flags & END_DATA_STRUCTURE_FLAG != 0
    }

    /// Returns the size of this frame on the wire.
    ///
    /// This includes the 4-byte length field, 2-byte flags, and content.
    pub fn wire_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.content.len()
    }

    /// Writes this frame to the given buffer.
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_size());
        dst.put_u32_le(self.wire_size() as u32);
        dst.put_u16_le(self.flags);
        dst.put_slice(&self.content);
    }

    /// Reads a frame from the given buffer.
    ///
    /// Returns `Ok(None)` and leaves `src` untouched if the buffer does not
    /// yet hold a complete frame. Fails only when the length field is
    /// smaller than the frame header.
    pub fn read_from(src: &mut BytesMut) -> Result<Option<Self>> {
        if src.len() < SIZE_OF_FRAME_LENGTH_FIELD {
            return Ok(None);
        }

        let frame_length = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if frame_length < FRAME_HEADER_SIZE {
            return Err(HazelcastError::Protocol(format!(
                "frame length {} is smaller than the {}-byte header",
                frame_length, FRAME_HEADER_SIZE
            )));
        }

        if src.len() < frame_length {
            return Ok(None);
        }

        src.advance(SIZE_OF_FRAME_LENGTH_FIELD);
        let flags = src.get_u16_le();
        let content = src.split_to(frame_length - FRAME_HEADER_SIZE);

        Ok(Some(Self::new(content, flags)))
    }

    fn bytes_at<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let end = offset.checked_add(N)?;
        self.content.get(offset..end)?.try_into().ok()
    }

    /// Reads an i32 at `offset`, or `None` if the content is too short.
    pub fn read_i32_at(&self, offset: usize) -> Option<i32> {
        self.bytes_at(offset).map(i32::from_le_bytes)
    }

    /// Reads an i64 at `offset`, or `None` if the content is too short.
    pub fn read_i64_at(&self, offset: usize) -> Option<i64> {
        self.bytes_at(offset).map(i64::from_le_bytes)
    }

    /// Reads a u8 at `offset`, or `None` if the content is too short.
    pub fn read_u8_at(&self, offset: usize) -> Option<u8> {
        self.content.get(offset).copied()
    }

    /// Reads a boolean at `offset`, or `None` if the content is too short.
    pub fn read_bool_at(&self, offset: usize) -> Option<bool> {
        self.read_u8_at(offset).map(|b| b != 0)
    }

    /// Reads a nullable UUID at `offset`.
    ///
    /// The outer `Option` is `None` if the content is too short; the inner one
    /// is `None` if the encoded UUID is null.
    pub fn read_uuid_at(&self, offset: usize) -> Option<Option<Uuid>> {
        let is_null = self.read_bool_at(offset)?;
        let msb = self.read_i64_at(offset + BOOLEAN_SIZE_IN_BYTES)?;
        let lsb = self.read_i64_at(offset + BOOLEAN_SIZE_IN_BYTES + LONG_SIZE_IN_BYTES)?;
        if is_null {
            return Some(None);
        }
        Some(Some(Uuid::from_u64_pair(msb as u64, lsb as u64)))
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::with_flags(DEFAULT_FLAGS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_flags() {
        let begin = Frame::with_flags(BEGIN_FRAGMENT_FLAG);
        assert!(begin.is_begin_fragment());
        assert!(!begin.is_end_fragment());
        assert!(!begin.is_unfragmented());

        let whole = Frame::with_flags(UNFRAGMENTED_MESSAGE);
        assert!(whole.is_unfragmented());

        assert!(Frame::new_null_frame().is_null_frame());
        assert!(Frame::new_begin_struct_frame().is_begin_struct_frame());
        assert!(Frame::new_end_struct_frame().is_end_struct_frame());
        assert!(Frame::with_flags(IS_FINAL_FLAG).is_final_frame());
        assert!(Frame::with_flags(IS_EVENT_FLAG).is_event_frame());
        assert!(Frame::with_flags(BACKUP_AWARE_FLAG).is_backup_aware());
        assert!(Frame::with_flags(BACKUP_EVENT_FLAG).is_backup_event_frame());
    }

    #[test]
    fn test_flag_bits_match_wire_definition() {
        assert_eq!(BEGIN_FRAGMENT_FLAG, 0x8000);
        assert_eq!(END_FRAGMENT_FLAG, 0x4000);
        assert_eq!(IS_FINAL_FLAG, 0x2000);
        assert_eq!(BEGIN_DATA_STRUCTURE_FLAG, 0x1000);
        assert_eq!(END_DATA_STRUCTURE_FLAG, 0x0800);
        assert_eq!(IS_NULL_FLAG, 0x0400);
        assert_eq!(IS_EVENT_FLAG, 0x0200);
        assert_eq!(BACKUP_AWARE_FLAG, 0x0100);
        assert_eq!(BACKUP_EVENT_FLAG, 0x0080);
    }

    #[test]
    fn test_wire_size() {
        assert_eq!(Frame::default().wire_size(), 6);
        assert_eq!(Frame::new_data_frame(&[1, 2, 3, 4, 5]).wire_size(), 11);
    }

    #[test]
    fn test_length_field_counts_header() {
        let frame = Frame::new_data_frame(&[0xAA, 0xBB]);
        let mut buf = BytesMut::new();
        frame.write_to(&mut buf);

        assert_eq!(&buf[..4], &8u32.to_le_bytes());
        assert_eq!(&buf[4..6], &0u16.to_le_bytes());
        assert_eq!(&buf[6..], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_write_and_read_frame() {
        let original = Frame::new(
            BytesMut::from(&[0xDE, 0xAD, 0xBE, 0xEF][..]),
            BEGIN_FRAGMENT_FLAG | IS_EVENT_FLAG,
        );
        let mut buf = BytesMut::new();
        original.write_to(&mut buf);

        let decoded = Frame::read_from(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, original);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_read_incomplete_length() {
        let mut buf = BytesMut::from(&[0x01, 0x02][..]);
        assert!(Frame::read_from(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_read_incomplete_content() {
        let mut buf = BytesMut::from(
            &[
                0x0A, 0x00, 0x00, 0x00, // length = 10 (header + 4 bytes content)
                0x00, 0x80, // flags
                0x01, 0x02, // only 2 bytes of content
            ][..],
        );
        assert!(Frame::read_from(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn test_read_length_below_header_is_protocol_error() {
        let mut buf = BytesMut::from(&[0x05, 0x00, 0x00, 0x00, 0x00, 0x00][..]);
        let err = Frame::read_from(&mut buf).unwrap_err();
        assert!(matches!(err, HazelcastError::Protocol(_)));
    }

    #[test]
    fn test_read_empty_frame() {
        let mut buf = BytesMut::from(
            &[
                0x06, 0x00, 0x00, 0x00, // length = 6 (just the header)
                0x00, 0x08, // END_DATA_STRUCTURE
            ][..],
        );

        let frame = Frame::read_from(&mut buf).unwrap().unwrap();
        assert!(frame.is_end_struct_frame());
        assert!(frame.content.is_empty());
    }

    #[test]
    fn test_fragmentation_frame_carries_id() {
        let frame = Frame::new_fragmentation_frame(0x0102_0304_0506_0708, END_FRAGMENT_FLAG);
        assert!(frame.is_end_fragment());
        assert_eq!(
            frame.read_i64_at(FRAGMENTATION_ID_OFFSET),
            Some(0x0102_0304_0506_0708)
        );
    }

    #[test]
    fn test_length_gated_reads() {
        let mut content = BytesMut::new();
        content.put_i32_le(-7);
        content.put_u8(1);
        let frame = Frame::with_content(content);

        assert_eq!(frame.read_i32_at(0), Some(-7));
        assert_eq!(frame.read_bool_at(4), Some(true));
        assert_eq!(frame.read_i32_at(2), None);
        assert_eq!(frame.read_i64_at(0), None);
        assert_eq!(frame.read_u8_at(5), None);
        assert_eq!(frame.read_i32_at(usize::MAX), None);
    }

    #[test]
    fn test_read_uuid_at() {
        let uuid = Uuid::from_u64_pair(0x1122_3344_5566_7788, 0x99AA_BBCC_DDEE_FF00);
        let (msb, lsb) = uuid.as_u64_pair();
        let mut content = BytesMut::new();
        content.put_u8(0);
        content.put_i64_le(msb as i64);
        content.put_i64_le(lsb as i64);
        content.put_u8(1);
        content.put_i64_le(0);
        content.put_i64_le(0);
        let frame = Frame::with_content(content);

        assert_eq!(frame.read_uuid_at(0), Some(Some(uuid)));
        assert_eq!(frame.read_uuid_at(UUID_SIZE_IN_BYTES), Some(None));
        assert_eq!(frame.read_uuid_at(UUID_SIZE_IN_BYTES + 1), None);
    }

    #[test]
    fn test_read_large_frame() {
        let content: Vec<u8> = (0..1000).map(|i| (i % 256) as u8).collect();
        let original = Frame::new_data_frame(&content);

        let mut buf = BytesMut::new();
        original.write_to(&mut buf);

        let decoded = Frame::read_from(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.content.len(), 1000);
        assert_eq!(&decoded.content[..], &content[..]);
    }

    #[test]
    fn test_consecutive_frames_read_in_order() {
        let first = Frame::new_data_frame(&[1]);
        let second = Frame::new_data_frame(&[2, 2]);
        let mut buf = BytesMut::new();
        first.write_to(&mut buf);
        second.write_to(&mut buf);

        assert_eq!(Frame::read_from(&mut buf).unwrap(), Some(first));
        assert_eq!(Frame::read_from(&mut buf).unwrap(), Some(second));
        assert_eq!(Frame::read_from(&mut buf).unwrap(), None);
    }
}

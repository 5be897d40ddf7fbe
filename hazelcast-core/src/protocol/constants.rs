//! Protocol constants for the Hazelcast Open Binary Protocol.

/// Size of the frame length field in bytes.
pub const SIZE_OF_FRAME_LENGTH_FIELD: usize = 4;

/// Size of the frame flags field in bytes.
pub const SIZE_OF_FRAME_FLAGS_FIELD: usize = 2;

/// Total frame header size (length + flags).
///
/// The length field on the wire counts this header plus the payload.
pub const FRAME_HEADER_SIZE: usize = SIZE_OF_FRAME_LENGTH_FIELD + SIZE_OF_FRAME_FLAGS_FIELD;

/// First frame of the first fragment of a message.
pub const BEGIN_FRAGMENT_FLAG: u16 = 1 << 15;

/// First frame of the last fragment of a message.
pub const END_FRAGMENT_FLAG: u16 = 1 << 14;

/// Last frame of a frame set.
pub const IS_FINAL_FLAG: u16 = 1 << 13;

/// Opens a nested data structure.
pub const BEGIN_DATA_STRUCTURE_FLAG: u16 = 1 << 12;

/// Closes a nested data structure.
pub const END_DATA_STRUCTURE_FLAG: u16 = 1 << 11;

/// Represents a null value.
pub const IS_NULL_FLAG: u16 = 1 << 10;

/// Marks the initial frame of an event message.
pub const IS_EVENT_FLAG: u16 = 1 << 9;

/// Marks a request whose response carries a backup-ack count.
pub const BACKUP_AWARE_FLAG: u16 = 1 << 8;

/// Marks a backup event.
pub const BACKUP_EVENT_FLAG: u16 = 1 << 7;

/// Default frame flags (no special flags set).
pub const DEFAULT_FLAGS: u16 = 0;

/// Flags of the initial frame of a message that is sent in one piece.
pub const UNFRAGMENTED_MESSAGE: u16 = BEGIN_FRAGMENT_FLAG | END_FRAGMENT_FLAG;

/// Offset of message type in initial frame content.
pub const TYPE_FIELD_OFFSET: usize = 0;

/// Offset of correlation ID in initial frame content.
pub const CORRELATION_ID_OFFSET: usize = TYPE_FIELD_OFFSET + 4;

/// Offset of partition ID in request and event initial frames.
pub const PARTITION_ID_OFFSET: usize = CORRELATION_ID_OFFSET + 8;

/// Size of the request initial frame header.
pub const REQUEST_HEADER_SIZE: usize = PARTITION_ID_OFFSET + 4;

/// Size of the event initial frame header.
pub const EVENT_HEADER_SIZE: usize = REQUEST_HEADER_SIZE;

/// Offset of backup acks count in response initial frame.
pub const RESPONSE_BACKUP_ACKS_OFFSET: usize = CORRELATION_ID_OFFSET + 8;

/// Size of the response initial frame header.
pub const RESPONSE_HEADER_SIZE: usize = RESPONSE_BACKUP_ACKS_OFFSET + 1;

/// Offset of the fragmentation ID in a fragmentation frame.
pub const FRAGMENTATION_ID_OFFSET: usize = 0;

/// Partition ID indicating no specific partition (-1).
pub const PARTITION_ID_ANY: i32 = -1;

/// Bytes written once by the client after connecting.
pub const CLIENT_PROTOCOL_PREAMBLE: &[u8; 3] = b"CP2";

/// Default maximum size of one frame set on the wire before a message is
/// fragmented.
pub const DEFAULT_MAX_FRAME_SET_SIZE: usize = 4 * 1024 * 1024;

/// Size of a boolean on the wire.
pub const BOOLEAN_SIZE_IN_BYTES: usize = 1;

/// Size of an i32 on the wire.
pub const INT_SIZE_IN_BYTES: usize = 4;

/// Size of an i64 on the wire.
pub const LONG_SIZE_IN_BYTES: usize = 8;

/// Size of a nullable UUID on the wire (null flag + two i64 halves).
pub const UUID_SIZE_IN_BYTES: usize = BOOLEAN_SIZE_IN_BYTES + 2 * LONG_SIZE_IN_BYTES;

// Message types used by the client core.

/// Error response.
pub const ERROR_MESSAGE_TYPE: i32 = 0;

/// Creates a distributed object on the cluster.
pub const CLIENT_CREATE_PROXY: i32 = 0x000400;

/// Destroys a distributed object on the cluster.
pub const CLIENT_DESTROY_PROXY: i32 = 0x000500;

/// Lists the distributed objects known to the cluster.
pub const CLIENT_GET_DISTRIBUTED_OBJECTS: i32 = 0x000800;

/// Heartbeat ping.
pub const CLIENT_PING: i32 = 0x000B00;

/// Creates several distributed objects in one request.
pub const CLIENT_CREATE_PROXIES: i32 = 0x000E00;

/// Returns the response message type paired with a request type.
pub const fn response_type_of(request_type: i32) -> i32 {
    request_type + 1
}

// Server-side error codes the client treats as transient.

/// The caller is not a cluster member.
pub const ERROR_CALLER_NOT_MEMBER: i32 = 8;

/// The member is shutting down.
pub const ERROR_HAZELCAST_INSTANCE_NOT_ACTIVE: i32 = 19;

/// A member left while the operation was running.
pub const ERROR_MEMBER_LEFT: i32 = 33;

/// The targeted partition is migrating.
pub const ERROR_PARTITION_MIGRATING: i32 = 39;

/// Generic retryable failure.
pub const ERROR_RETRYABLE_HAZELCAST: i32 = 46;

/// Retryable I/O failure.
pub const ERROR_RETRYABLE_IO: i32 = 47;

/// The target member disconnected.
pub const ERROR_TARGET_DISCONNECTED: i32 = 52;

/// The target is not a member.
pub const ERROR_TARGET_NOT_MEMBER: i32 = 53;

/// Returns true if the server-side error code denotes a transient failure.
pub fn is_retryable_error_code(code: i32) -> bool {
    matches!(
        code,
        ERROR_CALLER_NOT_MEMBER
            | ERROR_HAZELCAST_INSTANCE_NOT_ACTIVE
            | ERROR_MEMBER_LEFT
            | ERROR_PARTITION_MIGRATING
            | ERROR_RETRYABLE_HAZELCAST
            | ERROR_RETRYABLE_IO
            | ERROR_TARGET_DISCONNECTED
            | ERROR_TARGET_NOT_MEMBER
    )
}

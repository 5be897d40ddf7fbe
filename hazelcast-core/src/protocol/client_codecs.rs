//! Codecs for the client messages the core engine itself sends, and for
//! error responses.
//!
//! Each codec module carries both directions so that test members can be
//! written against the same definitions.

use bytes::BufMut;

use super::builtin::*;
use super::client_message::{ClientMessage, FrameIterator};
use super::constants::*;
use super::frame::Frame;
use crate::error::{HazelcastError, Result};

fn expect_type(message: &ClientMessage, expected: i32) -> Result<()> {
    match message.message_type() {
        Some(actual) if actual == expected => Ok(()),
        actual => Err(HazelcastError::Protocol(format!(
            "expected message type {:#08x}, got {:?}",
            expected, actual
        ))),
    }
}

/// Builds an empty response to a request type, as a member would.
pub fn encode_empty_response(request_type: i32, correlation_id: i64) -> ClientMessage {
    ClientMessage::create_response(response_type_of(request_type), correlation_id, 0)
}

/// `Client.CreateProxy`: creates a distributed object on the cluster.
pub mod client_create_proxy {
    use super::*;

    /// Request message type.
    pub const REQUEST_MESSAGE_TYPE: i32 = CLIENT_CREATE_PROXY;
    /// Response message type.
    pub const RESPONSE_MESSAGE_TYPE: i32 = response_type_of(CLIENT_CREATE_PROXY);

    /// Encodes the request.
    pub fn encode_request(name: &str, service_name: &str) -> ClientMessage {
        let mut message = ClientMessage::create_for_encode_any_partition(REQUEST_MESSAGE_TYPE)
            .with_retryable(false)
            .with_operation_name("Client.CreateProxy");
        encode_string(&mut message, name);
        encode_string(&mut message, service_name);
        message
    }

    /// Decodes a request into `(name, service_name)`.
    pub fn decode_request(message: &ClientMessage) -> Result<(String, String)> {
        expect_type(message, REQUEST_MESSAGE_TYPE)?;
        let mut iter = message.iter();
        iter.next_frame()?;
        let name = decode_string(&mut iter)?;
        let service_name = decode_string(&mut iter)?;
        Ok((name, service_name))
    }

    /// Validates the (empty) response.
    pub fn decode_response(message: &ClientMessage) -> Result<()> {
        expect_type(message, RESPONSE_MESSAGE_TYPE)
    }
}

/// `Client.DestroyProxy`: destroys a distributed object on the cluster.
pub mod client_destroy_proxy {
    use super::*;

    /// Request message type.
    pub const REQUEST_MESSAGE_TYPE: i32 = CLIENT_DESTROY_PROXY;
    /// Response message type.
    pub const RESPONSE_MESSAGE_TYPE: i32 = response_type_of(CLIENT_DESTROY_PROXY);

    /// Encodes the request.
    pub fn encode_request(name: &str, service_name: &str) -> ClientMessage {
        let mut message = ClientMessage::create_for_encode_any_partition(REQUEST_MESSAGE_TYPE)
            .with_retryable(false)
            .with_operation_name("Client.DestroyProxy");
        encode_string(&mut message, name);
        encode_string(&mut message, service_name);
        message
    }

    /// Decodes a request into `(name, service_name)`.
    pub fn decode_request(message: &ClientMessage) -> Result<(String, String)> {
        expect_type(message, REQUEST_MESSAGE_TYPE)?;
        let mut iter = message.iter();
        iter.next_frame()?;
        let name = decode_string(&mut iter)?;
        let service_name = decode_string(&mut iter)?;
        Ok((name, service_name))
    }

    /// Validates the (empty) response.
    pub fn decode_response(message: &ClientMessage) -> Result<()> {
        expect_type(message, RESPONSE_MESSAGE_TYPE)
    }
}

/// `Client.GetDistributedObjects`: lists every distributed object the cluster
/// knows about.
pub mod client_get_distributed_objects {
    use super::*;
    use crate::model::DistributedObjectInfo;

    /// Request message type.
    pub const REQUEST_MESSAGE_TYPE: i32 = CLIENT_GET_DISTRIBUTED_OBJECTS;
    /// Response message type.
    pub const RESPONSE_MESSAGE_TYPE: i32 = response_type_of(CLIENT_GET_DISTRIBUTED_OBJECTS);

    /// Encodes the request.
    pub fn encode_request() -> ClientMessage {
        ClientMessage::create_for_encode_any_partition(REQUEST_MESSAGE_TYPE)
            .with_retryable(false)
            .with_operation_name("Client.GetDistributedObjects")
    }

    /// Encodes a response listing `objects`.
    pub fn encode_response(correlation_id: i64, objects: &[DistributedObjectInfo]) -> ClientMessage {
        let mut message = ClientMessage::create_response(RESPONSE_MESSAGE_TYPE, correlation_id, 0);
        encode_list_multi_frame(&mut message, objects, encode_distributed_object_info);
        message
    }

    /// Decodes the object list.
    pub fn decode_response(message: &ClientMessage) -> Result<Vec<DistributedObjectInfo>> {
        expect_type(message, RESPONSE_MESSAGE_TYPE)?;
        let mut iter = message.iter();
        iter.next_frame()?;
        decode_list_multi_frame(&mut iter, decode_distributed_object_info)
    }
}

/// `Client.CreateProxies`: creates several distributed objects at once.
pub mod client_create_proxies {
    use super::*;

    /// Request message type.
    pub const REQUEST_MESSAGE_TYPE: i32 = CLIENT_CREATE_PROXIES;
    /// Response message type.
    pub const RESPONSE_MESSAGE_TYPE: i32 = response_type_of(CLIENT_CREATE_PROXIES);

    /// Encodes the request from `(name, service_name)` pairs.
    pub fn encode_request(proxies: &[(String, String)]) -> ClientMessage {
        let mut message = ClientMessage::create_for_encode_any_partition(REQUEST_MESSAGE_TYPE)
            .with_retryable(false)
            .with_operation_name("Client.CreateProxies");
        encode_string_entry_list(&mut message, proxies);
        message
    }

    /// Decodes a request into `(name, service_name)` pairs.
    pub fn decode_request(message: &ClientMessage) -> Result<Vec<(String, String)>> {
        expect_type(message, REQUEST_MESSAGE_TYPE)?;
        let mut iter = message.iter();
        iter.next_frame()?;
        decode_string_entry_list(&mut iter)
    }

    /// Validates the (empty) response.
    pub fn decode_response(message: &ClientMessage) -> Result<()> {
        expect_type(message, RESPONSE_MESSAGE_TYPE)
    }
}

/// `Client.Ping`: heartbeat.
pub mod client_ping {
    use super::*;

    /// Request message type.
    pub const REQUEST_MESSAGE_TYPE: i32 = CLIENT_PING;
    /// Response message type.
    pub const RESPONSE_MESSAGE_TYPE: i32 = response_type_of(CLIENT_PING);

    /// Encodes the request.
    pub fn encode_request() -> ClientMessage {
        ClientMessage::create_for_encode_any_partition(REQUEST_MESSAGE_TYPE)
            .with_retryable(true)
            .with_operation_name("Client.Ping")
    }

    /// Validates the (empty) response.
    pub fn decode_response(message: &ClientMessage) -> Result<()> {
        expect_type(message, RESPONSE_MESSAGE_TYPE)
    }
}

/// One server-side exception in an error response. Nested causes follow
/// the first holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorHolder {
    /// Protocol error code.
    pub error_code: i32,
    /// Server-side exception class name.
    pub class_name: String,
    /// Server-side message, if any.
    pub message: Option<String>,
}

impl ErrorHolder {
    /// Creates an error holder.
    pub fn new(error_code: i32, class_name: impl Into<String>, message: Option<String>) -> Self {
        Self {
            error_code,
            class_name: class_name.into(),
            message,
        }
    }

    /// Converts the holder into a [`HazelcastError::Remote`].
    pub fn into_error(self) -> HazelcastError {
        HazelcastError::Remote {
            code: self.error_code,
            retryable: is_retryable_error_code(self.error_code),
            class_name: self.class_name,
            message: self.message.unwrap_or_default(),
        }
    }

    fn encode(message: &mut ClientMessage, holder: &ErrorHolder) {
        message.add_frame(Frame::new_begin_struct_frame());
        let mut initial = Frame::with_capacity(INT_SIZE_IN_BYTES, DEFAULT_FLAGS);
        initial.content.put_i32_le(holder.error_code);
        message.add_frame(initial);
        encode_string(message, &holder.class_name);
        encode_nullable(message, holder.message.as_deref(), encode_string);
        // empty stack trace
        message.add_frame(Frame::new_begin_struct_frame());
        message.add_frame(Frame::new_end_struct_frame());
        message.add_frame(Frame::new_end_struct_frame());
    }

    fn decode(iter: &mut FrameIterator<'_>) -> Result<ErrorHolder> {
        let begin = iter.next_frame()?;
        if !begin.is_begin_struct_frame() {
            return Err(HazelcastError::Protocol(
                "error holder does not start a structure".to_string(),
            ));
        }
        let error_code = iter.next_frame()?.read_i32_at(0).ok_or_else(|| {
            HazelcastError::Protocol("error holder is missing its error code".to_string())
        })?;
        let class_name = decode_string(iter)?;
        let message = decode_nullable(iter, decode_string)?;
        // stack trace elements and newer fields
        iter.skip_to_struct_end()?;
        Ok(ErrorHolder::new(error_code, class_name, message))
    }
}

/// Encodes an error response carrying `holders`.
pub fn encode_error_response(correlation_id: i64, holders: &[ErrorHolder]) -> ClientMessage {
    let mut message = ClientMessage::create_response(ERROR_MESSAGE_TYPE, correlation_id, 0);
    encode_list_multi_frame(&mut message, holders, ErrorHolder::encode);
    message
}

/// Decodes the error holders of an error response.
pub fn decode_error_response(message: &ClientMessage) -> Result<Vec<ErrorHolder>> {
    expect_type(message, ERROR_MESSAGE_TYPE)?;
    let mut iter = message.iter();
    iter.next_frame()?;
    decode_list_multi_frame(&mut iter, ErrorHolder::decode)
}

/// Turns an error response into the error it reports.
pub fn error_from_response(message: &ClientMessage) -> HazelcastError {
    match decode_error_response(message) {
        Ok(holders) => holders.into_iter().next().map(ErrorHolder::into_error).unwrap_or_else(
            || HazelcastError::Protocol("error response without error holders".to_string()),
        ),
        Err(e) => e,
    }
}

#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;

use hazelcast_core::protocol::client_codecs::{
    client_get_distributed_objects, decode_error_response,
};
use hazelcast_core::protocol::ClientMessageCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let mut codec = ClientMessageCodec::with_max_frame_set_size(64);
    let mut buf = BytesMut::from(data);

    while let Ok(Some(msg)) = codec.decode(&mut buf) {
        let _ = msg.message_type();
        let _ = msg.correlation_id();
        let _ = msg.backup_acks();
        let _ = msg.is_event();
        let _ = decode_error_response(&msg);
        let _ = client_get_distributed_objects::decode_response(&msg);

        let mut iter = msg.iter();
        let _ = iter.next_frame();
        let _ = iter.skip_to_struct_end();
    }
});

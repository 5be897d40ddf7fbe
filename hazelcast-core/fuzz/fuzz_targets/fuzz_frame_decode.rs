#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;

use hazelcast_core::protocol::Frame;

fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);

    while let Ok(Some(frame)) = Frame::read_from(&mut buf) {
        let _ = frame.is_begin_fragment();
        let _ = frame.is_end_fragment();
        let _ = frame.is_begin_struct_frame();
        let _ = frame.is_final_frame();
        let _ = frame.read_i32_at(0);
        let _ = frame.read_i64_at(4);
        let _ = frame.read_uuid_at(0);
        assert_eq!(frame.wire_size(), 6 + frame.content.len());
    }
});

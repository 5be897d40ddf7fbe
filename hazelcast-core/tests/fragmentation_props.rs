//! Decoding must not depend on how the byte stream is chunked.

use bytes::BytesMut;
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

use hazelcast_core::protocol::{ClientMessage, ClientMessageCodec, Frame, CLIENT_CREATE_PROXIES};

fn build_message(correlation_id: i64, payloads: &[Vec<u8>]) -> ClientMessage {
    let mut msg = ClientMessage::create_for_encode(CLIENT_CREATE_PROXIES, 3);
    msg.set_correlation_id(correlation_id);
    for payload in payloads {
        msg.add_frame(Frame::new_data_frame(payload));
    }
    msg.finalize();
    msg
}

fn encode_all(messages: &[ClientMessage], max_frame_set_size: usize) -> BytesMut {
    let mut codec = ClientMessageCodec::with_max_frame_set_size(max_frame_set_size);
    let mut buf = BytesMut::new();
    for msg in messages {
        codec.encode(msg.clone(), &mut buf).unwrap();
    }
    buf
}

fn decode_chunked(encoded: &[u8], cuts: &[usize]) -> Vec<ClientMessage> {
    let mut codec = ClientMessageCodec::new();
    let mut buf = BytesMut::new();
    let mut decoded = Vec::new();

    let mut points: Vec<usize> = cuts.iter().map(|c| c % (encoded.len() + 1)).collect();
    points.push(0);
    points.push(encoded.len());
    points.sort_unstable();
    points.dedup();

    for window in points.windows(2) {
        buf.extend_from_slice(&encoded[window[0]..window[1]]);
        while let Some(msg) = codec.decode(&mut buf).unwrap() {
            decoded.push(msg);
        }
    }
    assert!(buf.is_empty());
    decoded
}

fn payloads() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..160), 0..12)
}

proptest! {
    #[test]
    fn prop_chunking_does_not_change_decoded_messages(
        first in payloads(),
        second in payloads(),
        max_frame_set_size in 64usize..512,
        cuts in prop::collection::vec(any::<usize>(), 0..24),
    ) {
        let messages = vec![build_message(1, &first), build_message(2, &second)];
        let encoded = encode_all(&messages, max_frame_set_size);

        let whole = decode_chunked(&encoded, &[]);
        let chunked = decode_chunked(&encoded, &cuts);

        prop_assert_eq!(&whole, &messages);
        prop_assert_eq!(&chunked, &messages);
    }
}

#[test]
fn test_single_byte_chunks_with_fragmentation() {
    let payloads: Vec<Vec<u8>> = (0..8).map(|i| vec![i; 90]).collect();
    let messages = vec![build_message(7, &payloads)];
    let encoded = encode_all(&messages, 128);
    let cuts: Vec<usize> = (1..encoded.len()).collect();

    assert_eq!(decode_chunked(&encoded, &cuts), messages);
}

use proptest::prelude::*;

use super::*;
use crate::transport::FrameCodec;

/// Decodes and reassembles frames in the given order, returning the completed message.
fn reassemble(codec: &FrameCodec, frames: &[Vec<u8>]) -> Option<Message> {
    let mut reassembler = Reassembler::new();
    let mut done = None;
    for frame in frames {
        let view = codec.decode(frame).unwrap();
        if let Some(message) = reassembler.accept(&view).unwrap() {
            assert!(done.is_none(), "message completed twice");
            done = Some(message);
        }
    }
    assert!(reassembler.is_empty());
    done
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// ============================================================================
// Frame Layout Tests
// ============================================================================

#[test]
fn test_profile_sizes() {
    assert_eq!(FrameProfile::TCP.total_size(), 1444);
    assert_eq!(FrameProfile::TCP.body_capacity(), 1430);
    assert_eq!(FrameProfile::TCP.final_byte(), 1442);
    assert_eq!(FrameProfile::UDP.total_size(), 534);
    assert_eq!(FrameProfile::UDP.body_capacity(), 520);
}

#[test]
fn test_custom_profile_bounds() {
    assert!(FrameProfile::custom(14).is_err());
    assert!(FrameProfile::custom(70_000).is_err());
    assert_eq!(FrameProfile::custom(64).unwrap().body_capacity(), 50);
}

#[test]
fn test_whole_frame_header_bytes() {
    let codec = FrameCodec::tcp();
    let frames = codec.encode_request(b"abc", 0x01_02_03, 0x0a0b).unwrap();
    assert_eq!(frames.len(), 1);

    let frame = &frames[0];
    assert_eq!(frame.len(), 1444);
    assert_eq!(&frame[..2], &[1, 0]);
    assert_eq!(&frame[2..5], &[1, 2, 3]);
    assert_eq!(frame[5], FrameKind::Whole as u8);
    assert_eq!(&frame[6..8], &[0x0a, 0x0b]);
    assert_eq!(&frame[8..10], &[0, 1]);
    assert_eq!(&frame[10..12], &[0, 3]);
    assert_eq!(&frame[12..15], b"abc");
    assert_eq!(&frame[1442..], &[0, 1]);
}

#[test]
fn test_empty_payload_is_no_data() {
    let codec = FrameCodec::tcp();
    let frames = codec.encode_request(&[], 200, 40).unwrap();
    assert_eq!(frames.len(), 1);
    let view = codec.decode(&frames[0]).unwrap();
    assert_eq!(view.kind, FrameKind::NoData);
    assert!(view.payload.is_empty());

    let frames = codec.encode_response(&[], 200, 40, None).unwrap();
    assert_eq!(codec.decode(&frames[0]).unwrap().kind, FrameKind::SuccessEmpty);
}

#[test]
fn test_exact_capacity_stays_whole() {
    let codec = FrameCodec::tcp();
    let frames = codec.encode_request(&payload(1430), 300, 50).unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(codec.decode(&frames[0]).unwrap().kind, FrameKind::Whole);

    let frames = codec.encode_request(&payload(1431), 300, 50).unwrap();
    assert_eq!(frames.len(), 2);
}

#[test]
fn test_failure_frame_truncates_message() {
    let codec = FrameCodec::udp();
    let message = "e".repeat(2000);
    let frames = codec
        .encode_response(b"ignored", 7, 120, Some(&message))
        .unwrap();
    assert_eq!(frames.len(), 1);

    let view = codec.decode(&frames[0]).unwrap();
    assert_eq!(view.kind, FrameKind::Failed);
    assert_eq!(view.kind.message_kind(), MessageKind::Failed);
    assert_eq!(view.payload.len(), 520);
}

#[test]
fn test_failure_truncation_respects_utf8() {
    let codec = FrameCodec::udp();
    let message = "é".repeat(400);
    let frames = codec.encode_response(&[], 7, 120, Some(&message)).unwrap();
    let view = codec.decode(&frames[0]).unwrap();
    assert!(std::str::from_utf8(view.payload).is_ok());
    assert!(view.payload.len() <= 520);
}

#[test]
fn test_not_found_frame() {
    let codec = FrameCodec::tcp();
    let frame = codec.encode_not_found(900, 4321);
    let view = codec.decode(&frame).unwrap();
    assert_eq!(view.kind, FrameKind::NotFound);
    assert_eq!(view.payload, builtin::NOT_FOUND_MESSAGE.as_bytes());
}

#[test]
fn test_oversized_payload_is_rejected() {
    let profile = FrameProfile::custom(15).unwrap();
    let codec = FrameCodec::new(profile);
    let result = codec.encode_request(&vec![0u8; profile.max_payload() + 1], 1, 1);
    assert!(matches!(result, Err(MeshError::Encode(_))));
}

// ============================================================================
// Decode Validation Tests
// ============================================================================

#[test]
fn test_decode_rejects_wrong_length() {
    let codec = FrameCodec::tcp();
    let mut frame = codec.encode_request(b"x", 1, 1).unwrap().remove(0);
    frame.push(0);
    assert!(matches!(codec.decode(&frame), Err(MeshError::MalformedFrame(_))));

    let udp_frame = FrameCodec::udp().encode_request(b"x", 1, 1).unwrap().remove(0);
    assert!(matches!(codec.decode(&udp_frame), Err(MeshError::MalformedFrame(_))));
}

#[test]
fn test_decode_rejects_bad_magic() {
    let codec = FrameCodec::tcp();
    let good = codec.encode_request(b"x", 1, 1).unwrap().remove(0);

    let mut bad_prefix = good.clone();
    bad_prefix[1] = 9;
    assert!(matches!(codec.decode(&bad_prefix), Err(MeshError::MalformedFrame(_))));

    let mut bad_suffix = good;
    bad_suffix[1443] = 0;
    assert!(matches!(codec.decode(&bad_suffix), Err(MeshError::MalformedFrame(_))));
}

#[test]
fn test_decode_rejects_bad_fields() {
    let codec = FrameCodec::tcp();
    let good = codec.encode_request(b"x", 1, 1).unwrap().remove(0);

    let mut unknown_kind = good.clone();
    unknown_kind[5] = 9;
    assert!(codec.decode(&unknown_kind).is_err());

    let mut long_length = good.clone();
    long_length[10..12].copy_from_slice(&1431u16.to_be_bytes());
    assert!(codec.decode(&long_length).is_err());

    let mut zero_count = good;
    zero_count[8..10].copy_from_slice(&0u16.to_be_bytes());
    assert!(codec.decode(&zero_count).is_err());

    let frames = codec.encode_request(&payload(5000), 1, 1).unwrap();
    let mut bad_index = frames[1].clone();
    bad_index[10..12].copy_from_slice(&9u16.to_be_bytes());
    assert!(codec.decode(&bad_index).is_err());
}

// ============================================================================
// Chunking Tests
// ============================================================================

#[test]
fn test_3100_byte_payload_uses_three_frames() {
    let codec = FrameCodec::tcp();
    let text = "ünïcødé payload ".repeat(200);
    let bytes = &text.as_bytes()[..3100];
    let frames = codec.encode_request(bytes, 4096, 77).unwrap();
    assert_eq!(frames.len(), 3);

    let views: Vec<_> = frames.iter().map(|f| codec.decode(f).unwrap()).collect();
    assert_eq!(views[0].kind, FrameKind::Start);
    assert_eq!(views[1].kind, FrameKind::Middle);
    assert_eq!(views[2].kind, FrameKind::Final);
    assert!(views.iter().all(|v| v.chunk_count == 3));
    assert_eq!(views[2].payload.len(), 3100 - 2 * 1430);

    let message = reassemble(&codec, &frames).unwrap();
    assert_eq!(message.payload, bytes);
    assert_eq!(message.correlation_id, 4096);
    assert_eq!(message.function_id, 77);
    assert_eq!(message.kind, MessageKind::Request);
}

#[test]
fn test_response_chunks_use_response_kinds() {
    let codec = FrameCodec::udp();
    let frames = codec.encode_response(&payload(1500), 150, 60, None).unwrap();
    let kinds: Vec<_> = frames
        .iter()
        .map(|f| codec.decode(f).unwrap().kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            FrameKind::ResponseStart,
            FrameKind::ResponseMiddle,
            FrameKind::ResponseFinal
        ]
    );
    assert_eq!(reassemble(&codec, &frames).unwrap().kind, MessageKind::Success);
}

#[test]
fn test_duplicate_chunk_is_ignored() {
    let codec = FrameCodec::tcp();
    let data = payload(4000);
    let frames = codec.encode_request(&data, 10, 10).unwrap();
    let mut reassembler = Reassembler::new();

    assert!(reassembler.accept(&codec.decode(&frames[0]).unwrap()).unwrap().is_none());
    assert!(reassembler.accept(&codec.decode(&frames[0]).unwrap()).unwrap().is_none());
    assert_eq!(reassembler.entry(10, false).unwrap().received(), 1);

    assert!(reassembler.accept(&codec.decode(&frames[1]).unwrap()).unwrap().is_none());
    let message = reassembler
        .accept(&codec.decode(&frames[2]).unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(message.payload, data);
}

#[test]
fn test_mismatched_chunk_discards_entry() {
    let codec = FrameCodec::tcp();
    let first = codec.encode_request(&payload(4000), 10, 10).unwrap();
    let other = codec.encode_request(&payload(4000), 10, 11).unwrap();
    let mut reassembler = Reassembler::new();

    reassembler.accept(&codec.decode(&first[0]).unwrap()).unwrap();
    let result = reassembler.accept(&codec.decode(&other[1]).unwrap());
    assert!(matches!(result, Err(MeshError::Reassembly(_))));
    assert!(reassembler.is_empty());
}

#[test]
fn test_requests_and_responses_with_same_id_do_not_mix() {
    let codec = FrameCodec::tcp();
    let request = codec.encode_request(&payload(3000), 500, 90).unwrap();
    let response = codec.encode_response(&vec![1u8; 3000], 500, 90, None).unwrap();
    let mut reassembler = Reassembler::new();

    reassembler.accept(&codec.decode(&request[0]).unwrap()).unwrap();
    reassembler.accept(&codec.decode(&response[0]).unwrap()).unwrap();
    assert_eq!(reassembler.len(), 2);

    reassembler.accept(&codec.decode(&request[1]).unwrap()).unwrap();
    let done = reassembler.accept(&codec.decode(&request[2]).unwrap()).unwrap();
    assert_eq!(done.unwrap().payload, payload(3000));
    assert_eq!(reassembler.len(), 1);
}

#[test]
fn test_missing_chunk_stalls_until_evicted() {
    let codec = FrameCodec::tcp();
    let frames = codec.encode_request(&payload(5000), 3, 3).unwrap();
    let mut reassembler = Reassembler::new();
    for frame in frames.iter().skip(1) {
        assert!(reassembler.accept(&codec.decode(frame).unwrap()).unwrap().is_none());
    }
    assert_eq!(reassembler.len(), 1);
    assert_eq!(reassembler.evict_older_than(std::time::Duration::from_secs(60)), 0);
    assert_eq!(reassembler.evict_older_than(std::time::Duration::ZERO), 1);
    assert!(reassembler.is_empty());
}

#[test]
fn test_recycled_frames_return_to_pool() {
    let codec = FrameCodec::tcp();
    let frames = codec.encode_request(&payload(3000), 1, 1).unwrap();
    codec.recycle(frames);
    assert_eq!(codec.pool().available(), 3);
    assert!(codec.buffer().iter().all(|b| *b == 0));
}

// ============================================================================
// Round-trip Properties
// ============================================================================

fn chunked_payload() -> impl Strategy<Value = Vec<u8>> {
    // 2 to 50 chunks of the UDP profile.
    (521usize..=50 * 520).prop_flat_map(|len| prop::collection::vec(any::<u8>(), len))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_small_payload_round_trips(
        data in prop::collection::vec(any::<u8>(), 0..=520),
        id in 0u32..=frame::MAX_CORRELATION_ID,
        fid in any::<u16>(),
    ) {
        let codec = FrameCodec::udp();
        let frames = codec.encode_request(&data, id, fid).unwrap();
        prop_assert_eq!(frames.len(), 1);
        let message = reassemble(&codec, &frames).unwrap();
        prop_assert_eq!(message.payload, data);
        prop_assert_eq!(message.correlation_id, id);
        prop_assert_eq!(message.function_id, fid);
    }

    #[test]
    fn prop_chunked_payload_round_trips(data in chunked_payload(), id in 100u32..5000, fid in 30u16..=u16::MAX) {
        let codec = FrameCodec::udp();
        let frames = codec.encode_request(&data, id, fid).unwrap();
        prop_assert!(frames.len() >= 2 && frames.len() <= 50);
        let message = reassemble(&codec, &frames).unwrap();
        prop_assert_eq!(message.payload, data);
        prop_assert_eq!(message.correlation_id, id);
        prop_assert_eq!(message.function_id, fid);
    }

    #[test]
    fn prop_reassembly_is_order_independent(
        (data, order) in chunked_payload().prop_flat_map(|data| {
            let count = FrameProfile::UDP.frames_for(data.len());
            (Just(data), Just((0..count).collect::<Vec<_>>()).prop_shuffle())
        })
    ) {
        let codec = FrameCodec::udp();
        let frames = codec.encode_response(&data, 4242, 300, None).unwrap();
        let shuffled: Vec<Vec<u8>> = order.iter().map(|&i| frames[i].clone()).collect();
        let message = reassemble(&codec, &shuffled).unwrap();
        prop_assert_eq!(message.payload, data);
    }
}

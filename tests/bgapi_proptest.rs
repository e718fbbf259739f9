//! Property-based tests for BGAPI framing.
//! However the byte stream is chunked, the same frames come out.

use advmon::ble::bgapi::{Frame, FrameDecoder, FrameKind, Packet};
use proptest::collection::vec;
use proptest::prelude::*;

fn wire(kind: FrameKind, class: u8, method: u8, payload: &[u8]) -> Vec<u8> {
    let ty = match kind {
        FrameKind::Response => 0x20,
        FrameKind::Event => 0xA0,
    };
    let len = payload.len();
    let mut bytes = vec![ty | ((len >> 8) as u8 & 0x07), len as u8, class, method];
    bytes.extend_from_slice(payload);
    bytes
}

fn frame_strategy() -> impl Strategy<Value = Frame> {
    (any::<bool>(), any::<u8>(), any::<u8>(), vec(any::<u8>(), 0..300)).prop_map(
        |(event, class, method, payload)| Frame {
            kind: if event { FrameKind::Event } else { FrameKind::Response },
            class,
            method,
            payload,
        },
    )
}

proptest::proptest! {
    #[test]
    fn chunking_does_not_change_frames(
        frames in vec(frame_strategy(), 1..6),
        chunk in 1usize..64,
    ) {
        let stream: Vec<u8> = frames
            .iter()
            .flat_map(|f| wire(f.kind, f.class, f.method, &f.payload))
            .collect();

        let mut decoder = FrameDecoder::new();
        let mut out = Vec::new();
        for piece in stream.chunks(chunk) {
            decoder.push(piece);
            while let Some(frame) = decoder.next_frame() {
                out.push(frame);
            }
        }
        prop_assert_eq!(out, frames);
        prop_assert_eq!(decoder.pending(), 0);
    }

    /// Parsing arbitrary payloads yields a packet or an error, never a panic.
    #[test]
    fn parse_never_panics(frame in frame_strategy()) {
        let _ = Packet::parse(&frame);
    }
}

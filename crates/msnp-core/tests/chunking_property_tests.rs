//! Property-based tests for chunk splitting and reassembly
//!
//! These tests verify that any body survives a split and reassembly byte for
//! byte, that small bodies are never chunked, and that the reassembler keeps
//! no state once a message completes or fails.

mod test_utils;

use msnp_core::protocol::chunking::{ChunkReassembler, MessageChunker, MAX_CHUNK_PAYLOAD};
use msnp_core::protocol::mime::{MimeMessage, HEADER_CHUNK, HEADER_CHUNKS, HEADER_MESSAGE_ID};
use proptest::prelude::*;
use std::time::Duration;
use test_utils::{text_message, MockTimeSource};

/// Generate text of up to ten chunks, including multi-byte characters
fn arb_text() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9 äöü€😀]{0,5000}").unwrap()
}

fn reassemble_all(chunks: Vec<MimeMessage>) -> Option<MimeMessage> {
    let mut reassembler = ChunkReassembler::new(MockTimeSource::new());
    let mut result = None;
    for chunk in chunks {
        if let Some(message) = reassembler.accept(chunk).expect("in-order chunks are accepted") {
            result = Some(message);
        }
    }
    assert_eq!(reassembler.pending_count(), 0);
    result
}

proptest! {
    /// Property: split then reassemble yields the original body and headers
    #[test]
    fn split_then_reassemble_roundtrip(text in arb_text()) {
        let original = text_message(&text);
        let chunks = MessageChunker::default().split(text_message(&text));

        let expected_chunks = if text.len() <= MAX_CHUNK_PAYLOAD {
            1
        } else {
            text.len().div_ceil(MAX_CHUNK_PAYLOAD)
        };
        prop_assert_eq!(chunks.len(), expected_chunks);

        let rebuilt = reassemble_all(chunks).expect("last chunk completes the message");
        prop_assert_eq!(rebuilt.body(), original.body());
        prop_assert_eq!(rebuilt.headers(), original.headers());
    }

    /// Property: bodies at or below the limit produce one chunk without a message id
    #[test]
    fn small_bodies_are_not_chunked(len in 0usize..=MAX_CHUNK_PAYLOAD) {
        let body = "x".repeat(len);
        let chunks = MessageChunker::default().split(text_message(&body));
        prop_assert_eq!(chunks.len(), 1);
        prop_assert!(chunks[0].header(HEADER_MESSAGE_ID).is_none());
        prop_assert!(chunks[0].header(HEADER_CHUNKS).is_none());
    }

    /// Property: every chunk except the last is exactly the maximum size
    #[test]
    fn chunk_sizes_are_exact(len in (MAX_CHUNK_PAYLOAD + 1)..(MAX_CHUNK_PAYLOAD * 6)) {
        let chunks = MessageChunker::default().split(text_message(&"y".repeat(len)));
        let (last, rest) = chunks.split_last().unwrap();
        for (index, chunk) in rest.iter().enumerate() {
            prop_assert_eq!(chunk.body().len(), MAX_CHUNK_PAYLOAD);
            if index > 0 {
                let expected = index.to_string();
                prop_assert_eq!(chunk.header(HEADER_CHUNK), Some(expected.as_str()));
            }
        }
        prop_assert_eq!(last.body().len(), len - MAX_CHUNK_PAYLOAD * rest.len());
    }

    /// Property: dropping the second chunk is reported and leaves no buffer behind
    #[test]
    fn missing_chunk_is_an_error(len in (MAX_CHUNK_PAYLOAD * 2 + 1)..(MAX_CHUNK_PAYLOAD * 5)) {
        let mut chunks = MessageChunker::default().split(text_message(&"z".repeat(len)));
        chunks.remove(1);

        let mut reassembler = ChunkReassembler::new(MockTimeSource::new());
        let mut failed = false;
        for chunk in chunks {
            match reassembler.accept(chunk) {
                Ok(Some(_)) => prop_assert!(false, "message completed without all chunks"),
                Ok(None) => {}
                Err(err) => {
                    prop_assert!(err.is_chunk_error());
                    failed = true;
                }
            }
        }
        prop_assert!(failed);
        prop_assert_eq!(reassembler.pending_count(), 0);
    }
}

#[test]
fn abandoned_buffers_expire_with_mock_clock() {
    let clock = MockTimeSource::new();
    let mut reassembler = ChunkReassembler::new(clock.clone()).with_expiry(Some(Duration::from_secs(300)));

    let mut chunks = MessageChunker::default().split(text_message(&"q".repeat(3000)));
    assert!(reassembler.accept(chunks.remove(0)).unwrap().is_none());
    assert_eq!(reassembler.pending_count(), 1);

    clock.advance(300_000);
    // The next chunk finds no buffer once the first has expired
    assert!(reassembler.accept(chunks.remove(0)).is_err());
    assert_eq!(reassembler.pending_count(), 0);
}

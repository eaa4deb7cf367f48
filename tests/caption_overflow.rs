//! Caption-overflow policy (spec boundary scenario 1): a chat-sourced
//! envelope with a 6700-character body and media attached must not be
//! squeezed into a single caption. `ChatSender::send` decides this by
//! comparing the body length against `CAPTION_MAX` and, on overflow,
//! falling back to a captionless media send followed by the body
//! chunked at `BODY_MAX`; both thresholds and the chunking algorithm
//! are pure functions, exercised here directly since the delivery leg
//! itself talks to the live Bot API.

use sentinel_router::chunker::chunk;
use sentinel_router::sender::chat::{BODY_MAX, CAPTION_MAX};

#[test]
fn six_thousand_seven_hundred_char_body_overflows_the_caption_limit() {
    let body = "x".repeat(6700);
    assert!(body.len() > CAPTION_MAX, "scenario requires the body to overflow the caption limit");
}

#[test]
fn overflowing_body_splits_into_exactly_two_chunks_that_reconstruct_it() {
    let body = "x".repeat(6700);
    let chunks = chunk(&body, BODY_MAX);
    assert_eq!(chunks.len(), 2, "6700 bytes at a 4096-byte limit must yield exactly two chunks");
    for c in &chunks {
        assert!(!c.is_empty());
        assert!(c.len() <= BODY_MAX);
    }
    assert_eq!(chunks.concat(), body, "chunk boundaries must not drop or duplicate any content");
}

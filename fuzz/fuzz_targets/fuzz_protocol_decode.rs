//! Fuzz the frame decoder with arbitrary byte streams.
//!
//! The decoder must never panic, never over-allocate past the payload cap,
//! and any frame it does accept must re-encode to the bytes it consumed.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

use taskring_rs::net::protocol::{encode, read_message, HEADER_LEN};

fuzz_target!(|data: &[u8]| {
    let mut cursor = Cursor::new(data);
    let mut offset = 0usize;

    while let Ok(Some(msg)) = read_message(&mut cursor) {
        // Accepted frames must round-trip exactly.
        let bytes = encode(&msg);
        let frame_len = HEADER_LEN + msg.payload.len();
        assert_eq!(bytes.len(), frame_len);
        assert_eq!(&bytes[..], &data[offset..offset + frame_len]);
        offset += frame_len;

        let _ = msg.payload_str();
    }
});

//! Fuzz target for pkt-line framing.
//!
//! Arbitrary input must never panic the reader, and every payload that
//! encodes must read back unchanged.

#![no_main]

use gitway_git::{encode_line, PktLine, PktLineReader};
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let mut reader = PktLineReader::new(Cursor::new(data));

    // Bounded so crafted input cannot loop forever.
    for _ in 0..100 {
        match reader.read() {
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => break,
        }
    }

    if let Ok(encoded) = encode_line(data) {
        let mut reader = PktLineReader::new(Cursor::new(encoded));
        match reader.read() {
            Ok(Some(PktLine::Data(payload))) => assert_eq!(payload, data),
            // A payload of exactly "" encodes as "0004", never as a flush.
            other => panic!("encoded line did not read back: {other:?}"),
        }
    }
});

//! Fuzz entry points for lorapic-core decoders and extractors
//!
//! To use with cargo-fuzz:
//! 1. Install cargo-fuzz: cargo install cargo-fuzz
//! 2. Run fuzzer: cargo fuzz run fuzz_inbound

use bytes::Bytes;

/// Classify and decode one radio frame, in both receiver states
pub fn fuzz_inbound(data: &[u8]) {
    use lorapic_core::decoder::{classify_inbound, decode_inbound, decode_miss};

    // Should never panic
    let frame = Bytes::copy_from_slice(data);
    let _ = decode_inbound(frame.clone(), true);
    let _ = decode_inbound(frame.clone(), false);
    let _ = classify_inbound(frame.clone(), None);
    let _ = classify_inbound(frame, Some(20_000));
    let _ = decode_miss(data);
}

/// Feed modem output through both extractors one line at a time
pub fn fuzz_scan(data: &[u8]) {
    use lorapic_core::scanner::{HexPayloadScanner, LineExtractor};

    let mut scanner = HexPayloadScanner::new();
    let mut lines = LineExtractor::new();
    for piece in data.split_inclusive(|b| *b == b'\n') {
        scanner.push(piece);
        lines.push(piece);
        while scanner.next_payload().is_some() {}
        while lines.next_line().is_some() {}
    }
    scanner.flush();
    while scanner.next_payload().is_some() {}
}

/// Accept arbitrary chunk frames into a session sized by the first four bytes
pub fn fuzz_reassembly(data: &[u8]) {
    use lorapic_core::{decoder::decode_chunk, reassembly::ReassemblyBuffer, TransferHeader};

    if data.len() < 4 {
        return;
    }
    let total = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) % 20_000;

    let mut buffer = ReassemblyBuffer::new(200);
    if buffer.begin_session(TransferHeader::new(total, 0, 0)).is_err() {
        return;
    }
    for frame in data[4..].chunks(13) {
        if let Ok(chunk) = decode_chunk(Bytes::copy_from_slice(frame)) {
            let _ = buffer.accept_chunk(chunk.seq, chunk.payload);
        }
    }
    let _ = buffer.missing_indices();
    let _ = buffer.assemble();
}

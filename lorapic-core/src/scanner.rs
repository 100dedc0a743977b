//! Frame extraction from the modem's fragmented text output
//!
//! Two incremental extractors share one shape: bytes are pushed in whatever
//! pieces the transport delivers, complete units are pulled out, and nothing
//! partial is ever yielded.
//!
//! - [`LineExtractor`] splits the stream into CRLF-terminated response lines.
//! - [`HexPayloadScanner`] finds `RX "<hex>"` segments, concatenates the
//!   segments of one line and hex-decodes them into raw frame bytes.

use crate::constants::{CRLF, MAX_HEX_LINE, MAX_LINE_LEN, RX_CLOSE, RX_TAG};
use crate::error::LinkError;
use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

/// Splits a byte stream into CRLF-terminated lines
#[derive(Debug, Default)]
pub struct LineExtractor {
    buf: BytesMut,
    /// Offset up to which `buf` is known to hold no terminator
    searched: usize,
}

impl LineExtractor {
    /// Create an empty extractor
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes from one physical read
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete line without its terminator, if one is buffered
    pub fn next_line(&mut self) -> Option<Bytes> {
        // A terminator may straddle the previous push, so back up one byte
        let from = self.searched.saturating_sub(CRLF.len() - 1);

        match memchr::memmem::find(&self.buf[from..], CRLF) {
            Some(rel) => {
                let end = from + rel;
                let line = self.buf.split_to(end).freeze();
                self.buf.advance(CRLF.len());
                self.searched = 0;
                Some(line)
            }
            None => {
                self.searched = self.buf.len();
                if self.buf.len() > MAX_LINE_LEN {
                    #[cfg(feature = "logging")]
                    warn!(
                        "Discarding {} bytes of unterminated modem output",
                        self.buf.len()
                    );
                    self.buf.clear();
                    self.searched = 0;
                }
                None
            }
        }
    }

    /// Bytes buffered but not yet terminated
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partial line
    pub fn clear(&mut self) {
        self.buf.clear();
        self.searched = 0;
    }
}

impl Iterator for LineExtractor {
    type Item = Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_line()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Looking for the `RX "` tag or the end of the line
    Searching,
    /// Inside a quoted segment, looking for the closing quote
    Collecting,
}

/// Extracts hex payloads tagged `RX "..."` from the modem's output.
///
/// A payload may arrive split over any number of pushes. Every segment that
/// closes on the same line is concatenated, and the whole line becomes one
/// frame once its line feed arrives (or on [`flush`](Self::flush)).
#[derive(Debug)]
pub struct HexPayloadScanner {
    buf: BytesMut,
    state: ScanState,
    /// Hex text of the segment being collected
    segment: Vec<u8>,
    /// Hex text of closed segments on the current line
    line_hex: Vec<u8>,
    ready: VecDeque<Result<Bytes, LinkError>>,
    stats: ScanStats,
}

impl Default for HexPayloadScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl HexPayloadScanner {
    /// Create an empty scanner
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            state: ScanState::Searching,
            segment: Vec::new(),
            line_hex: Vec::new(),
            ready: VecDeque::new(),
            stats: ScanStats::default(),
        }
    }

    /// Append bytes from one physical read and scan them
    pub fn push(&mut self, data: &[u8]) {
        self.stats.bytes_scanned += data.len();
        self.buf.extend_from_slice(data);
        self.scan();
    }

    /// Next decoded payload. Segments that were not valid hex surface as
    /// `Err(InvalidHex)` so the caller can log and drop them.
    pub fn next_payload(&mut self) -> Option<Result<Bytes, LinkError>> {
        self.ready.pop_front()
    }

    /// Emit closed segments of an unterminated line as a payload
    pub fn flush(&mut self) {
        self.finish_line();
    }

    /// Counters accumulated since creation
    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    /// Whether a quoted segment is open
    pub fn is_collecting(&self) -> bool {
        self.state == ScanState::Collecting
    }

    fn scan(&mut self) {
        loop {
            match self.state {
                ScanState::Searching => {
                    let tag = memchr::memmem::find(&self.buf, RX_TAG);
                    let newline = memchr::memchr(b'\n', &self.buf);

                    match (tag, newline) {
                        (Some(t), Some(n)) if n < t => self.end_of_line(n),
                        (None, Some(n)) => self.end_of_line(n),
                        (Some(t), _) => {
                            self.stats.tags_found += 1;
                            self.buf.advance(t + RX_TAG.len());
                            self.state = ScanState::Collecting;
                        }
                        (None, None) => {
                            // Keep a possible partial tag at the tail
                            let keep = std::cmp::min(self.buf.len(), RX_TAG.len() - 1);
                            let drop = self.buf.len() - keep;
                            self.buf.advance(drop);
                            return;
                        }
                    }
                }
                ScanState::Collecting => {
                    let quote = memchr::memchr(RX_CLOSE, &self.buf);
                    let newline = memchr::memchr(b'\n', &self.buf);

                    match (quote, newline) {
                        (Some(q), Some(n)) if n < q => {
                            // Quote never closed on this line
                            self.abandon_segment();
                            self.end_of_line(n);
                        }
                        (Some(q), _) => {
                            self.segment.extend_from_slice(&self.buf[..q]);
                            self.buf.advance(q + 1);
                            self.close_segment();
                            self.state = ScanState::Searching;
                        }
                        (None, Some(n)) => {
                            self.abandon_segment();
                            self.end_of_line(n);
                        }
                        (None, None) => {
                            self.segment.extend_from_slice(&self.buf);
                            self.buf.clear();
                            if self.segment.len() > MAX_HEX_LINE {
                                self.abandon_segment();
                            }
                            return;
                        }
                    }
                }
            }
        }
    }

    fn end_of_line(&mut self, newline: usize) {
        self.buf.advance(newline + 1);
        self.finish_line();
    }

    fn close_segment(&mut self) {
        let segment = std::mem::take(&mut self.segment);
        // Modems differ on whitespace inside the quotes
        self.line_hex
            .extend(segment.into_iter().filter(|b| !b.is_ascii_whitespace()));

        if self.line_hex.len() > MAX_HEX_LINE {
            self.abandon_segment();
        }
    }

    fn abandon_segment(&mut self) {
        #[cfg(feature = "logging")]
        warn!(
            "Dropping unterminated or oversized hex payload ({} characters)",
            self.segment.len() + self.line_hex.len()
        );
        self.stats.decode_failures += 1;
        self.segment.clear();
        self.line_hex.clear();
        self.state = ScanState::Searching;
    }

    fn finish_line(&mut self) {
        if self.line_hex.is_empty() {
            return;
        }

        let hex_text = std::mem::take(&mut self.line_hex);
        match hex::decode(&hex_text) {
            Ok(bytes) => {
                #[cfg(feature = "logging")]
                trace!("Extracted {} byte payload", bytes.len());

                self.stats.payloads_found += 1;
                self.stats.bytes_recovered += bytes.len();
                self.ready.push_back(Ok(Bytes::from(bytes)));
            }
            Err(e) => {
                #[cfg(feature = "logging")]
                debug!("Rejected hex payload: {}", e);

                self.stats.decode_failures += 1;
                self.ready.push_back(Err(e.into()));
            }
        }
    }
}

/// Scan statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Total bytes scanned
    pub bytes_scanned: usize,

    /// Number of `RX "` tags found
    pub tags_found: usize,

    /// Number of payloads emitted
    pub payloads_found: usize,

    /// Number of payloads rejected as invalid or oversized
    pub decode_failures: usize,

    /// Total decoded payload bytes
    pub bytes_recovered: usize,
}

impl ScanStats {
    /// Share of emitted payloads among all attempted payloads, as a percentage
    pub fn success_rate(&self) -> f64 {
        let attempts = self.payloads_found + self.decode_failures;
        if attempts == 0 {
            0.0
        } else {
            (self.payloads_found as f64 / attempts as f64) * 100.0
        }
    }
}

/// Scan a complete capture of modem output for tagged hex payloads
///
/// Invalid payloads are skipped; the returned statistics count them.
pub fn scan_capture(data: &[u8]) -> (Vec<Bytes>, ScanStats) {
    let mut scanner = HexPayloadScanner::new();
    scanner.push(data);
    scanner.flush();

    let mut payloads = Vec::new();
    while let Some(item) = scanner.next_payload() {
        if let Ok(payload) = item {
            payloads.push(payload);
        }
    }

    #[cfg(feature = "logging")]
    debug!(
        "Scan complete: found {} payloads in {} bytes",
        payloads.len(),
        data.len()
    );

    (payloads, scanner.stats().clone())
}

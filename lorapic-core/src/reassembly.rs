//! Reassembly of chunked transfers
//!
//! A [`ReassemblyBuffer`] owns at most one [`TransferSession`]. Chunks may
//! arrive in any order and any number of times; the first copy of each index
//! wins and the payload is rebuilt by index order once every chunk is present.
//! Every chunk carries exactly `chunk_size` bytes except the last, which
//! carries the remainder.

use crate::error::LinkError;
use crate::types::TransferHeader;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::{BTreeMap, BTreeSet};
use tokio::time::Instant;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// State of one reception attempt
#[derive(Debug, Clone)]
pub struct TransferSession {
    header: TransferHeader,
    chunk_size: u32,
    num_expected: u32,
    received: BTreeMap<u16, Bytes>,
    bytes_received: u64,
    started: Instant,
    last_activity: Instant,
}

impl TransferSession {
    fn new(header: TransferHeader, chunk_size: u32) -> Self {
        let now = Instant::now();
        Self {
            header,
            chunk_size,
            num_expected: header.num_chunks(chunk_size),
            received: BTreeMap::new(),
            bytes_received: 0,
            started: now,
            last_activity: now,
        }
    }

    /// Header that opened this session
    pub fn header(&self) -> &TransferHeader {
        &self.header
    }

    /// Number of chunks the header implies
    pub fn num_expected(&self) -> u32 {
        self.num_expected
    }

    /// Number of distinct chunks stored
    pub fn num_received(&self) -> usize {
        self.received.len()
    }

    /// Sum of stored payload lengths
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// When the header was accepted
    pub fn started(&self) -> Instant {
        self.started
    }

    /// Last time a chunk was stored or a retransmission was requested
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Payload length chunk `seq` must carry
    pub fn expected_len(&self, seq: u16) -> usize {
        let start = seq as u64 * self.chunk_size as u64;
        let remaining = (self.header.total_bytes as u64).saturating_sub(start);
        remaining.min(self.chunk_size as u64) as usize
    }
}

/// Per-transfer reassembly state with gap detection
#[derive(Debug, Clone)]
pub struct ReassemblyBuffer {
    chunk_size: u32,
    session: Option<TransferSession>,
}

impl ReassemblyBuffer {
    /// Create an empty buffer for a deployment's chunk size
    pub fn new(chunk_size: u32) -> Self {
        Self {
            chunk_size,
            session: None,
        }
    }

    /// Chunk size this buffer splits headers by
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// The active session, if a header has been accepted
    pub fn session(&self) -> Option<&TransferSession> {
        self.session.as_ref()
    }

    /// Whether a header has been accepted
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Start a session for `header`
    ///
    /// A session that has already stored chunks is never replaced; the header
    /// is rejected with `DuplicateHeader`. An active session with no chunks
    /// yet is replaced.
    pub fn begin_session(&mut self, header: TransferHeader) -> Result<(), LinkError> {
        if let Some(session) = &self.session {
            if !session.received.is_empty() {
                return Err(LinkError::DuplicateHeader);
            }
        }

        header.validate(self.chunk_size)?;

        #[cfg(feature = "logging")]
        debug!(
            total_bytes = header.total_bytes,
            width = header.width,
            height = header.height,
            chunks = header.num_chunks(self.chunk_size),
            "Transfer session started"
        );

        self.session = Some(TransferSession::new(header, self.chunk_size));
        Ok(())
    }

    /// Store chunk `seq`
    ///
    /// Out-of-range, duplicate and wrong-length chunks leave the session
    /// untouched and are reported as errors the caller may log and ignore.
    pub fn accept_chunk(&mut self, seq: u16, payload: Bytes) -> Result<(), LinkError> {
        let session = self.session.as_mut().ok_or(LinkError::NoActiveSession)?;

        if seq as u32 >= session.num_expected {
            return Err(LinkError::OutOfRangeSequence {
                seq,
                expected: session.num_expected,
            });
        }

        if session.received.contains_key(&seq) {
            return Err(LinkError::DuplicateChunk(seq));
        }

        let expected = session.expected_len(seq);
        if payload.len() != expected {
            return Err(LinkError::ChunkLengthMismatch {
                seq,
                expected,
                actual: payload.len(),
            });
        }

        #[cfg(feature = "logging")]
        trace!(seq, len = payload.len(), "Chunk stored");

        session.bytes_received += payload.len() as u64;
        session.received.insert(seq, payload);
        session.last_activity = Instant::now();
        Ok(())
    }

    /// Indices not yet received, in ascending order
    pub fn missing_indices(&self) -> BTreeSet<u16> {
        match &self.session {
            Some(session) => (0..session.num_expected)
                .map(|i| i as u16)
                .filter(|seq| !session.received.contains_key(seq))
                .collect(),
            None => BTreeSet::new(),
        }
    }

    /// Whether every expected chunk is stored
    pub fn is_complete(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.received.len() as u32 == s.num_expected)
    }

    /// Highest index below which nothing is missing, or -1
    pub fn last_contiguous_seq(&self) -> i32 {
        let Some(session) = &self.session else {
            return -1;
        };

        let mut last = -1i32;
        for &seq in session.received.keys() {
            if seq as i32 != last + 1 {
                break;
            }
            last = seq as i32;
        }
        last
    }

    /// Concatenate the stored chunks in index order
    pub fn assemble(&self) -> Result<Bytes, LinkError> {
        let session = self.session.as_ref().ok_or(LinkError::NoActiveSession)?;

        let missing = session.num_expected as usize - session.received.len();
        if missing > 0 {
            return Err(LinkError::IncompleteTransfer { missing });
        }

        if session.bytes_received != session.header.total_bytes as u64 {
            return Err(LinkError::LengthMismatch {
                expected: session.header.total_bytes,
                actual: session.bytes_received,
            });
        }

        let mut buf = BytesMut::with_capacity(session.header.total_bytes as usize);
        for payload in session.received.values() {
            buf.put_slice(payload);
        }

        Ok(buf.freeze())
    }

    /// Mark the session as active now
    pub fn touch(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.last_activity = Instant::now();
        }
    }

    /// Discard the session
    pub fn reset(&mut self) {
        self.session = None;
    }
}

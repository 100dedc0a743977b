//! Core types carried by lorapic frames

use crate::constants::{HEADER_SIZE, MAX_CHUNKS, MISS_FIXED_SIZE, SEQ_SIZE};
use crate::error::LinkError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Transfer header announcing a payload and its image metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferHeader {
    /// Length of the complete payload in bytes
    pub total_bytes: u32,

    /// Image width in pixels (metadata only)
    pub width: u32,

    /// Image height in pixels (metadata only)
    pub height: u32,
}

impl TransferHeader {
    /// Create a new transfer header
    pub fn new(total_bytes: u32, width: u32, height: u32) -> Self {
        Self {
            total_bytes,
            width,
            height,
        }
    }

    /// Number of chunks the sender will emit for `chunk_size` byte chunks
    pub fn num_chunks(&self, chunk_size: u32) -> u32 {
        if chunk_size == 0 {
            return 0;
        }
        self.total_bytes.div_ceil(chunk_size)
    }

    /// Validate the header against the chunk size in use
    pub fn validate(&self, chunk_size: u32) -> Result<(), LinkError> {
        if self.total_bytes == 0 {
            return Err(LinkError::EmptyTransfer);
        }

        let chunks = self.num_chunks(chunk_size);
        if chunk_size == 0 || chunks > MAX_CHUNKS {
            return Err(LinkError::TransferTooLarge(chunks as u64));
        }

        Ok(())
    }

    /// Size of the encoded header
    pub const fn encoded_len(&self) -> usize {
        HEADER_SIZE
    }
}

/// One fragment of the payload, tagged with its sequence index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    /// Position of this chunk in the payload
    pub seq: u16,

    /// Chunk bytes
    pub payload: Bytes,
}

impl ChunkFrame {
    /// Create a new chunk frame
    pub fn new(seq: u16, payload: Bytes) -> Self {
        Self { seq, payload }
    }

    /// Size of the encoded chunk frame
    pub fn encoded_len(&self) -> usize {
        SEQ_SIZE + self.payload.len()
    }
}

/// Control frame listing chunks the receiver still lacks.
///
/// An empty index list acknowledges a completed transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MissFrame {
    /// Missing sequence indices, in request order
    pub indices: Vec<u16>,
}

impl MissFrame {
    /// Create a MISS frame for the given indices
    pub fn new(indices: Vec<u16>) -> Self {
        Self { indices }
    }

    /// The empty MISS frame that signals a completed transfer
    pub fn ack() -> Self {
        Self::default()
    }

    /// Whether this frame is the completion acknowledgment
    pub fn is_ack(&self) -> bool {
        self.indices.is_empty()
    }

    /// Size of the encoded MISS frame
    pub fn encoded_len(&self) -> usize {
        MISS_FIXED_SIZE + SEQ_SIZE * self.indices.len()
    }
}

/// Side-channel coordinate update
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude in decimal degrees
    pub latitude: f64,

    /// Longitude in decimal degrees
    pub longitude: f64,
}

impl Position {
    /// Create a new position
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A decoded inbound frame, classified by its leading bytes
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Transfer header; `rest` holds any bytes that followed it in the same frame
    Header {
        /// The decoded header
        header: TransferHeader,
        /// Trailing bytes, treated as the first chunk frame when non-empty
        rest: Bytes,
    },

    /// Coordinate update
    Position(Position),

    /// Data chunk
    Chunk(ChunkFrame),
}

/// Assembled payload handed to the sink once a transfer completes
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedTransfer {
    /// Header that announced the transfer
    pub header: TransferHeader,

    /// Reassembled payload, exactly `header.total_bytes` long
    pub data: Bytes,

    /// Statistics gathered while receiving
    pub stats: crate::session::TransferStats,
}

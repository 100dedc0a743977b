//! Error types for lorapic operations

/// Errors that can occur while decoding frames, reassembling a transfer or
/// driving the modem
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    /// Header magic did not match
    #[error("Invalid preamble: expected LORA, got {0:?}")]
    InvalidPreamble([u8; 4]),

    /// Incomplete frame - not enough data
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    IncompleteFrame {
        /// The number of bytes expected.
        expected: usize,
        /// The number of bytes actually found.
        actual: usize,
    },

    /// Frame exceeds what the radio can carry
    #[error("Frame size {0} exceeds maximum {1}")]
    FrameTooLarge(usize, usize),

    /// Chunk frame too short to carry a sequence index and payload
    #[error("Malformed chunk frame of {0} bytes")]
    MalformedFrame(usize),

    /// MISS frame whose declared count disagrees with its length
    #[error("MISS frame declares {declared} indices but carries {actual}")]
    MissCountMismatch {
        /// Count found in the frame.
        declared: u16,
        /// Indices that actually fit in the remaining bytes.
        actual: usize,
    },

    /// Tagged payload was not valid hexadecimal
    #[error("Invalid hex payload: {0}")]
    InvalidHex(String),

    /// Position frame could not be parsed
    #[error("Invalid position frame: {0}")]
    InvalidPosition(String),

    /// Chunk index beyond the declared chunk count
    #[error("Sequence {seq} out of range, expected < {expected}")]
    OutOfRangeSequence {
        /// The offending index.
        seq: u16,
        /// Number of chunks in the transfer.
        expected: u32,
    },

    /// Chunk payload length disagrees with its position in the transfer
    #[error("Chunk {seq} carries {actual} bytes, expected {expected}")]
    ChunkLengthMismatch {
        /// The offending index.
        seq: u16,
        /// Length implied by the header and chunk size.
        expected: usize,
        /// Length received.
        actual: usize,
    },

    /// Chunk index already stored
    #[error("Duplicate chunk {0}")]
    DuplicateChunk(u16),

    /// Header received while a non-empty session is active
    #[error("Header received while a transfer is in progress")]
    DuplicateHeader,

    /// Chunk or query without a header
    #[error("No active transfer session")]
    NoActiveSession,

    /// Header declared zero bytes
    #[error("Header declares an empty transfer")]
    EmptyTransfer,

    /// Header declared more chunks than sequence indices can address
    #[error("Transfer of {0} chunks exceeds the addressable maximum")]
    TransferTooLarge(u64),

    /// Assemble requested before every chunk arrived
    #[error("Transfer incomplete: {missing} chunks missing")]
    IncompleteTransfer {
        /// Number of chunks still absent.
        missing: usize,
    },

    /// Assembled chunks do not add up to the declared size
    #[error("Assembled {actual} bytes, header declared {expected}")]
    LengthMismatch {
        /// Declared size.
        expected: u32,
        /// Sum of stored payloads.
        actual: u64,
    },

    /// Modem answered a command with an error marker
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// Inbound stream ended
    #[error("Transport closed")]
    TransportClosed,

    /// Retransmission rounds exhausted
    #[error("Gave up after {0} retransmission rounds")]
    RetransmitLimit(u32),

    /// Configuration value outside its valid range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error during read/write
    #[error("IO error: {0}")]
    Io(String),
}

impl LinkError {
    /// Errors confined to a single inbound frame. The receive loop logs and
    /// drops the frame, then keeps going.
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            LinkError::InvalidPreamble(_)
                | LinkError::IncompleteFrame { .. }
                | LinkError::FrameTooLarge(..)
                | LinkError::MalformedFrame(_)
                | LinkError::MissCountMismatch { .. }
                | LinkError::InvalidHex(_)
                | LinkError::InvalidPosition(_)
                | LinkError::OutOfRangeSequence { .. }
                | LinkError::ChunkLengthMismatch { .. }
                | LinkError::DuplicateChunk(_)
                | LinkError::DuplicateHeader
                | LinkError::NoActiveSession
                | LinkError::EmptyTransfer
                | LinkError::TransferTooLarge(_)
        )
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return LinkError::TransportClosed;
        }
        LinkError::Io(err.to_string())
    }
}

impl From<hex::FromHexError> for LinkError {
    fn from(err: hex::FromHexError) -> Self {
        LinkError::InvalidHex(err.to_string())
    }
}

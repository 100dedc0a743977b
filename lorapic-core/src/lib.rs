//! # Lorapic Core
//!
//! Reliable chunked payload transfer over a LoRa modem driven in packet-test mode.
//!
//! The modem delivers received packets as hex text inside quoted `RX "..."`
//! lines and has no acknowledgment or retransmission of its own. This crate
//! layers a small transfer protocol on top: a header announcing the payload,
//! sequenced chunks, and MISS frames requesting what was lost.
//!
//! ## Modules
//!
//! - `constants`: Wire format constants, timings and modem command text
//! - `types`: Core types (TransferHeader, ChunkFrame, MissFrame, Position)
//! - `error`: The `LinkError` taxonomy
//! - `encoder`: Frame encoding and the sender-side `Packetizer`
//! - `decoder`: Strict frame decoding and inbound classification
//! - `scanner`: Line and tagged-hex extraction from fragmented modem output
//! - `reassembly`: Per-transfer chunk storage with gap detection
//! - `scheduler`: Retransmission triggers, MISS batching and acknowledgment backoff
//! - `config`: Receiver timing and modem radio configuration
//! - `link`: AT command exchange and inbound payload delivery
//! - `session`: The receiver state machine

#![warn(missing_docs)]

pub mod config;
pub mod constants;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod link;
pub mod reassembly;
pub mod scanner;
pub mod scheduler;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use config::{ReceiverConfig, RfConfig};
pub use encoder::Packetizer;
pub use error::LinkError;
pub use link::{Command, ModemLink, ReadOutcome};
pub use reassembly::ReassemblyBuffer;
pub use session::{Receiver, State, TransferSink, TransferStats};
pub use types::{ChunkFrame, CompletedTransfer, InboundFrame, MissFrame, Position, TransferHeader};

/// Result type alias for lorapic operations
pub type Result<T> = std::result::Result<T, LinkError>;

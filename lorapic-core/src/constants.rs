//! Constants and limits for the lorapic wire protocol and modem command surface

use std::time::Duration;

/// Magic that opens a transfer header frame
pub const HEADER_MAGIC: &[u8; 4] = b"LORA";

/// Magic that opens a side-channel position frame
pub const POSITION_MAGIC: &[u8; 4] = b"CORD";

/// Magic that opens a MISS control frame
pub const MISS_MAGIC: &[u8; 4] = b"MISS";

/// Size of the transfer header frame (magic + total bytes + width + height)
/// 4 (magic) + 4 (total_bytes) + 4 (width) + 4 (height) = 16 bytes
pub const HEADER_SIZE: usize = 16;

/// Size of the sequence index that prefixes every data chunk
pub const SEQ_SIZE: usize = 2;

/// Smallest well-formed chunk frame: a sequence index plus one payload byte
pub const MIN_CHUNK_FRAME_SIZE: usize = SEQ_SIZE + 1;

/// Size of the fixed part of a MISS frame (magic + count)
pub const MISS_FIXED_SIZE: usize = 6;

/// Default payload bytes per chunk. Must match the sender.
pub const DEFAULT_CHUNK_SIZE: u32 = 200;

/// Largest packet the radio accepts in packet-test mode
pub const MAX_RADIO_FRAME: usize = 255;

/// Maximum number of indices carried by one MISS frame
pub const MISS_BATCH_SIZE: usize = 10;

/// Largest number of chunks a transfer can declare (sequence indices are u16)
pub const MAX_CHUNKS: u32 = u16::MAX as u32 + 1;

/// Read inactivity after which missing chunks are requested again
pub const RETRANSMISSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Settling time for the modem to switch between receive and transmit
pub const RX_SWITCH_DELAY: Duration = Duration::from_millis(500);

/// Pause between consecutive MISS frames of one retransmission round
pub const MISS_INTERVAL: Duration = Duration::from_millis(100);

/// Number of empty MISS acknowledgments sent after a completed transfer
pub const ACK_REPEATS: u32 = 3;

/// First acknowledgment backoff; doubles after every repeat
pub const ACK_BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Tag that introduces a received hex payload in the modem's output
pub const RX_TAG: &[u8; 4] = b"RX \"";

/// Closing delimiter of a received hex payload
pub const RX_CLOSE: u8 = b'"';

/// Line terminator of the modem's responses
pub const CRLF: &[u8; 2] = b"\r\n";

/// Upper bound on buffered hex text for a single line of modem output.
/// Two hex characters per byte, several radio frames worth of slack.
pub const MAX_HEX_LINE: usize = 8 * 2 * MAX_RADIO_FRAME;

/// Upper bound on a buffered, unterminated response line
pub const MAX_LINE_LEN: usize = 2 * MAX_HEX_LINE;

/// Command that switches the modem into continuous packet reception
pub const AT_RXLRPKT: &str = "AT+TEST=RXLRPKT";

/// Prefix of the command that transmits one packet
pub const AT_TXLRPKT: &str = "AT+TEST=TXLRPKT";

/// Marker the modem prints once a transmission has left the radio
pub const TX_DONE_MARKER: &str = "TX DONE";

/// Marker that turns any command response into a hard failure
pub const ERROR_MARKER: &str = "ERROR";

/// Longest wait for the modem to answer a command
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Size of a single read from the inbound stream
pub const READ_CHUNK: usize = 1024;

//! Frame decoding (strict mode)

use crate::constants::{
    HEADER_MAGIC, HEADER_SIZE, MIN_CHUNK_FRAME_SIZE, MISS_FIXED_SIZE, MISS_MAGIC, POSITION_MAGIC,
    SEQ_SIZE,
};
use crate::error::LinkError;
use crate::types::{ChunkFrame, InboundFrame, MissFrame, Position, TransferHeader};
use bytes::{Buf, Bytes};

/// Decode a transfer header from the first 16 bytes of `data`
///
/// This function performs strict validation:
/// - Validates length
/// - Validates magic ("LORA")
///
/// Bytes past the header are ignored; see [`decode_inbound`] for the
/// header-plus-first-chunk form.
pub fn decode_header(data: &[u8]) -> Result<TransferHeader, LinkError> {
    if data.len() < HEADER_SIZE {
        return Err(LinkError::IncompleteFrame {
            expected: HEADER_SIZE,
            actual: data.len(),
        });
    }

    let mut buf = &data[..HEADER_SIZE];

    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);
    if &magic != HEADER_MAGIC {
        return Err(LinkError::InvalidPreamble(magic));
    }

    let total_bytes = buf.get_u32();
    let width = buf.get_u32();
    let height = buf.get_u32();

    Ok(TransferHeader::new(total_bytes, width, height))
}

/// Decode a data chunk without copying its payload
///
/// Frames shorter than a sequence index plus one byte are malformed.
pub fn decode_chunk(data: Bytes) -> Result<ChunkFrame, LinkError> {
    if data.len() < MIN_CHUNK_FRAME_SIZE {
        return Err(LinkError::MalformedFrame(data.len()));
    }

    let seq = u16::from_be_bytes([data[0], data[1]]);
    let payload = data.slice(SEQ_SIZE..);

    Ok(ChunkFrame::new(seq, payload))
}

/// Decode a MISS frame
///
/// The declared count must match the number of indices that follow it.
pub fn decode_miss(data: &[u8]) -> Result<MissFrame, LinkError> {
    if data.len() < MISS_FIXED_SIZE {
        return Err(LinkError::IncompleteFrame {
            expected: MISS_FIXED_SIZE,
            actual: data.len(),
        });
    }

    if &data[0..4] != MISS_MAGIC {
        let mut bad = [0u8; 4];
        bad.copy_from_slice(&data[0..4]);
        return Err(LinkError::InvalidPreamble(bad));
    }

    let declared = u16::from_be_bytes([data[4], data[5]]);
    let body = &data[MISS_FIXED_SIZE..];
    if body.len() % SEQ_SIZE != 0 || body.len() / SEQ_SIZE != declared as usize {
        return Err(LinkError::MissCountMismatch {
            declared,
            actual: body.len() / SEQ_SIZE,
        });
    }

    let indices: Vec<u16> = body
        .chunks_exact(SEQ_SIZE)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();

    Ok(MissFrame::new(indices))
}

/// Decode a position frame: "CORD" followed by ASCII `lat,lng`
pub fn decode_position(data: &[u8]) -> Result<Position, LinkError> {
    let text = data
        .strip_prefix(POSITION_MAGIC.as_slice())
        .ok_or_else(|| LinkError::InvalidPosition("missing CORD magic".to_string()))?;

    let text = std::str::from_utf8(text)
        .map_err(|e| LinkError::InvalidPosition(e.to_string()))?
        .trim_matches(|c: char| c.is_whitespace() || c == '\0');

    let (lat, lng) = text
        .split_once(',')
        .ok_or_else(|| LinkError::InvalidPosition(text.to_string()))?;

    let latitude = lat
        .trim()
        .parse::<f64>()
        .map_err(|e| LinkError::InvalidPosition(e.to_string()))?;
    let longitude = lng
        .trim()
        .parse::<f64>()
        .map_err(|e| LinkError::InvalidPosition(e.to_string()))?;

    Ok(Position::new(latitude, longitude))
}

/// Classify and decode one inbound frame
///
/// Position frames are recognised in any state. While `expecting_header`
/// is set every other frame must be a transfer header; otherwise it is a
/// data chunk.
pub fn decode_inbound(data: Bytes, expecting_header: bool) -> Result<InboundFrame, LinkError> {
    if data.starts_with(POSITION_MAGIC) {
        return decode_position(&data).map(InboundFrame::Position);
    }

    if expecting_header {
        let header = decode_header(&data)?;
        let rest = data.slice(HEADER_SIZE..);
        return Ok(InboundFrame::Header { header, rest });
    }

    decode_chunk(data).map(InboundFrame::Chunk)
}

/// Classify a frame against the receiver's progress
///
/// `num_expected` is `None` until a header has been accepted, and every
/// frame is then decoded as in [`decode_inbound`] with a header expected.
/// During a transfer, a frame whose leading index is below `num_expected`
/// is a chunk even when its bytes spell `CORD` or `LORA`. Beyond that range
/// a full-length `LORA` frame is a new header.
pub fn classify_inbound(
    data: Bytes,
    num_expected: Option<u32>,
) -> Result<InboundFrame, LinkError> {
    let Some(num_expected) = num_expected else {
        return decode_inbound(data, true);
    };

    if data.len() >= SEQ_SIZE {
        let seq = u16::from_be_bytes([data[0], data[1]]);
        if (seq as u32) < num_expected {
            return decode_chunk(data).map(InboundFrame::Chunk);
        }
    }

    let is_header = data.len() >= HEADER_SIZE && data.starts_with(HEADER_MAGIC);
    decode_inbound(data, is_header)
}

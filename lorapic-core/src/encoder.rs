//! Frame encoding

use crate::constants::{
    DEFAULT_CHUNK_SIZE, HEADER_MAGIC, HEADER_SIZE, MAX_RADIO_FRAME, MISS_MAGIC, POSITION_MAGIC,
    SEQ_SIZE,
};
use crate::error::LinkError;
use crate::types::{ChunkFrame, MissFrame, Position, TransferHeader};
use bytes::{BufMut, Bytes, BytesMut};

/// Encode a transfer header
///
/// Layout (big-endian):
/// 1. Magic (4 bytes): "LORA"
/// 2. Total bytes (4 bytes)
/// 3. Width (4 bytes)
/// 4. Height (4 bytes)
pub fn encode_header(header: &TransferHeader) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE);

    buf.put_slice(HEADER_MAGIC);
    buf.put_u32(header.total_bytes);
    buf.put_u32(header.width);
    buf.put_u32(header.height);

    buf.freeze()
}

/// Encode a data chunk: sequence index (2 bytes, big-endian) then payload
pub fn encode_chunk(seq: u16, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(SEQ_SIZE + payload.len());

    buf.put_u16(seq);
    buf.put_slice(payload);

    buf.freeze()
}

/// Encode a complete ChunkFrame struct
pub fn encode_chunk_struct(chunk: &ChunkFrame) -> Bytes {
    encode_chunk(chunk.seq, &chunk.payload)
}

/// Encode a MISS frame
///
/// Layout (big-endian):
/// 1. Magic (4 bytes): "MISS"
/// 2. Count (2 bytes)
/// 3. Count sequence indices (2 bytes each)
///
/// Fails if the index list does not fit in the count field.
pub fn encode_miss(miss: &MissFrame) -> Result<Bytes, LinkError> {
    let count = u16::try_from(miss.indices.len())
        .map_err(|_| LinkError::TransferTooLarge(miss.indices.len() as u64))?;

    let mut buf = BytesMut::with_capacity(miss.encoded_len());

    buf.put_slice(MISS_MAGIC);
    buf.put_u16(count);
    for &seq in &miss.indices {
        buf.put_u16(seq);
    }

    Ok(buf.freeze())
}

/// Encode a position frame: "CORD" followed by `lat,lng` as ASCII
pub fn encode_position(position: &Position) -> Bytes {
    let text = format!("{},{}", position.latitude, position.longitude);
    let mut buf = BytesMut::with_capacity(POSITION_MAGIC.len() + text.len());

    buf.put_slice(POSITION_MAGIC);
    buf.put_slice(text.as_bytes());

    buf.freeze()
}

/// Splits a payload into the frames a sender transmits: one header followed
/// by sequenced chunks. Also answers MISS requests with the chunks they name.
#[derive(Debug, Clone)]
pub struct Packetizer {
    header: TransferHeader,
    data: Bytes,
    chunk_size: u32,
    inline_first: bool,
}

impl Packetizer {
    /// Create a packetizer for `data`, announced with the given image size
    pub fn new(data: Bytes, width: u32, height: u32) -> Self {
        Self {
            header: TransferHeader::new(data.len() as u32, width, height),
            data,
            chunk_size: DEFAULT_CHUNK_SIZE,
            inline_first: false,
        }
    }

    /// Set the payload bytes per chunk
    pub fn chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Carry chunk 0 in the same radio frame as the header
    pub fn inline_first_chunk(mut self) -> Self {
        self.inline_first = true;
        self
    }

    /// Validate sizes and freeze the packetizer
    pub fn build(self) -> Result<Self, LinkError> {
        if self.data.len() > u32::MAX as usize {
            return Err(LinkError::TransferTooLarge(self.data.len() as u64));
        }
        self.header.validate(self.chunk_size)?;

        let largest = if self.inline_first {
            HEADER_SIZE + SEQ_SIZE + self.chunk_size as usize
        } else {
            SEQ_SIZE + self.chunk_size as usize
        };
        if largest > MAX_RADIO_FRAME {
            return Err(LinkError::FrameTooLarge(largest, MAX_RADIO_FRAME));
        }

        Ok(self)
    }

    /// The header this packetizer announces
    pub fn header(&self) -> &TransferHeader {
        &self.header
    }

    /// Number of chunk frames
    pub fn num_chunks(&self) -> u32 {
        self.header.num_chunks(self.chunk_size)
    }

    /// Chunk `seq` as a frame, or `None` past the end of the payload
    pub fn chunk_frame(&self, seq: u16) -> Option<Bytes> {
        let start = seq as usize * self.chunk_size as usize;
        if start >= self.data.len() {
            return None;
        }
        let end = std::cmp::min(start + self.chunk_size as usize, self.data.len());
        Some(encode_chunk(seq, &self.data[start..end]))
    }

    /// The header frame, with chunk 0 appended when inlining is enabled
    pub fn header_frame(&self) -> Bytes {
        let header = encode_header(&self.header);
        if !self.inline_first {
            return header;
        }

        let mut buf = BytesMut::from(&header[..]);
        if let Some(first) = self.chunk_frame(0) {
            buf.put_slice(&first);
        }
        buf.freeze()
    }

    /// Every frame of the first pass, in transmission order
    pub fn frames(&self) -> Vec<Bytes> {
        let mut frames = Vec::with_capacity(self.num_chunks() as usize + 1);
        frames.push(self.header_frame());

        let first = if self.inline_first { 1 } else { 0 };
        for seq in first..self.num_chunks() {
            if let Some(frame) = self.chunk_frame(seq as u16) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Chunk frames answering a MISS request. Unknown indices are skipped.
    pub fn retransmit_frames(&self, miss: &MissFrame) -> Vec<Bytes> {
        miss.indices
            .iter()
            .filter_map(|&seq| self.chunk_frame(seq))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_header_layout() {
        let encoded = encode_header(&TransferHeader::new(1000, 640, 480));

        assert_eq!(encoded.len(), HEADER_SIZE);
        assert_eq!(&encoded[0..4], b"LORA");
        assert_eq!(&encoded[4..8], &1000u32.to_be_bytes());
        assert_eq!(&encoded[8..12], &640u32.to_be_bytes());
        assert_eq!(&encoded[12..16], &480u32.to_be_bytes());
    }

    #[test]
    fn test_encode_miss_single_index() {
        let encoded = encode_miss(&MissFrame::new(vec![2])).unwrap();
        assert_eq!(
            encoded.as_ref(),
            &[0x4D, 0x49, 0x53, 0x53, 0x00, 0x01, 0x00, 0x02]
        );
    }

    #[test]
    fn test_encode_ack() {
        let encoded = encode_miss(&MissFrame::ack()).unwrap();
        assert_eq!(encoded.as_ref(), b"MISS\x00\x00");
    }

    #[test]
    fn test_packetizer_splits_payload() {
        let data = Bytes::from((0..=255u8).cycle().take(1000).collect::<Vec<_>>());
        let packetizer = Packetizer::new(data.clone(), 10, 10)
            .chunk_size(200)
            .build()
            .unwrap();

        let frames = packetizer.frames();
        assert_eq!(frames.len(), 6);
        assert_eq!(frames[0].len(), HEADER_SIZE);
        assert_eq!(&frames[3][0..2], &2u16.to_be_bytes());
        assert_eq!(&frames[3][2..], &data[400..600]);
    }

    #[test]
    fn test_packetizer_inline_first_chunk() {
        let data = Bytes::from(vec![7u8; 450]);
        let packetizer = Packetizer::new(data, 1, 1)
            .chunk_size(200)
            .inline_first_chunk()
            .build()
            .unwrap();

        let frames = packetizer.frames();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].len(), HEADER_SIZE + SEQ_SIZE + 200);
        assert_eq!(frames[2].len(), SEQ_SIZE + 50);
    }

    #[test]
    fn test_packetizer_rejects_oversized_chunks() {
        let result = Packetizer::new(Bytes::from(vec![0u8; 10]), 1, 1)
            .chunk_size(254)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_retransmit_frames_skip_unknown() {
        let packetizer = Packetizer::new(Bytes::from(vec![1u8; 500]), 1, 1)
            .build()
            .unwrap();

        let frames = packetizer.retransmit_frames(&MissFrame::new(vec![2, 9, 0]));
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][0..2], &2u16.to_be_bytes());
        assert_eq!(frames[0].len(), SEQ_SIZE + 100);
    }
}

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use lorapic_core::{
    constants::{HEADER_MAGIC, HEADER_SIZE, MISS_MAGIC, POSITION_MAGIC},
    decoder::{decode_chunk, decode_header, decode_miss, decode_position},
};

/// Describe one raw frame given as hex
pub fn describe(hex_frame: &str) -> Result<String> {
    let cleaned: String = hex_frame
        .trim()
        .trim_matches('"')
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let raw = hex::decode(&cleaned).context("Frame is not valid hex")?;
    if raw.is_empty() {
        bail!("Empty frame");
    }

    if raw.starts_with(HEADER_MAGIC) {
        let header = decode_header(&raw)?;
        let mut text = format!(
            "header: {} bytes, {}x{} image",
            header.total_bytes, header.width, header.height
        );
        if raw.len() > HEADER_SIZE {
            let chunk = decode_chunk(Bytes::copy_from_slice(&raw[HEADER_SIZE..]))?;
            text.push_str(&format!(
                " + chunk {} ({} bytes)",
                chunk.seq,
                chunk.payload.len()
            ));
        }
        return Ok(text);
    }

    if raw.starts_with(MISS_MAGIC) {
        let miss = decode_miss(&raw)?;
        if miss.is_ack() {
            return Ok("miss: empty (transfer acknowledged)".to_string());
        }
        return Ok(format!("miss: {} chunks {:?}", miss.indices.len(), miss.indices));
    }

    if raw.starts_with(POSITION_MAGIC) {
        let position = decode_position(&raw)?;
        return Ok(format!(
            "position: {:.6},{:.6}",
            position.latitude, position.longitude
        ));
    }

    let chunk = decode_chunk(Bytes::from(raw))?;
    Ok(format!(
        "chunk {}: {} bytes [{}{}]",
        chunk.seq,
        chunk.payload.len(),
        hex::encode(&chunk.payload[..chunk.payload.len().min(8)]),
        if chunk.payload.len() > 8 { "..." } else { "" }
    ))
}

pub fn execute(hex_frame: &str) -> Result<()> {
    println!("{}", describe(hex_frame)?);
    Ok(())
}

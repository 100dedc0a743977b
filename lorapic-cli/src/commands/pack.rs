use anyhow::{Context, Result};
use bytes::Bytes;
use lorapic_core::{link::Command, Packetizer};
use std::fs;
use tracing::info;

/// Options for building a sender script
#[derive(Debug, Clone)]
pub struct PackOptions {
    /// Image width announced in the header
    pub width: u32,
    /// Image height announced in the header
    pub height: u32,
    /// Payload bytes per chunk
    pub chunk_size: u32,
    /// Carry chunk 0 in the header frame
    pub inline_first: bool,
}

/// Split `input` into radio frames and write the modem commands that send them,
/// one `AT+TEST=TXLRPKT` line per frame.
///
/// Returns the number of frames written.
pub fn execute(input: &str, output: &str, options: &PackOptions) -> Result<usize> {
    info!("Packing {} into {}", input, output);

    let data = fs::read(input).with_context(|| format!("Failed to read input file: {}", input))?;
    let digest = blake3::hash(&data);

    let mut packetizer = Packetizer::new(Bytes::from(data), options.width, options.height)
        .chunk_size(options.chunk_size);
    if options.inline_first {
        packetizer = packetizer.inline_first_chunk();
    }
    let packetizer = packetizer
        .build()
        .with_context(|| format!("Cannot packetize {}", input))?;

    let frames = packetizer.frames();
    let script: String = frames
        .iter()
        .map(|frame| Command::Transmit(frame.clone()).to_line())
        .collect();

    fs::write(output, script)
        .with_context(|| format!("Failed to write output file: {}", output))?;

    info!(
        "Packed {} bytes into {} frames ({} chunks of {} bytes)",
        packetizer.header().total_bytes,
        frames.len(),
        packetizer.num_chunks(),
        options.chunk_size
    );
    println!("blake3 {}", digest.to_hex());

    Ok(frames.len())
}

use anyhow::{Context, Result};
use bytes::Bytes;
use colored::*;
use lorapic_core::{
    decoder::{classify_inbound, decode_chunk},
    encoder::encode_miss,
    reassembly::ReassemblyBuffer,
    scanner::{scan_capture, ScanStats},
    scheduler::batch_missing,
    types::{InboundFrame, MissFrame, Position, TransferHeader},
    LinkError,
};
use std::fs;
use tracing::{info, warn};

/// Outcome of replaying a captured modem log
#[derive(Debug, Clone, Default)]
pub struct DecodeReport {
    /// Extraction statistics
    pub scan: ScanStats,
    /// Header of the transfer found in the capture
    pub header: Option<TransferHeader>,
    /// Distinct chunks stored
    pub chunks: usize,
    /// Chunks seen more than once
    pub duplicates: usize,
    /// Frames that could not be used
    pub dropped: usize,
    /// Coordinate updates in capture order
    pub positions: Vec<Position>,
    /// Chunks never received
    pub missing: Vec<u16>,
    /// The payload, when every chunk was present
    pub data: Option<Bytes>,
}

impl DecodeReport {
    /// MISS frames a receiver would send for the gaps
    pub fn miss_frames(&self) -> Vec<MissFrame> {
        batch_missing(self.missing.iter().copied(), lorapic_core::constants::MISS_BATCH_SIZE)
    }
}

/// Run a captured modem log through extraction, decoding and reassembly
///
/// Only the first transfer in the capture is reassembled.
pub fn replay(capture: &[u8], chunk_size: u32) -> DecodeReport {
    let (payloads, scan) = scan_capture(capture);
    let mut report = DecodeReport {
        scan,
        ..Default::default()
    };
    let mut buffer = ReassemblyBuffer::new(chunk_size);

    for payload in payloads {
        if buffer.is_complete() {
            break;
        }

        let num_expected = buffer.session().map(|s| s.num_expected());
        match classify_inbound(payload, num_expected) {
            Ok(InboundFrame::Position(position)) => report.positions.push(position),
            Ok(InboundFrame::Header { header, rest }) => {
                if let Err(e) = buffer.begin_session(header) {
                    warn!("Skipping header: {}", e);
                    report.dropped += 1;
                    continue;
                }
                report.header = Some(header);
                if !rest.is_empty() {
                    match decode_chunk(rest) {
                        Ok(chunk) => store(&mut buffer, &mut report, chunk.seq, chunk.payload),
                        Err(_) => report.dropped += 1,
                    }
                }
            }
            Ok(InboundFrame::Chunk(chunk)) => {
                store(&mut buffer, &mut report, chunk.seq, chunk.payload)
            }
            Err(e) => {
                warn!("Dropped frame: {}", e);
                report.dropped += 1;
            }
        }
    }

    report.missing = buffer.missing_indices().into_iter().collect();
    report.data = buffer.assemble().ok();
    report
}

fn store(buffer: &mut ReassemblyBuffer, report: &mut DecodeReport, seq: u16, payload: Bytes) {
    match buffer.accept_chunk(seq, payload) {
        Ok(()) => report.chunks += 1,
        Err(LinkError::DuplicateChunk(_)) => report.duplicates += 1,
        Err(e) => {
            warn!("Dropped chunk {}: {}", seq, e);
            report.dropped += 1;
        }
    }
}

pub fn execute(
    input: &str,
    output: Option<&str>,
    report_gaps: bool,
    chunk_size: u32,
) -> Result<DecodeReport> {
    info!("Decoding capture: {}", input);

    let capture =
        fs::read(input).with_context(|| format!("Failed to read input file: {}", input))?;
    let report = replay(&capture, chunk_size);

    println!("\n=== Capture Results ===");
    println!("Bytes scanned:     {} bytes", report.scan.bytes_scanned);
    println!("Data lines:        {}", report.scan.tags_found);
    println!("Valid payloads:    {}", report.scan.payloads_found);
    println!("Hex failures:      {}", report.scan.decode_failures);
    println!("Positions:         {}", report.positions.len());

    let Some(header) = report.header else {
        println!("{} No transfer header found", "✗".red());
        return Ok(report);
    };

    println!(
        "Transfer:          {} bytes, {}x{}, {} chunks",
        header.total_bytes,
        header.width,
        header.height,
        header.num_chunks(chunk_size)
    );
    println!("Chunks stored:     {}", report.chunks.to_string().green());
    println!("Duplicates:        {}", report.duplicates);
    if report.dropped > 0 {
        println!("Dropped frames:    {}", report.dropped.to_string().red());
    } else {
        println!("Dropped frames:    {}", report.dropped);
    }

    if report.missing.is_empty() {
        println!("{} Transfer complete", "✓".green());
    } else {
        println!(
            "{} {} chunks missing",
            "✗".red(),
            report.missing.len().to_string().red()
        );
    }

    if report_gaps && !report.missing.is_empty() {
        println!("\n=== Retransmission Requests ===");
        for miss in report.miss_frames() {
            let frame = encode_miss(&miss)?;
            println!("{} {:?} -> {}", "!".yellow(), miss.indices, hex::encode_upper(frame));
        }
    }

    if let (Some(path), Some(data)) = (output, &report.data) {
        fs::write(path, data).with_context(|| format!("Failed to write output file: {}", path))?;
        info!("Payload written to: {}", path);
        println!("blake3 {}", blake3::hash(data).to_hex());
    }

    Ok(report)
}

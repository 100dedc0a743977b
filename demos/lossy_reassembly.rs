//! Example demonstrating reassembly over a lossy, fragmented modem stream

use bytes::Bytes;
use lorapic_core::{
    decoder::{decode_chunk, decode_header},
    encoder::{encode_miss, Packetizer},
    reassembly::ReassemblyBuffer,
    scanner::HexPayloadScanner,
    scheduler::batch_missing,
};

/// Render frames the way the modem prints received packets
fn modem_text(frames: &[Bytes]) -> Vec<u8> {
    let mut text = Vec::new();
    for frame in frames {
        let status = format!("+TEST: LEN:{}, RSSI:-52, SNR:8\r\n", frame.len());
        let data = format!("+TEST: RX \"{}\"\r\n", hex::encode_upper(frame));
        text.extend_from_slice(status.as_bytes());
        text.extend_from_slice(data.as_bytes());
    }
    text
}

/// Feed text in awkward read sizes and collect the decoded payloads
fn extract(text: &[u8]) -> Vec<Bytes> {
    let mut scanner = HexPayloadScanner::new();
    let mut payloads = Vec::new();
    for piece in text.chunks(37) {
        scanner.push(piece);
        while let Some(item) = scanner.next_payload() {
            if let Ok(payload) = item {
                payloads.push(payload);
            }
        }
    }
    payloads
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Lorapic Lossy Reassembly Example\n");

    // Step 1: Split a fake image into radio frames
    let image: Vec<u8> = (0..5000u32).map(|i| (i * 31 % 256) as u8).collect();
    let packetizer = Packetizer::new(Bytes::from(image.clone()), 80, 60)
        .chunk_size(200)
        .build()?;
    let frames = packetizer.frames();
    println!(
        "Step 1: {} bytes -> header + {} chunks",
        image.len(),
        packetizer.num_chunks()
    );

    // Step 2: Lose every seventh frame on the air
    let survived: Vec<Bytes> = frames
        .iter()
        .enumerate()
        .filter(|(i, _)| i % 7 != 3)
        .map(|(_, f)| f.clone())
        .collect();
    println!(
        "Step 2: {} of {} frames survived the radio",
        survived.len(),
        frames.len()
    );

    // Step 3: Extract payloads from the modem's output and reassemble
    let mut payloads = extract(&modem_text(&survived)).into_iter();
    let header = decode_header(&payloads.next().ok_or("header lost")?)?;
    let mut buffer = ReassemblyBuffer::new(200);
    buffer.begin_session(header)?;

    for payload in payloads {
        let chunk = decode_chunk(payload)?;
        buffer.accept_chunk(chunk.seq, chunk.payload)?;
    }

    let missing = buffer.missing_indices();
    println!("Step 3: missing chunks {:?}", missing);

    // Step 4: Request the gaps and replay the answers
    for miss in batch_missing(missing.iter().copied(), 10) {
        println!("  MISS frame: {}", hex::encode_upper(encode_miss(&miss)?));

        let replies = packetizer.retransmit_frames(&miss);
        for payload in extract(&modem_text(&replies)) {
            let chunk = decode_chunk(payload)?;
            buffer.accept_chunk(chunk.seq, chunk.payload)?;
        }
    }

    let assembled = buffer.assemble()?;
    println!(
        "Step 4: assembled {} bytes, intact: {}",
        assembled.len(),
        assembled.as_ref() == image.as_slice()
    );

    Ok(())
}

//! Example running the receiver against a simulated modem
//!
//! The simulated modem drops a few chunks on the first pass, answers MISS
//! frames from the sender's packetizer and acknowledges every transmission.

use bytes::Bytes;
use lorapic_core::{
    decoder::decode_miss,
    encoder::Packetizer,
    session::{Receiver, TransferSink},
    types::{CompletedTransfer, Position},
    ModemLink, ReceiverConfig,
};
use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

struct PrintingSink;

impl TransferSink for PrintingSink {
    fn on_progress(&mut self, bytes_received: u64, total_bytes: u32) {
        println!("  progress {}/{}", bytes_received, total_bytes);
    }

    fn on_position(&mut self, position: Position) {
        println!("  position {:.6},{:.6}", position.latitude, position.longitude);
    }

    fn on_complete(&mut self, transfer: &CompletedTransfer) -> std::io::Result<()> {
        println!(
            "  complete: {} bytes, {} rounds, {} MISS frames",
            transfer.data.len(),
            transfer.stats.retransmit_rounds,
            transfer.stats.miss_frames_sent
        );
        Ok(())
    }
}

fn rx_line(frame: &[u8]) -> String {
    format!("+TEST: RX \"{}\"\r\n", hex::encode_upper(frame))
}

async fn simulated_modem(stream: DuplexStream, packetizer: Packetizer) -> std::io::Result<()> {
    let (rx, mut tx) = split(stream);
    let mut lines = BufReader::new(rx).lines();
    let mut first_pass = true;
    let mut pending: Vec<Bytes> = Vec::new();

    while let Some(line) = lines.next_line().await? {
        if line == "AT+TEST=RXLRPKT" {
            tx.write_all(b"+TEST: RXLRPKT\r\n").await?;
            let frames = if first_pass {
                first_pass = false;
                packetizer
                    .frames()
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| i % 4 != 2)
                    .map(|(_, f)| f)
                    .collect()
            } else {
                std::mem::take(&mut pending)
            };
            for frame in frames {
                tx.write_all(rx_line(&frame).as_bytes()).await?;
            }
        } else if let Some(hex_text) = line
            .strip_prefix("AT+TEST=TXLRPKT, \"")
            .and_then(|rest| rest.strip_suffix('"'))
        {
            tx.write_all(b"+TEST: TX DONE\r\n").await?;
            let raw = hex::decode(hex_text).map_err(std::io::Error::other)?;
            if let Ok(miss) = decode_miss(&raw) {
                pending.extend(packetizer.retransmit_frames(&miss));
            }
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Lorapic Loopback Transfer Example\n");

    let image = Bytes::from((0..3000u32).map(|i| (i % 256) as u8).collect::<Vec<_>>());
    let packetizer = Packetizer::new(image.clone(), 40, 30).build()?;

    let (link_side, modem_side) = duplex(64 * 1024);
    let modem = tokio::spawn(simulated_modem(modem_side, packetizer));

    // Short timings so the demo finishes quickly
    let config = ReceiverConfig {
        retransmission_timeout_ms: 500,
        rx_switch_delay_ms: 10,
        miss_interval_ms: 5,
        ack_backoff_ms: 10,
        ..Default::default()
    };

    let (reader, writer) = split(link_side);
    let mut receiver = Receiver::new(ModemLink::new(reader, writer), config).max_transfers(1);
    let completed = receiver
        .run_until(&mut PrintingSink, std::future::pending::<()>())
        .await?;

    modem.await??;
    println!("\nReceived {} transfer(s)", completed);
    Ok(())
}

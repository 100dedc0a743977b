//! Integration tests for the complete packetize → radio → receive → acknowledge flow
//!
//! A simulated modem sits on the far side of an in-memory duplex stream. It
//! answers AT commands the way the real device does, emits received packets
//! as `+TEST: RX "<hex>"` lines and replays chunks named by MISS frames.

use bytes::Bytes;
use lorapic_core::{
    decoder::decode_miss,
    encoder::{encode_chunk, encode_position, Packetizer},
    session::{Receiver, State, TransferSink},
    types::{CompletedTransfer, MissFrame, Position},
    LinkError, ModemLink, ReceiverConfig,
};
use std::time::Duration;
use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

/// What the simulated modem does during a session
#[derive(Debug, Default, Clone)]
struct ModemScript {
    /// Packets emitted after the first listen command
    first_pass: Vec<Bytes>,
    /// Retransmissions to lose, one entry per lost copy
    drop_retransmits: Vec<u16>,
    /// Write each line in pieces of this many bytes
    fragment: Option<usize>,
    /// Answer transmissions with an error
    fail_tx: bool,
}

/// What the simulated modem observed
#[derive(Debug, Default)]
struct ModemLog {
    listens: usize,
    misses: Vec<MissFrame>,
    raw_misses: Vec<Vec<u8>>,
    acks: usize,
}

#[derive(Debug, Default)]
struct RecordingSink {
    transfers: Vec<CompletedTransfer>,
    positions: Vec<Position>,
    progress: Vec<(u64, u32)>,
}

impl TransferSink for RecordingSink {
    fn on_progress(&mut self, bytes_received: u64, total_bytes: u32) {
        self.progress.push((bytes_received, total_bytes));
    }

    fn on_position(&mut self, position: Position) {
        self.positions.push(position);
    }

    fn on_complete(&mut self, transfer: &CompletedTransfer) -> std::io::Result<()> {
        self.transfers.push(transfer.clone());
        Ok(())
    }
}

fn payload(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i * 7 % 256) as u8).collect::<Vec<_>>())
}

fn packetizer(data: &Bytes) -> Packetizer {
    Packetizer::new(data.clone(), 64, 48).chunk_size(200).build().unwrap()
}

async fn write_out(tx: &mut (impl AsyncWriteExt + Unpin), data: &[u8], fragment: Option<usize>) {
    match fragment {
        Some(size) => {
            for piece in data.chunks(size) {
                tx.write_all(piece).await.unwrap();
                tokio::task::yield_now().await;
            }
        }
        None => tx.write_all(data).await.unwrap(),
    }
}

fn rx_line(frame: &[u8]) -> Vec<u8> {
    format!(
        "+TEST: LEN:{}, RSSI:-41, SNR:11\r\n+TEST: RX \"{}\"\r\n",
        frame.len(),
        hex::encode_upper(frame)
    )
    .into_bytes()
}

async fn run_modem(
    stream: DuplexStream,
    packetizer: Packetizer,
    mut script: ModemScript,
) -> ModemLog {
    let (rx, mut tx) = split(stream);
    let mut lines = BufReader::new(rx).lines();
    let mut log = ModemLog::default();
    let mut pending: Vec<Bytes> = Vec::new();

    while let Ok(Some(line)) = lines.next_line().await {
        if line == "AT+TEST=RXLRPKT" {
            write_out(&mut tx, b"+TEST: RXLRPKT\r\n", script.fragment).await;

            let frames = if log.listens == 0 {
                std::mem::take(&mut script.first_pass)
            } else {
                std::mem::take(&mut pending)
            };
            log.listens += 1;

            for frame in frames {
                write_out(&mut tx, &rx_line(&frame), script.fragment).await;
            }
        } else if let Some(hex_text) = line
            .strip_prefix("AT+TEST=TXLRPKT, \"")
            .and_then(|rest| rest.strip_suffix('"'))
        {
            if script.fail_tx {
                write_out(&mut tx, b"+TEST: TXLRPKT ERROR(-1)\r\n", None).await;
                continue;
            }

            let raw = hex::decode(hex_text).unwrap();
            let miss = decode_miss(&raw).unwrap();
            let reply = format!("+TEST: TXLRPKT \"{}\"\r\n+TEST: TX DONE\r\n", hex_text);
            write_out(&mut tx, reply.as_bytes(), script.fragment).await;

            if miss.is_ack() {
                log.acks += 1;
                continue;
            }

            for seq in &miss.indices {
                if let Some(pos) = script.drop_retransmits.iter().position(|s| s == seq) {
                    script.drop_retransmits.remove(pos);
                    continue;
                }
                if let Some(frame) = packetizer.chunk_frame(*seq) {
                    pending.push(frame);
                }
            }
            log.raw_misses.push(raw);
            log.misses.push(miss);
        } else {
            write_out(&mut tx, b"+OK\r\n", None).await;
        }
    }

    log
}

/// First-pass frames in transmission order, skipping the chunks named in `lost`
fn first_pass(packetizer: &Packetizer, lost: &[u16]) -> Vec<Bytes> {
    let mut frames = vec![packetizer.header_frame()];
    for seq in 0..packetizer.num_chunks() as u16 {
        if !lost.contains(&seq) {
            frames.push(packetizer.chunk_frame(seq).unwrap());
        }
    }
    frames
}

async fn receive(
    data: &Bytes,
    script: ModemScript,
    config: ReceiverConfig,
) -> (Result<usize, LinkError>, RecordingSink, ModemLog) {
    let (link_side, modem_side) = duplex(64 * 1024);
    let modem = tokio::spawn(run_modem(modem_side, packetizer(data), script));

    let (reader, writer) = split(link_side);
    let mut receiver = Receiver::new(ModemLink::new(reader, writer), config).max_transfers(1);
    let mut sink = RecordingSink::default();

    let result = receiver
        .run_until(&mut sink, std::future::pending::<()>())
        .await;
    drop(receiver);

    let log = modem.await.unwrap();
    (result, sink, log)
}

#[tokio::test(start_paused = true)]
async fn test_clean_transfer() {
    let data = payload(1000);
    let script = ModemScript {
        first_pass: first_pass(&packetizer(&data), &[]),
        ..Default::default()
    };

    let (result, sink, log) = receive(&data, script, ReceiverConfig::default()).await;

    assert_eq!(result, Ok(1));
    assert_eq!(sink.transfers.len(), 1);
    assert_eq!(sink.transfers[0].data, data);
    assert_eq!(sink.transfers[0].header.width, 64);
    assert_eq!(sink.transfers[0].stats.chunks_accepted, 5);
    assert_eq!(sink.transfers[0].stats.retransmit_rounds, 0);
    assert_eq!(sink.progress.last(), Some(&(1000, 1000)));
    assert!(log.misses.is_empty());
    assert_eq!(log.acks, 3);
}

#[tokio::test(start_paused = true)]
async fn test_out_of_order_with_duplicates() {
    let data = payload(1000);
    let packetizer = packetizer(&data);
    let mut frames = vec![packetizer.header_frame()];
    for seq in [2u16, 0, 0, 4, 1, 3] {
        frames.push(packetizer.chunk_frame(seq).unwrap());
    }

    let script = ModemScript {
        first_pass: frames,
        ..Default::default()
    };
    let (result, sink, log) = receive(&data, script, ReceiverConfig::default()).await;

    assert_eq!(result, Ok(1));
    assert_eq!(sink.transfers[0].data, data);
    assert_eq!(sink.transfers[0].stats.duplicates, 1);
    assert!(log.misses.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_lost_chunk_is_requested_after_timeout() {
    let data = payload(1000);
    let script = ModemScript {
        first_pass: first_pass(&packetizer(&data), &[2]),
        ..Default::default()
    };

    let (result, sink, log) = receive(&data, script, ReceiverConfig::default()).await;

    assert_eq!(result, Ok(1));
    assert_eq!(sink.transfers[0].data, data);
    assert_eq!(log.misses, vec![MissFrame::new(vec![2])]);
    assert_eq!(
        log.raw_misses[0],
        vec![0x4D, 0x49, 0x53, 0x53, 0x00, 0x01, 0x00, 0x02]
    );
    assert_eq!(log.listens, 2);
    assert_eq!(sink.transfers[0].stats.retransmit_rounds, 1);
    assert_eq!(sink.transfers[0].stats.miss_frames_sent, 1);
    assert!(sink.transfers[0].stats.duration >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_end_of_pass_requests_without_waiting() {
    let data = payload(1000);
    let packetizer = packetizer(&data);
    let mut frames = vec![packetizer.header_frame()];
    // Five chunk frames arrive, but chunk 2 is not among them
    for seq in [0u16, 1, 3, 4] {
        frames.push(packetizer.chunk_frame(seq).unwrap());
    }
    frames.push(encode_chunk(7, &[0x55; 200]));

    let script = ModemScript {
        first_pass: frames,
        ..Default::default()
    };
    let (result, sink, log) = receive(&data, script, ReceiverConfig::default()).await;

    assert_eq!(result, Ok(1));
    assert_eq!(log.misses, vec![MissFrame::new(vec![2])]);
    assert_eq!(sink.transfers[0].stats.out_of_range, 1);
    assert!(sink.transfers[0].stats.duration < Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_duplicates_do_not_end_the_pass() {
    let data = payload(1000);
    let packetizer = packetizer(&data);
    let mut frames = vec![packetizer.header_frame()];
    // Chunk 2 is lost; the repeats of chunk 0 must not cut the pass short
    for seq in [0u16, 0, 0, 1, 3, 4] {
        frames.push(packetizer.chunk_frame(seq).unwrap());
    }

    let script = ModemScript {
        first_pass: frames,
        ..Default::default()
    };
    let (result, sink, log) = receive(&data, script, ReceiverConfig::default()).await;

    assert_eq!(result, Ok(1));
    assert_eq!(sink.transfers[0].data, data);
    assert_eq!(sink.transfers[0].stats.duplicates, 2);
    // Only the inactivity deadline asks for chunk 2
    assert_eq!(log.misses, vec![MissFrame::new(vec![2])]);
    assert!(sink.transfers[0].stats.duration >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_wrong_length_chunk_does_not_poison_the_session() {
    let data = payload(1000);
    let packetizer = packetizer(&data);
    let mut frames = vec![packetizer.header_frame(), encode_chunk(1, &[7; 50])];
    frames.extend(first_pass(&packetizer, &[]).into_iter().skip(1));

    let script = ModemScript {
        first_pass: frames,
        ..Default::default()
    };
    let (result, sink, log) = receive(&data, script, ReceiverConfig::default()).await;

    assert_eq!(result, Ok(1));
    assert_eq!(sink.transfers[0].data, data);
    assert_eq!(sink.transfers[0].stats.malformed, 1);
    assert_eq!(sink.transfers[0].stats.chunks_accepted, 5);
    assert!(log.misses.is_empty());
    assert_eq!(log.acks, 3);
}

#[tokio::test(start_paused = true)]
async fn test_many_losses_are_batched() {
    let data = payload(30 * 200);
    let lost: Vec<u16> = (0..25).collect();
    let script = ModemScript {
        first_pass: first_pass(&packetizer(&data), &lost),
        ..Default::default()
    };

    let (result, sink, log) = receive(&data, script, ReceiverConfig::default()).await;

    assert_eq!(result, Ok(1));
    assert_eq!(sink.transfers[0].data, data);
    assert_eq!(log.misses.len(), 3);
    assert_eq!(log.misses[0].indices, (0..10).collect::<Vec<_>>());
    assert_eq!(log.misses[1].indices, (10..20).collect::<Vec<_>>());
    assert_eq!(log.misses[2].indices, (20..25).collect::<Vec<_>>());
    assert_eq!(sink.transfers[0].stats.miss_frames_sent, 3);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_loss_needs_another_round() {
    let data = payload(1000);
    let script = ModemScript {
        first_pass: first_pass(&packetizer(&data), &[1, 3]),
        drop_retransmits: vec![3],
        ..Default::default()
    };

    let (result, sink, log) = receive(&data, script, ReceiverConfig::default()).await;

    assert_eq!(result, Ok(1));
    assert_eq!(sink.transfers[0].data, data);
    assert_eq!(
        log.misses,
        vec![MissFrame::new(vec![1, 3]), MissFrame::new(vec![3])]
    );
    assert_eq!(sink.transfers[0].stats.retransmit_rounds, 2);
}

#[tokio::test(start_paused = true)]
async fn test_round_limit_aborts() {
    let data = payload(1000);
    let script = ModemScript {
        first_pass: first_pass(&packetizer(&data), &[2]),
        drop_retransmits: vec![2, 2, 2],
        ..Default::default()
    };
    let config = ReceiverConfig {
        max_retransmit_rounds: Some(1),
        ..Default::default()
    };

    let (result, sink, log) = receive(&data, script, config).await;

    assert_eq!(result, Err(LinkError::RetransmitLimit(1)));
    assert!(sink.transfers.is_empty());
    assert_eq!(log.misses.len(), 1);
    assert_eq!(log.acks, 0);
}

#[tokio::test(start_paused = true)]
async fn test_transmit_error_aborts() {
    let data = payload(1000);
    let script = ModemScript {
        first_pass: first_pass(&packetizer(&data), &[4]),
        fail_tx: true,
        ..Default::default()
    };

    let (result, sink, _log) = receive(&data, script, ReceiverConfig::default()).await;

    assert!(matches!(result, Err(LinkError::CommandFailed(_))));
    assert!(sink.transfers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fragmented_output_and_positions() {
    let data = payload(700);
    let packetizer = packetizer(&data);
    let mut frames = vec![encode_position(&Position::new(25.348766, 55.405403))];
    frames.extend(first_pass(&packetizer, &[]));
    frames.insert(3, encode_position(&Position::new(25.3488, 55.4055)));
    // Too short to be a chunk
    frames.insert(4, Bytes::from_static(&[0x00, 0x01]));

    let script = ModemScript {
        first_pass: frames,
        fragment: Some(7),
        ..Default::default()
    };
    let (result, sink, log) = receive(&data, script, ReceiverConfig::default()).await;

    assert_eq!(result, Ok(1));
    assert_eq!(sink.transfers[0].data, data);
    assert_eq!(sink.transfers[0].stats.malformed, 1);
    assert_eq!(sink.positions.len(), 2);
    assert_eq!(sink.positions[0], Position::new(25.348766, 55.405403));
    assert_eq!(log.acks, 3);
}

#[tokio::test(start_paused = true)]
async fn test_inline_first_chunk() {
    let data = payload(450);
    let packetizer = Packetizer::new(data.clone(), 1, 1)
        .chunk_size(200)
        .inline_first_chunk()
        .build()
        .unwrap();

    let script = ModemScript {
        first_pass: packetizer.frames(),
        ..Default::default()
    };
    let (result, sink, _log) = receive(&data, script, ReceiverConfig::default()).await;

    assert_eq!(result, Ok(1));
    assert_eq!(sink.transfers[0].data, data);
    assert_eq!(sink.transfers[0].stats.chunks_accepted, 3);
}

#[tokio::test(start_paused = true)]
async fn test_frames_before_header_are_ignored() {
    let data = payload(400);
    let packetizer = packetizer(&data);
    let mut frames = vec![encode_chunk(1, &[0xEE; 200])];
    frames.extend(first_pass(&packetizer, &[]));

    let script = ModemScript {
        first_pass: frames,
        ..Default::default()
    };
    let (result, sink, _log) = receive(&data, script, ReceiverConfig::default()).await;

    assert_eq!(result, Ok(1));
    assert_eq!(sink.transfers[0].data, data);
}

#[tokio::test(start_paused = true)]
async fn test_reacquires_closed_reader() {
    let data = payload(1000);
    let packetizer = packetizer(&data);

    let mut before = b"+TEST: RXLRPKT\r\n".to_vec();
    before.extend(rx_line(&packetizer.header_frame()));
    for seq in 0..2u16 {
        before.extend(rx_line(&packetizer.chunk_frame(seq).unwrap()));
    }

    let mut after = Vec::new();
    for seq in 2..5u16 {
        after.extend(rx_line(&packetizer.chunk_frame(seq).unwrap()));
    }
    for _ in 0..3 {
        after.extend_from_slice(b"+TEST: TX DONE\r\n");
    }

    let before: &'static [u8] = Box::leak(before.into_boxed_slice());
    let after: &'static [u8] = Box::leak(after.into_boxed_slice());

    let link = ModemLink::new(before, tokio::io::sink()).with_reopen(move || Ok(after));
    let mut receiver = Receiver::new(link, ReceiverConfig::default());
    let mut sink: Vec<CompletedTransfer> = Vec::new();

    let transfer = receiver.run_once(&mut sink).await.unwrap();
    assert_eq!(transfer.data, data);
    assert_eq!(receiver.state(), State::Idle);
    assert_eq!(sink.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_closed_reader_without_reacquire_aborts() {
    let data = payload(1000);
    let packetizer = packetizer(&data);

    let mut before = b"+TEST: RXLRPKT\r\n".to_vec();
    before.extend(rx_line(&packetizer.header_frame()));
    before.extend(rx_line(&packetizer.chunk_frame(0).unwrap()));
    let before: &'static [u8] = Box::leak(before.into_boxed_slice());

    let config = ReceiverConfig {
        reacquire_on_close: false,
        ..Default::default()
    };
    let mut receiver = Receiver::new(ModemLink::new(before, tokio::io::sink()), config);
    let mut sink: Vec<CompletedTransfer> = Vec::new();

    assert_eq!(
        receiver.run_once(&mut sink).await,
        Err(LinkError::TransportClosed)
    );
    assert_eq!(receiver.state(), State::Aborted);
    assert!(receiver.buffer().session().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_reception() {
    let (link_side, _modem_side) = duplex(1024);
    let (reader, writer) = split(link_side);
    let link = ModemLink::new(reader, writer);
    let mut receiver = Receiver::new(link, ReceiverConfig::default());
    let mut sink = RecordingSink::default();

    // Nobody answers the listen command, so shutdown wins
    let shutdown = tokio::time::sleep(Duration::from_secs(1));
    let result = receiver.run_until(&mut sink, shutdown).await;

    assert_eq!(result, Ok(0));
    assert_eq!(receiver.state(), State::Idle);
}

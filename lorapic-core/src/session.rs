//! Transfer state machine
//!
//! [`Receiver`] drives one [`ModemLink`] through the reception lifecycle:
//!
//! ```text
//! Idle -> AwaitingHeader -> Receiving -> Completing -> Idle
//!              |                |
//!              +-> Aborted <----+
//! ```
//!
//! Frames are decoded and fed to the [`ReassemblyBuffer`]; timeouts and
//! exhausted passes consult the [`RetransmitScheduler`]; a finished transfer
//! is handed to a [`TransferSink`] and acknowledged with empty MISS frames.

use crate::config::ReceiverConfig;
use crate::decoder::{classify_inbound, decode_chunk};
use crate::encoder::encode_miss;
use crate::error::LinkError;
use crate::link::{ModemLink, ReadOutcome};
use crate::reassembly::ReassemblyBuffer;
use crate::scheduler::{RetransmitPolicy, RetransmitScheduler, Trigger};
use crate::types::{ChunkFrame, CompletedTransfer, InboundFrame, MissFrame, Position};
use bytes::Bytes;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{sleep, Instant};

#[cfg(feature = "logging")]
use tracing::{debug, error, info, warn};

/// Lifecycle of the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not receiving
    Idle,
    /// Listening for a transfer header
    AwaitingHeader,
    /// Collecting chunks
    Receiving,
    /// Delivering and acknowledging a complete transfer
    Completing,
    /// Stopped on an unrecoverable failure
    Aborted,
}

/// Receives the outputs of a transfer
pub trait TransferSink {
    /// Called after every stored chunk
    fn on_progress(&mut self, _bytes_received: u64, _total_bytes: u32) {}

    /// Called for every coordinate update, in any state
    fn on_position(&mut self, _position: Position) {}

    /// Called once with the assembled payload, before acknowledgment
    fn on_complete(&mut self, transfer: &CompletedTransfer) -> std::io::Result<()>;
}

impl TransferSink for Vec<CompletedTransfer> {
    fn on_complete(&mut self, transfer: &CompletedTransfer) -> std::io::Result<()> {
        self.push(transfer.clone());
        Ok(())
    }
}

/// Counters gathered over one transfer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferStats {
    /// Distinct chunks stored
    pub chunks_accepted: u32,
    /// Chunks dropped because their index was already stored
    pub duplicates: u32,
    /// Chunks dropped for an index past the declared count
    pub out_of_range: u32,
    /// Frames too short or otherwise undecodable
    pub malformed: u32,
    /// Retransmission rounds requested
    pub retransmit_rounds: u32,
    /// MISS frames transmitted, acknowledgments excluded
    pub miss_frames_sent: u32,
    /// Payload bytes delivered
    pub bytes: u64,
    /// Time from header to completion
    pub duration: Duration,
}

impl TransferStats {
    /// Delivered bytes per second
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.bytes as f64 / secs
        }
    }
}

/// Ground-station receiver
#[derive(Debug)]
pub struct Receiver<R, W> {
    link: ModemLink<R, W>,
    buffer: ReassemblyBuffer,
    scheduler: RetransmitScheduler,
    config: ReceiverConfig,
    state: State,
    stats: TransferStats,
    max_transfers: Option<usize>,
}

impl<R, W> Receiver<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Create an idle receiver
    pub fn new(link: ModemLink<R, W>, config: ReceiverConfig) -> Self {
        Self {
            link,
            buffer: ReassemblyBuffer::new(config.chunk_size),
            scheduler: RetransmitScheduler::new(RetransmitPolicy::from(&config)),
            config,
            state: State::Idle,
            stats: TransferStats::default(),
            max_transfers: None,
        }
    }

    /// Stop [`run_until`](Self::run_until) after `count` completed transfers
    pub fn max_transfers(mut self, count: usize) -> Self {
        self.max_transfers = Some(count);
        self
    }

    /// Current state
    pub fn state(&self) -> State {
        self.state
    }

    /// Counters of the transfer in progress
    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// The reassembly state
    pub fn buffer(&self) -> &ReassemblyBuffer {
        &self.buffer
    }

    /// The underlying link
    pub fn link_mut(&mut self) -> &mut ModemLink<R, W> {
        &mut self.link
    }

    /// Give the link back
    pub fn into_link(self) -> ModemLink<R, W> {
        self.link
    }

    /// Receive transfers until `shutdown` resolves, a fatal error occurs or
    /// the transfer limit is reached. The outbound half is always shut down.
    ///
    /// Returns the number of completed transfers.
    pub async fn run_until<S, F>(&mut self, sink: &mut S, shutdown: F) -> Result<usize, LinkError>
    where
        S: TransferSink,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut completed = 0usize;

        let result = loop {
            if self.max_transfers.is_some_and(|max| completed >= max) {
                break Ok(completed);
            }

            tokio::select! {
                outcome = self.run_once(sink) => match outcome {
                    Ok(_) => completed += 1,
                    Err(e) => break Err(e),
                },
                _ = &mut shutdown => {
                    #[cfg(feature = "logging")]
                    info!(completed, "Reception stopped");

                    break Ok(completed);
                }
            }
        };

        if self.state != State::Aborted {
            self.state = State::Idle;
        }
        self.buffer.reset();

        let closed = self.link.shutdown().await;
        let completed = result?;
        closed?;
        Ok(completed)
    }

    /// Receive a single transfer
    ///
    /// Any previous session is discarded. Frame-level problems are logged
    /// and absorbed; command failures and unrecoverable closure abort.
    pub async fn run_once<S>(&mut self, sink: &mut S) -> Result<CompletedTransfer, LinkError>
    where
        S: TransferSink,
    {
        match self.receive(sink).await {
            Ok(transfer) => Ok(transfer),
            Err(e) => {
                #[cfg(feature = "logging")]
                error!(error = %e, state = ?self.state, "Transfer aborted");

                self.state = State::Aborted;
                self.buffer.reset();
                Err(e)
            }
        }
    }

    async fn receive<S: TransferSink>(
        &mut self,
        sink: &mut S,
    ) -> Result<CompletedTransfer, LinkError> {
        self.buffer.reset();
        self.scheduler.reset();
        self.stats = TransferStats::default();
        self.state = State::AwaitingHeader;

        self.link.listen().await?;

        #[cfg(feature = "logging")]
        info!("Listening for transmission");

        let mut reopened_without_data = false;

        loop {
            let deadline = match self.buffer.session() {
                Some(session) if self.state == State::Receiving => {
                    self.scheduler.deadline(session.last_activity())
                }
                _ => Instant::now() + self.scheduler.policy().timeout,
            };

            match self.link.next_payload(deadline).await? {
                ReadOutcome::Payload(frame) => {
                    reopened_without_data = false;
                    self.handle_frame(frame, sink);

                    if self.buffer.is_complete() {
                        return self.complete(sink).await;
                    }
                    if self.state == State::Receiving && self.scheduler.pass_exhausted() {
                        self.request_missing(Trigger::EndOfPass).await?;
                    }
                }
                ReadOutcome::Rejected(_e) => {
                    #[cfg(feature = "logging")]
                    warn!(error = %_e, "Dropped undecodable data line");

                    self.stats.malformed += 1;
                }
                ReadOutcome::Timeout => {
                    if self.state == State::Receiving {
                        self.request_missing(Trigger::Timeout).await?;
                    }
                }
                ReadOutcome::Closed => {
                    let outstanding = self.state == State::Receiving;
                    if !outstanding
                        || !self.config.reacquire_on_close
                        || !self.link.can_reopen()
                        || reopened_without_data
                    {
                        return Err(LinkError::TransportClosed);
                    }

                    #[cfg(feature = "logging")]
                    warn!("Inbound stream closed mid-transfer, reacquiring");

                    self.link.reopen()?;
                    reopened_without_data = true;
                }
            }
        }
    }

    fn handle_frame<S: TransferSink>(&mut self, frame: Bytes, sink: &mut S) {
        let num_expected = match self.buffer.session() {
            Some(session) if self.state == State::Receiving => Some(session.num_expected()),
            _ => None,
        };

        match classify_inbound(frame, num_expected) {
            Ok(InboundFrame::Position(position)) => {
                #[cfg(feature = "logging")]
                debug!(lat = position.latitude, lng = position.longitude, "Position update");

                sink.on_position(position);
            }
            Ok(InboundFrame::Header { header, rest }) => match self.buffer.begin_session(header) {
                Ok(()) => {
                    let expected = header.num_chunks(self.config.chunk_size);

                    #[cfg(feature = "logging")]
                    info!(
                        total_bytes = header.total_bytes,
                        width = header.width,
                        height = header.height,
                        chunks = expected,
                        "Receiving transfer"
                    );

                    self.state = State::Receiving;
                    self.stats = TransferStats::default();
                    self.scheduler.reset();
                    self.scheduler.start_pass(expected as usize);

                    if !rest.is_empty() {
                        match decode_chunk(rest) {
                            Ok(chunk) => self.accept(chunk, sink),
                            Err(e) => self.drop_frame(e),
                        }
                    }
                }
                Err(e) => self.drop_frame(e),
            },
            Ok(InboundFrame::Chunk(chunk)) => self.accept(chunk, sink),
            Err(e) => self.drop_frame(e),
        }
    }

    fn accept<S: TransferSink>(&mut self, chunk: ChunkFrame, sink: &mut S) {
        match self.buffer.accept_chunk(chunk.seq, chunk.payload) {
            Ok(()) => {
                self.scheduler.note_chunk_frame();
                self.stats.chunks_accepted += 1;
                if let Some(session) = self.buffer.session() {
                    sink.on_progress(session.bytes_received(), session.header().total_bytes);
                }
            }
            Err(e) => self.drop_frame(e),
        }
    }

    fn drop_frame(&mut self, err: LinkError) {
        match err {
            LinkError::DuplicateChunk(_seq) => {
                #[cfg(feature = "logging")]
                debug!(seq = _seq, "Duplicate chunk ignored");

                self.stats.duplicates += 1;
                return;
            }
            LinkError::OutOfRangeSequence { .. } => {
                // Still a frame of the pass on the air
                self.scheduler.note_chunk_frame();
                self.stats.out_of_range += 1;
            }
            LinkError::MalformedFrame(_)
            | LinkError::ChunkLengthMismatch { .. }
            | LinkError::InvalidPreamble(_)
            | LinkError::IncompleteFrame { .. }
            | LinkError::InvalidPosition(_) => self.stats.malformed += 1,
            _ => {}
        }

        #[cfg(feature = "logging")]
        warn!(error = %err, state = ?self.state, "Dropped frame");
    }

    async fn request_missing(&mut self, trigger: Trigger) -> Result<(), LinkError> {
        let missing = self.buffer.missing_indices();
        let Some(frames) = self.scheduler.plan(missing, trigger)? else {
            return Ok(());
        };

        let policy = self.scheduler.policy().clone();
        sleep(policy.rx_switch_delay).await;

        for frame in &frames {
            self.link.transmit(encode_miss(frame)?).await?;
            self.stats.miss_frames_sent += 1;
            sleep(policy.miss_interval).await;
        }

        self.link.listen().await?;
        self.buffer.touch();
        self.stats.retransmit_rounds = self.scheduler.rounds();
        Ok(())
    }

    async fn complete<S: TransferSink>(
        &mut self,
        sink: &mut S,
    ) -> Result<CompletedTransfer, LinkError> {
        self.state = State::Completing;

        let data = self.buffer.assemble()?;
        let Some(session) = self.buffer.session() else {
            return Err(LinkError::NoActiveSession);
        };

        self.stats.bytes = data.len() as u64;
        self.stats.duration = session.started().elapsed();
        self.stats.retransmit_rounds = self.scheduler.rounds();

        let transfer = CompletedTransfer {
            header: *session.header(),
            data,
            stats: self.stats.clone(),
        };

        #[cfg(feature = "logging")]
        info!(
            bytes = transfer.stats.bytes,
            segments = transfer.stats.chunks_accepted,
            seconds = transfer.stats.duration.as_secs_f64(),
            throughput = transfer.stats.throughput(),
            "Transfer complete"
        );

        sink.on_complete(&transfer)?;
        self.acknowledge().await?;

        self.buffer.reset();
        self.state = State::Idle;
        Ok(transfer)
    }

    async fn acknowledge(&mut self) -> Result<(), LinkError> {
        let ack = encode_miss(&MissFrame::ack())?;
        let delays: Vec<Duration> = self.scheduler.ack_delays().collect();

        sleep(self.scheduler.policy().rx_switch_delay).await;
        for delay in delays {
            self.link.transmit(ack.clone()).await?;
            sleep(delay).await;
        }

        #[cfg(feature = "logging")]
        info!(repeats = self.config.ack_repeats, "Confirmation sent");

        Ok(())
    }
}

//! Modem link: AT command exchange and inbound payload delivery
//!
//! [`ModemLink`] owns both halves of the transport. Inbound bytes are split
//! into response lines; lines carrying `RX "..."` go to the hex scanner and
//! everything else is a command response. Data lines that arrive while a
//! command is outstanding are scanned and queued, so no payload is lost to a
//! command exchange.

use crate::config::RfConfig;
use crate::constants::{
    AT_RXLRPKT, AT_TXLRPKT, COMMAND_TIMEOUT, CRLF, ERROR_MARKER, READ_CHUNK, RX_TAG,
    TX_DONE_MARKER,
};
use crate::error::LinkError;
use crate::scanner::{HexPayloadScanner, LineExtractor, ScanStats};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};

#[cfg(feature = "logging")]
use tracing::{debug, info, trace};

/// A modem command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Switch to continuous packet reception
    Listen,
    /// Transmit one raw frame
    Transmit(Bytes),
    /// Any other AT line, sent verbatim
    Raw(String),
}

impl Command {
    /// The newline-terminated text sent to the modem
    pub fn to_line(&self) -> String {
        match self {
            Command::Listen => format!("{}\n", AT_RXLRPKT),
            Command::Transmit(frame) => format!("{}, \"{}\"\n", AT_TXLRPKT, hex::encode(frame)),
            Command::Raw(line) => format!("{}\n", line.trim_end()),
        }
    }

    fn is_complete(&self, line: &str) -> bool {
        match self {
            Command::Transmit(_) => line.contains(TX_DONE_MARKER),
            _ => true,
        }
    }
}

/// Result of waiting for the next inbound payload
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// Raw frame bytes decoded from a data line
    Payload(Bytes),
    /// A data line whose hex could not be decoded
    Rejected(LinkError),
    /// The deadline passed first
    Timeout,
    /// The inbound stream ended
    Closed,
}

type Reopen<R> = Box<dyn FnMut() -> std::io::Result<R> + Send>;

/// Command and data channel to a modem in packet-test mode
pub struct ModemLink<R, W> {
    reader: R,
    writer: W,
    lines: LineExtractor,
    scanner: HexPayloadScanner,
    read_buf: Vec<u8>,
    reopen: Option<Reopen<R>>,
}

impl<R, W> std::fmt::Debug for ModemLink<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModemLink")
            .field("pending_bytes", &self.lines.pending())
            .field("scan_stats", self.scanner.stats())
            .field("reopenable", &self.reopen.is_some())
            .finish()
    }
}

impl<R, W> ModemLink<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wrap an inbound and an outbound stream
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            lines: LineExtractor::new(),
            scanner: HexPayloadScanner::new(),
            read_buf: vec![0u8; READ_CHUNK],
            reopen: None,
        }
    }

    /// Provide a way to acquire a fresh inbound stream after closure
    pub fn with_reopen<F>(mut self, reopen: F) -> Self
    where
        F: FnMut() -> std::io::Result<R> + Send + 'static,
    {
        self.reopen = Some(Box::new(reopen));
        self
    }

    /// Whether [`reopen`](Self::reopen) can succeed
    pub fn can_reopen(&self) -> bool {
        self.reopen.is_some()
    }

    /// Replace the inbound stream with a fresh one
    ///
    /// Any partial line from the old stream is discarded.
    pub fn reopen(&mut self) -> Result<(), LinkError> {
        let reopen = self.reopen.as_mut().ok_or(LinkError::TransportClosed)?;
        self.reader = reopen()?;
        self.lines.clear();

        #[cfg(feature = "logging")]
        info!("Reacquired inbound stream");

        Ok(())
    }

    /// Extraction counters for the data lines seen so far
    pub fn scan_stats(&self) -> &ScanStats {
        self.scanner.stats()
    }

    /// Send a command and wait for its response lines
    ///
    /// Transmissions complete on `TX DONE`; other commands on their first
    /// response line. A response containing `ERROR` fails the command.
    pub async fn send_command(&mut self, command: Command) -> Result<Vec<String>, LinkError> {
        let line = command.to_line();

        #[cfg(feature = "logging")]
        debug!(command = line.trim_end(), "Sending command");

        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;

        let deadline = Instant::now() + COMMAND_TIMEOUT;
        let mut responses = Vec::new();

        loop {
            let Some(raw) = self.next_response(deadline).await? else {
                return Err(LinkError::CommandFailed(format!(
                    "no response to {}",
                    line.trim_end()
                )));
            };

            let text = String::from_utf8_lossy(&raw).trim().to_string();
            if text.is_empty() {
                continue;
            }

            #[cfg(feature = "logging")]
            trace!(response = %text, "Modem response");

            if text.contains(ERROR_MARKER) {
                return Err(LinkError::CommandFailed(text));
            }

            let done = command.is_complete(&text);
            responses.push(text);
            if done {
                return Ok(responses);
            }
        }
    }

    /// Put the modem into packet reception
    pub async fn listen(&mut self) -> Result<(), LinkError> {
        self.send_command(Command::Listen).await.map(|_| ())
    }

    /// Transmit one frame and wait until it has left the radio
    pub async fn transmit(&mut self, frame: Bytes) -> Result<(), LinkError> {
        self.send_command(Command::Transmit(frame)).await.map(|_| ())
    }

    /// Send the radio configuration sequence
    pub async fn configure(&mut self, rf: &RfConfig) -> Result<(), LinkError> {
        rf.validate()?;
        for line in rf.commands() {
            self.send_command(Command::Raw(line)).await?;
        }

        #[cfg(feature = "logging")]
        info!(
            sf = rf.spreading_factor,
            dbm = rf.power_dbm,
            "Modem configured for packet test mode"
        );

        Ok(())
    }

    /// Wait for the next received payload until `deadline`
    pub async fn next_payload(&mut self, deadline: Instant) -> Result<ReadOutcome, LinkError> {
        loop {
            if let Some(item) = self.scanner.next_payload() {
                return Ok(match item {
                    Ok(payload) => ReadOutcome::Payload(payload),
                    Err(e) => ReadOutcome::Rejected(e),
                });
            }

            if let Some(line) = self.lines.next_line() {
                if !self.route_data_line(&line) {
                    #[cfg(feature = "logging")]
                    trace!(line = %String::from_utf8_lossy(&line), "Ignoring modem output");
                }
                continue;
            }

            match self.fill(deadline).await? {
                Fill::Data => {}
                Fill::Timeout => return Ok(ReadOutcome::Timeout),
                Fill::Closed => return Ok(ReadOutcome::Closed),
            }
        }
    }

    /// Shut the outbound half down
    pub async fn shutdown(&mut self) -> Result<(), LinkError> {
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Split the link back into its streams
    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }

    /// Next non-data line, queueing data lines met on the way
    async fn next_response(&mut self, deadline: Instant) -> Result<Option<Bytes>, LinkError> {
        loop {
            while let Some(line) = self.lines.next_line() {
                if !self.route_data_line(&line) {
                    return Ok(Some(line));
                }
            }

            match self.fill(deadline).await? {
                Fill::Data => {}
                Fill::Timeout => return Ok(None),
                Fill::Closed => return Err(LinkError::TransportClosed),
            }
        }
    }

    fn route_data_line(&mut self, line: &[u8]) -> bool {
        if memchr::memmem::find(line, RX_TAG).is_none() {
            return false;
        }
        self.scanner.push(line);
        self.scanner.push(CRLF);
        true
    }

    async fn fill(&mut self, deadline: Instant) -> Result<Fill, LinkError> {
        match timeout_at(deadline, self.reader.read(&mut self.read_buf)).await {
            Err(_) => Ok(Fill::Timeout),
            Ok(Ok(0)) => Ok(Fill::Closed),
            Ok(Ok(n)) => {
                self.lines.push(&self.read_buf[..n]);
                Ok(Fill::Data)
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(Fill::Closed),
            Ok(Err(e)) => Err(e.into()),
        }
    }
}

enum Fill {
    Data,
    Timeout,
    Closed,
}

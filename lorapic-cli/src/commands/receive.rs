use crate::config::LorapicConfig;
use anyhow::{Context, Result};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use lorapic_core::{
    session::{Receiver, TransferSink},
    types::{CompletedTransfer, Position},
    ModemLink,
};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Options for the ground-station receiver
#[derive(Debug, Clone, Default)]
pub struct ReceiveOptions {
    /// Serial device node of the modem
    pub device: String,
    /// File the first payload is written to
    pub output: String,
    /// TOML configuration file
    pub config: Option<String>,
    /// Send the radio configuration before listening
    pub configure: bool,
    /// Overrides the configured chunk size
    pub chunk_size: Option<u32>,
    /// Overrides the configured retransmission timeout
    pub timeout_ms: Option<u64>,
    /// Overrides the configured round limit
    pub max_rounds: Option<u32>,
    /// JSON lines file for position updates
    pub positions: Option<String>,
    /// Stop after one transfer
    pub once: bool,
}

#[derive(Serialize)]
struct PositionRecord {
    latitude: f64,
    longitude: f64,
}

/// Writes payloads to disk, appends positions and draws progress
struct FileSink {
    output: PathBuf,
    positions: Option<PathBuf>,
    progress: Option<ProgressBar>,
    received: usize,
}

impl FileSink {
    fn new(output: &str, positions: Option<&str>) -> Self {
        Self {
            output: PathBuf::from(output),
            positions: positions.map(PathBuf::from),
            progress: None,
            received: 0,
        }
    }

    fn bar(&mut self, total: u64) -> &ProgressBar {
        let stale = self.progress.as_ref().map_or(true, |bar| bar.length() != Some(total));
        if stale {
            let bar = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
            ) {
                bar.set_style(style.progress_chars("=>-"));
            }
            self.progress = Some(bar);
        }
        self.progress.get_or_insert_with(|| ProgressBar::new(total))
    }

    fn append_position(&self, position: Position) -> std::io::Result<()> {
        let Some(path) = &self.positions else {
            return Ok(());
        };

        let record = PositionRecord {
            latitude: position.latitude,
            longitude: position.longitude,
        };
        let line = serde_json::to_string(&record)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)
    }
}

/// Path for the n-th payload: the output itself first, then `name-1.ext`, ...
pub fn numbered_output(output: &Path, index: usize) -> PathBuf {
    if index == 0 {
        return output.to_path_buf();
    }

    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match output.extension() {
        Some(ext) => format!("{}-{}.{}", stem, index, ext.to_string_lossy()),
        None => format!("{}-{}", stem, index),
    };
    output.with_file_name(name)
}

impl TransferSink for FileSink {
    fn on_progress(&mut self, bytes_received: u64, total_bytes: u32) {
        self.bar(total_bytes as u64).set_position(bytes_received);
    }

    fn on_position(&mut self, position: Position) {
        println!(
            "{} position {:.6},{:.6}",
            "@".cyan(),
            position.latitude,
            position.longitude
        );
        if let Err(e) = self.append_position(position) {
            tracing::warn!("Failed to record position: {}", e);
        }
    }

    fn on_complete(&mut self, transfer: &CompletedTransfer) -> std::io::Result<()> {
        if let Some(bar) = self.progress.take() {
            bar.finish_and_clear();
        }

        let path = numbered_output(&self.output, self.received);
        fs::write(&path, &transfer.data)?;
        self.received += 1;

        let stats = &transfer.stats;
        println!(
            "{} Received {} bytes over {} segments in {:.3}s ({:.0} bytes/s)",
            "✓".green(),
            stats.bytes,
            stats.chunks_accepted,
            stats.duration.as_secs_f64(),
            stats.throughput()
        );
        if stats.retransmit_rounds > 0 {
            println!(
                "{} {} retransmission rounds, {} MISS frames",
                "!".yellow(),
                stats.retransmit_rounds,
                stats.miss_frames_sent
            );
        }
        println!("Saved to {}", path.display());
        println!("blake3 {}", blake3::hash(&transfer.data).to_hex());
        Ok(())
    }
}

/// Resolve the receiver configuration: file first, then explicit flags
pub fn resolve_config(options: &ReceiveOptions) -> Result<LorapicConfig> {
    let mut config = LorapicConfig::load(options.config.as_deref())?;

    if let Some(chunk_size) = options.chunk_size {
        config.receiver.chunk_size = chunk_size;
    }
    if let Some(timeout_ms) = options.timeout_ms {
        config.receiver.retransmission_timeout_ms = timeout_ms;
    }
    if let Some(max_rounds) = options.max_rounds {
        config.receiver.max_retransmit_rounds = Some(max_rounds);
    }

    config.receiver.validate()?;
    Ok(config)
}

pub fn execute(options: &ReceiveOptions) -> Result<()> {
    let config = resolve_config(options)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(run(options, config))
}

async fn run(options: &ReceiveOptions, config: LorapicConfig) -> Result<()> {
    let device = options.device.clone();
    info!("Opening modem at {}", device);

    let reader = tokio::fs::File::open(&device)
        .await
        .with_context(|| format!("Failed to open device for reading: {}", device))?;
    let writer = tokio::fs::OpenOptions::new()
        .write(true)
        .open(&device)
        .await
        .with_context(|| format!("Failed to open device for writing: {}", device))?;

    let reopen_path = device.clone();
    let mut link = ModemLink::new(reader, writer)
        .with_reopen(move || std::fs::File::open(&reopen_path).map(tokio::fs::File::from_std));

    if options.configure {
        link.configure(&config.rf)
            .await
            .context("Modem configuration failed")?;
    }

    let mut receiver = Receiver::new(link, config.receiver);
    if options.once {
        receiver = receiver.max_transfers(1);
    }

    let mut sink = FileSink::new(&options.output, options.positions.as_deref());
    let shutdown = async {
        // Without a signal handler only a fatal error or --once ends reception
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let completed = receiver
        .run_until(&mut sink, shutdown)
        .await
        .context("Reception failed")?;

    info!("Reception finished after {} transfer(s)", completed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_output() {
        let base = Path::new("/tmp/out/image.jpg");
        assert_eq!(numbered_output(base, 0), PathBuf::from("/tmp/out/image.jpg"));
        assert_eq!(numbered_output(base, 2), PathBuf::from("/tmp/out/image-2.jpg"));
        assert_eq!(
            numbered_output(Path::new("capture"), 1),
            PathBuf::from("capture-1")
        );
    }

    #[test]
    fn test_flags_override_config() {
        let options = ReceiveOptions {
            chunk_size: Some(128),
            max_rounds: Some(4),
            ..Default::default()
        };
        let config = resolve_config(&options).unwrap();
        assert_eq!(config.receiver.chunk_size, 128);
        assert_eq!(config.receiver.max_retransmit_rounds, Some(4));
        assert_eq!(config.receiver.retransmission_timeout_ms, 10_000);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let options = ReceiveOptions {
            chunk_size: Some(0),
            ..Default::default()
        };
        assert!(resolve_config(&options).is_err());
    }
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use lorapic_cli::commands::{self, pack::PackOptions, receive::ReceiveOptions};
use lorapic_core::constants::DEFAULT_CHUNK_SIZE;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "lorapic")]
#[command(about = "Lorapic - Reliable image transfer over LoRa packet-test mode", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Receive transfers from a modem and save the payloads
    Receive {
        /// Serial device node of the modem
        #[arg(short, long)]
        device: String,

        /// Output file for the received payload
        #[arg(short, long)]
        output: String,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<String>,

        /// Send the radio configuration before listening
        #[arg(long)]
        configure: bool,

        /// Payload bytes per chunk (must match the sender)
        #[arg(long)]
        chunk_size: Option<u32>,

        /// Inactivity in milliseconds before missing chunks are requested
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Give up after this many retransmission rounds
        #[arg(long)]
        max_rounds: Option<u32>,

        /// Append position updates to this JSON lines file
        #[arg(long)]
        positions: Option<String>,

        /// Exit after the first completed transfer
        #[arg(long)]
        once: bool,
    },

    /// Build the sender's modem command script for a file
    Pack {
        /// Input file to send
        #[arg(short, long)]
        input: String,

        /// Output file for the command script
        #[arg(short, long)]
        output: String,

        /// Image width announced in the header
        #[arg(long, default_value = "0")]
        width: u32,

        /// Image height announced in the header
        #[arg(long, default_value = "0")]
        height: u32,

        /// Payload bytes per chunk
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: u32,

        /// Carry the first chunk in the header frame
        #[arg(long)]
        inline_first: bool,
    },

    /// Replay a captured modem log offline
    Decode {
        /// Captured modem output
        #[arg(short, long)]
        input: String,

        /// Write the payload here when the capture holds all of it
        #[arg(short, long)]
        output: Option<String>,

        /// Print the MISS frames a receiver would send
        #[arg(long)]
        report_gaps: bool,

        /// Payload bytes per chunk
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: u32,
    },

    /// Decode a single frame given as hex
    Inspect {
        /// Frame bytes in hex
        #[arg(long)]
        hex: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Execute command
    match cli.command {
        Commands::Receive {
            device,
            output,
            config,
            configure,
            chunk_size,
            timeout_ms,
            max_rounds,
            positions,
            once,
        } => commands::receive::execute(&ReceiveOptions {
            device,
            output,
            config,
            configure,
            chunk_size,
            timeout_ms,
            max_rounds,
            positions,
            once,
        }),

        Commands::Pack {
            input,
            output,
            width,
            height,
            chunk_size,
            inline_first,
        } => commands::pack::execute(
            &input,
            &output,
            &PackOptions {
                width,
                height,
                chunk_size,
                inline_first,
            },
        )
        .map(|_| ()),

        Commands::Decode {
            input,
            output,
            report_gaps,
            chunk_size,
        } => commands::decode::execute(&input, output.as_deref(), report_gaps, chunk_size)
            .map(|_| ()),

        Commands::Inspect { hex } => commands::inspect::execute(&hex),
    }
}

//! framecast-cli - Command-line client for framecast
//!
//! Connects to a server, completes the key exchange, and prints the
//! decrypted frame stream.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use commands::OutputFormat;
use framecast_client::{Client, ConnectionConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "framecast-cli")]
#[command(about = "Command-line client for the framecast streaming server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Raw,
    Hex,
    Summary,
}

impl From<Format> for OutputFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Raw => OutputFormat::Raw,
            Format::Hex => OutputFormat::Hex,
            Format::Summary => OutputFormat::Summary,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print received frames
    Recv {
        /// Server address
        #[arg(short, long, default_value = "127.0.0.1:9999", env = "FRAMECAST_SERVER")]
        server: SocketAddr,

        /// Stop after this many frames
        #[arg(short = 'n', long)]
        count: Option<u64>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "summary")]
        format: Format,

        /// Handshake timeout in milliseconds
        #[arg(long, default_value = "5000")]
        handshake_timeout_ms: u64,

        /// Legacy RSA modulus (decimal); selects the v1 key exchange
        #[arg(long, requires_all = ["public_exponent", "private_exponent"])]
        modulus: Option<String>,

        /// Legacy RSA public exponent (decimal)
        #[arg(long, requires = "modulus")]
        public_exponent: Option<String>,

        /// Legacy RSA private exponent (decimal)
        #[arg(long, requires = "modulus", env = "FRAMECAST_PRIVATE_EXPONENT")]
        private_exponent: Option<String>,
    },

    /// Generate an RSA key pair for the legacy key exchange
    Keygen {
        /// Modulus size in bits
        #[arg(short, long, default_value = "2048")]
        bits: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen { bits } => {
            let keys = commands::keygen(bits).map_err(|e| {
                eprintln!("{}: {}", "Key generation failed".red(), e);
                e
            })?;
            println!("modulus          = {}", keys.modulus);
            println!("public_exponent  = {}", keys.public_exponent);
            println!("private_exponent = {}", keys.private_exponent);
        }
        Commands::Recv {
            server,
            count,
            format,
            handshake_timeout_ms,
            modulus,
            public_exponent,
            private_exponent,
        } => {
            let mut config = ConnectionConfig::new(server)
                .with_handshake_timeout(Duration::from_millis(handshake_timeout_ms));

            if let (Some(n), Some(e), Some(d)) = (modulus, public_exponent, private_exponent) {
                match commands::parse_legacy_keys(&n, &e, &d) {
                    Ok((public, private)) => {
                        config = config.with_legacy_keys(public, private);
                    }
                    Err(msg) => {
                        eprintln!("{}: {}", "Error".red(), msg);
                        std::process::exit(1);
                    }
                }
            }

            let client = Client::new(config);
            client.connect().await.map_err(|e| {
                eprintln!("{}: {}", "Connection failed".red(), e);
                e
            })?;

            if let Some(scheme) = client.scheme().await {
                eprintln!(
                    "{} to {} ({})",
                    "Connected".green(),
                    server.to_string().cyan(),
                    scheme.as_str().yellow()
                );
            }

            match commands::receive(&client, count, format.into()).await {
                Ok(received) => {
                    eprintln!("{} {} frame(s)", "Received".green(), received);
                }
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    std::process::exit(1);
                }
            }

            client.close().await?;
        }
    }

    Ok(())
}

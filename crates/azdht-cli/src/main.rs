//! azdht CLI
//!
//! NAT discovery and Vivaldi coordinate tooling for an Azureus-compatible
//! DHT node.

mod config;
mod progress;

use azdht_discovery::vivaldi::{
    PositionType, decode_position, decode_position_list, encode_position,
};
use azdht_discovery::{DetectionMode, NatDetector, NatInfo, VivaldiEngine, VivaldiV1};
use clap::{Parser, Subcommand};
use console::style;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use config::Config;
use progress::{DiscoveryProgress, format_elapsed, format_rtt};

/// azdht - network self-discovery for DHT nodes
#[derive(Parser)]
#[command(name = "azdht")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover the external address and NAT type
    Nat {
        /// Local IPv4 address to probe from
        #[arg(short, long)]
        bind: Option<String>,

        /// Detection mode (basic or full)
        #[arg(long)]
        mode: Option<DetectionMode>,

        /// STUN server to use instead of the configured list (repeatable)
        #[arg(short, long = "server")]
        servers: Vec<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Vivaldi coordinate tools
    Vivaldi {
        #[command(subcommand)]
        command: VivaldiCommands,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum VivaldiCommands {
    /// Replay RTT samples (`rtt x y h err` per line) through an engine
    Update {
        /// Sample file
        #[arg(short, long)]
        samples: PathBuf,

        /// Seed for the perturbation source
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Estimate the RTT between two coordinates given as `x,y,h`
    Estimate {
        /// First coordinate
        #[arg(long, allow_hyphen_values = true)]
        a: String,

        /// Second coordinate
        #[arg(long, allow_hyphen_values = true)]
        b: String,
    },

    /// Decode a hex-encoded V1 coordinate
    Decode {
        /// Hex payload
        hex: String,

        /// Payload is a framed position list
        #[arg(long)]
        list: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&config_path)?,
    };

    // Initialize logging
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Nat {
            bind,
            mode,
            servers,
            json,
        } => {
            discover_nat(config, bind, mode, servers, json).await?;
        }
        Commands::Vivaldi { command } => match command {
            VivaldiCommands::Update { samples, seed } => replay_samples(&samples, seed)?,
            VivaldiCommands::Estimate { a, b } => estimate(&a, &b)?,
            VivaldiCommands::Decode { hex, list } => decode(&hex, list)?,
        },
        Commands::Config { command } => match command {
            ConfigCommands::Init { force } => init_config(&config_path, force)?,
            ConfigCommands::Show => print!("{}", toml::to_string_pretty(&config)?),
        },
    }

    Ok(())
}

/// Run NAT discovery
async fn discover_nat(
    mut config: Config,
    bind: Option<String>,
    mode: Option<DetectionMode>,
    servers: Vec<String>,
    json: bool,
) -> anyhow::Result<()> {
    if let Some(bind) = bind {
        config.network.bind_addr = bind;
    }
    if let Some(mode) = mode {
        config.stun.mode = mode;
    }
    if !servers.is_empty() {
        config.stun.servers = servers;
    }
    config.validate()?;

    let local = config.parse_bind_addr()?;
    let detector = NatDetector::with_config(config.detector_config()?);

    // Ctrl-C aborts pending probes
    let token = detector.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    tracing::info!(
        "Discovering NAT from {local} ({} mode, {} servers)",
        config.stun.mode,
        config.stun.servers.len()
    );

    let progress = (!json).then(|| DiscoveryProgress::new("Probing STUN servers..."));
    let started = Instant::now();
    let result = detector.discover_nat(SocketAddr::V4(local)).await;
    let elapsed = started.elapsed();

    let info = match result {
        Ok(info) => info,
        Err(e) => {
            if let Some(progress) = &progress {
                progress.abandon();
            }
            anyhow::bail!("NAT discovery failed: {e}");
        }
    };

    if let Some(progress) = &progress {
        progress.finish_with_message(format!("Done in {}", format_elapsed(elapsed)));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print_nat_info(&info);
    }

    Ok(())
}

fn print_nat_info(info: &NatInfo) {
    println!("NAT type: {}", style(info.nat_type).bold());
    println!("Local address: {}", info.local);
    match info.external {
        Some(external) => println!("External address: {}", style(external).cyan()),
        None => println!("External address: {}", style("unknown").dim()),
    }
    if let Some(server) = &info.server {
        println!("STUN server: {server}");
    }
    println!(
        "Publicly reachable: {}",
        if info.nat_type.is_publicly_reachable() {
            style("yes").green()
        } else {
            style("no").yellow()
        }
    );
}

/// Replay a sample file through a fresh engine
fn replay_samples(path: &Path, seed: Option<u64>) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(path)?;
    let mut engine = seed.map_or_else(VivaldiEngine::new, VivaldiEngine::with_seed);

    let mut applied = 0usize;
    let mut rejected = 0usize;
    let mut resets = 0usize;
    let mut convergences = 0usize;

    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (rtt, peer, peer_error) = parse_sample(line)
            .map_err(|e| anyhow::anyhow!("{}:{}: {e}", path.display(), line_no + 1))?;

        match engine.update(rtt, &peer, peer_error) {
            Ok(report) => {
                applied += 1;
                resets += usize::from(report.reset);
                convergences += usize::from(report.converged);
            }
            Err(e) => {
                tracing::warn!("line {}: sample rejected: {e}", line_no + 1);
                rejected += 1;
            }
        }
    }

    let position = engine.position();
    println!("Samples applied: {applied} (rejected {rejected})");
    println!("Forced convergence steps: {convergences}, resets: {resets}");
    println!("Coordinate: {}", style(position).bold());
    println!("Wire (V1): {}", hex::encode(encode_position(&position.into())));

    Ok(())
}

/// Print distance and RTT estimate between two coordinates
fn estimate(a: &str, b: &str) -> anyhow::Result<()> {
    let a = parse_coordinate(a)?;
    let b = parse_coordinate(b)?;

    println!("Distance: {:.2} ms", a.distance(&b));
    println!("RTT estimate: {}", format_rtt(a.estimate_rtt(&b)));

    Ok(())
}

/// Decode a hex coordinate payload
fn decode(payload: &str, list: bool) -> anyhow::Result<()> {
    let bytes = hex::decode(payload.trim())?;

    if list {
        let positions = decode_position_list(&bytes)?;
        println!("{} decodable position(s)", positions.len());
        for position in positions {
            if let Some(v1) = position.as_v1() {
                println!("  V1 {v1}");
            }
        }
    } else {
        let position = decode_position(PositionType::V1, &bytes)?;
        if let Some(v1) = position.as_v1() {
            println!("V1 {v1}");
        }
    }

    Ok(())
}

/// Write a default configuration file
fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Configuration already exists at {} (use --force to overwrite)",
            path.display()
        );
    }

    Config::default().save(path)?;
    println!("Configuration written to {}", path.display());
    Ok(())
}

/// Parse `x,y,h`
fn parse_coordinate(s: &str) -> anyhow::Result<VivaldiV1> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()?;

    match parts.as_slice() {
        [x, y, h] => Ok(VivaldiV1::new(*x, *y, *h)),
        _ => anyhow::bail!("Expected coordinate as x,y,h, got '{s}'"),
    }
}

/// Parse `rtt x y h err`
fn parse_sample(line: &str) -> anyhow::Result<(f32, VivaldiV1, f32)> {
    let fields = line
        .split_whitespace()
        .map(str::parse::<f32>)
        .collect::<Result<Vec<_>, _>>()?;

    match fields.as_slice() {
        [rtt, x, y, h, err] => Ok((*rtt, VivaldiV1::new(*x, *y, *h).with_error(*err), *err)),
        _ => anyhow::bail!("Expected 'rtt x y h err', got {} fields", fields.len()),
    }
}

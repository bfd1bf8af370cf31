use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tessera_node::{cli, logging, NodeConfig};
use tessera_types::FilAmount;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Decentralized storage deal management and verification", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./tessera-config.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and node key
    Init {
        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Generate a new node key (owner-readable file)
    Keygen {
        /// Key file to write; defaults to the configured key path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Replace an existing key file
        #[arg(long)]
        force: bool,
    },

    /// Archive files and directories into a TCAR file
    Archive {
        /// Files or directories to archive
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Archive file to write
        #[arg(short, long)]
        out: PathBuf,
    },

    /// List the roots, blocks and files of an archive
    Inspect {
        /// Archive file
        car: PathBuf,
    },

    /// Extract one file from an archive
    Extract {
        /// Archive file
        car: PathBuf,

        /// Path of the file inside the archive, e.g. `photos/a.jpg`
        path: String,

        /// Where to write the file
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Compute the piece commitment of an archive
    Commp {
        /// Archive file
        car: PathBuf,

        /// Minimum padded sector size in bytes (0 picks the smallest fit)
        #[arg(long, default_value_t = 0)]
        sector_size: u64,
    },

    /// Plan replicas and duration for a payload under a budget
    Plan {
        /// Payload size in bytes
        #[arg(long)]
        size: u64,

        /// Budget in FIL, e.g. `0.5`
        #[arg(long)]
        budget: FilAmount,

        /// Minimum number of replicas
        #[arg(long)]
        replicas: Option<usize>,

        /// Provider catalog (JSON)
        #[arg(long)]
        catalog: PathBuf,
    },

    /// Show the chunk size chosen for a payload size
    Chunking {
        /// Payload size in bytes
        #[arg(long)]
        size: u64,
    },

    /// Store a dataset with simulated providers and ledger
    Simulate {
        /// Files or directories to store
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Budget in FIL
        #[arg(long, default_value = "1")]
        budget: FilAmount,

        /// Minimum number of replicas
        #[arg(long)]
        replicas: Option<usize>,

        /// Provider catalog (JSON) to simulate instead of the built-in one
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Priority order: CLI args > ENV vars > Config file > Defaults
    let mut config = NodeConfig::load(cli.config.as_deref())?;
    config.apply_env_overrides();
    config.validate().context("Invalid configuration")?;

    if let Err(e) = logging::init_logging(&config.logging, cli.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(format!(
                "tessera={}",
                logging::effective_level(&config.logging, cli.verbose)
            )))
            .try_init();
    }

    match cli.command {
        Commands::Init { output } => {
            let (config_path, key_path) = cli::init_node(&output)?;
            println!("Configuration: {}", config_path.display());
            println!("Node key:      {}", key_path.display());
            Ok(())
        }

        Commands::Keygen { output, force } => {
            let path = output.unwrap_or_else(|| config.key_path());
            let keypair = cli::generate_key(&path, force)?;
            println!("Key file:   {}", path.display());
            println!("Public key: {}", keypair.public_key());
            Ok(())
        }

        Commands::Archive { paths, out } => {
            let summary = cli::archive_paths(&config, &paths, &out)?;
            info!(
                root = %summary.root,
                piece_cid = %summary.piece_cid,
                out = %out.display(),
                "Archive written"
            );
            print_json(&summary)
        }

        Commands::Inspect { car } => print_json(&cli::inspect_archive(&car)?),

        Commands::Extract { car, path, out } => {
            let written = cli::extract_from_archive(&car, &path, &out)?;
            println!("{} bytes written to {}", written, out.display());
            Ok(())
        }

        Commands::Commp { car, sector_size } => {
            let commitment = cli::compute_commp(&car, sector_size)?;
            println!("Piece CID:     {}", commitment.piece_cid());
            println!("Padded size:   {}", commitment.padded_size);
            println!("Unpadded size: {}", commitment.unpadded_size);
            Ok(())
        }

        Commands::Plan {
            size,
            budget,
            replicas,
            catalog,
        } => {
            let replicas = replicas.unwrap_or(config.deals.min_replicas);
            print_json(&cli::plan_storage(&config, size, budget, replicas, &catalog)?)
        }

        Commands::Chunking { size } => print_json(&cli::chunking_plan(&config, size)),

        Commands::Simulate {
            paths,
            budget,
            replicas,
            catalog,
        } => {
            let replicas = replicas.unwrap_or(config.deals.min_replicas);
            let report = cli::run_simulation(&config, &paths, budget, replicas, catalog.as_deref()).await?;
            if report.deals.iter().any(|d| !d.verified) {
                warn!("Some simulated deals did not verify");
            }
            print_json(&report)
        }
    }
}

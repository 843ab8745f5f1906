//! null.fs node daemon
//!
//! Loads a node configuration, recovers every volume, then serves the pull
//! endpoint and runs one sync loop per volume until interrupted.
//!
//! # Usage
//!
//! ```text
//! nullfsd                          # uses ./nullfs.yaml
//! nullfsd -c node-b.yaml -v        # another config, debug logging
//! nullfsd -c node-b.yaml --check   # validate and print a summary
//! ```

mod daemon;

use clap::Parser;
use nullfs_sync_engine::NodeConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Peer-to-peer file synchronization daemon.
#[derive(Parser, Debug)]
#[command(name = "nullfsd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the node configuration (YAML)
    #[arg(short, long, default_value = "nullfs.yaml")]
    config: PathBuf,

    /// Override the configured data directory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Validate the configuration, print a summary and exit
    #[arg(long)]
    check: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose.
    let default = if cli.verbose {
        "warn,nullfs=debug"
    } else {
        "warn,nullfs=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = NodeConfig::load(&cli.config).await?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    if cli.check {
        print!("{}", daemon::summary(&config));
        return Ok(());
    }
    daemon::run(config).await
}

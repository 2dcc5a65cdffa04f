//! fieldsync CLI
//!
//! Keeps a local folder of files in sync with fields of remote records.
//!
//! # Commands
//!
//! - `watch` - Watch the configured roots and sync changes (default)
//! - `push` - Upload one file
//! - `pull` - Download one file
//! - `status` - Show the sync state of one file

mod client;
mod commands;

use clap::{Parser, Subcommand};
use fieldsync_engine::SyncConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Sync local files with fields of remote records.
#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(global = true, short, long, default_value = "fieldsync.json")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the configured roots and sync changes
    Watch {
        /// Download every file under every root before watching
        #[arg(long)]
        resync: bool,
    },

    /// Upload one file, refusing if the instance changed
    Push {
        /// File path relative to the first root
        path: PathBuf,
    },

    /// Download one file
    Pull {
        /// File path relative to the first root
        path: PathBuf,
    },

    /// Show the sync state of one file
    Status {
        /// File path relative to the first root
        path: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Watch { resync: false });

    if let Commands::Version = command {
        println!("fieldsync CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("fieldsync engine v{}", fieldsync_engine::VERSION);
        return Ok(());
    }

    let config = SyncConfig::load(&cli.config)?;

    // Initialize logging
    let level = if cli.verbose || config.debug {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match command {
        Commands::Watch { resync } => commands::watch::run(config, resync).await?,
        Commands::Push { path } => commands::push::run(config, &path).await?,
        Commands::Pull { path } => commands::pull::run(config, &path).await?,
        Commands::Status { path, format } => commands::status::run(config, &path, &format).await?,
        Commands::Version => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_is_the_default_command() {
        let cli = Cli::try_parse_from(["fieldsync", "--config", "dev.json"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("dev.json"));
    }

    #[test]
    fn parses_push_path() {
        let cli = Cli::try_parse_from(["fieldsync", "push", "script_includes/Util.js", "-v"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Some(Commands::Push { path }) => assert_eq!(path, PathBuf::from("script_includes/Util.js")),
            _ => panic!("expected push"),
        }
    }
}

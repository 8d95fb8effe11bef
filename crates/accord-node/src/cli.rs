use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Accord - Proof of Collaboration node
#[derive(Parser)]
#[command(name = "accord")]
#[command(about = "Accord node and utilities")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an Accord node
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
    },

    /// Initialize a new node configuration
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Generate a new keypair
    Keygen {
        /// Output file for secret key
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show node status
    Status {
        /// HTTP endpoint
        #[arg(short, long, default_value = "http://127.0.0.1:8080")]
        endpoint: String,
    },
}

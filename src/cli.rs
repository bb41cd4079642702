use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Verbose logging (same as RUST_LOG=debug)
    #[clap(short, long, global = true, default_value = "false")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheAction {
    /// Delete all cached indexes
    Clear {
        /// Also delete downloaded model files
        #[clap(long, default_value = "false")]
        models: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show embedding model status
    Status {},

    /// Download (if needed) and load the embedding model
    Load {},

    /// Build the search index for a file, or reuse the cached one
    Index {
        /// A csv, json, txt or md file
        file: PathBuf,
    },

    /// Search a file by meaning
    Search {
        /// A csv, json, txt or md file
        file: PathBuf,

        /// Search query. Required unless --interactive
        #[clap(required_unless_present = "interactive")]
        query: Option<String>,

        /// Maximum number of results
        #[clap(short = 'k', long)]
        top_k: Option<usize>,

        /// Prompt for queries until an empty line
        #[clap(short, long, default_value = "false")]
        interactive: bool,
    },

    /// Search every supported file in a directory, best match per file
    Dir {
        /// Directory to index (not recursive)
        dir: PathBuf,

        /// Search query
        query: String,

        /// Maximum number of files
        #[clap(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Manage cached indexes
    Cache {
        #[clap(subcommand)]
        action: CacheAction,
    },
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "extcatalog")]
#[command(about = "Import editor extension metadata from the marketplace into SQLite", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    /// SQLite database path (default: data/extensions.db)
    #[arg(long, global = true)]
    pub(crate) db: Option<PathBuf>,

    /// JSON config file (default: ./extcatalog.json if present)
    #[arg(long, global = true)]
    pub(crate) config: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    pub(crate) verbose: bool,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch and store one extension (publisher.name) or every entry of a .txt list, in order.
    Import {
        /// publisher.name, or a .txt file with one identifier per line (# comments allowed)
        input: String,
    },

    /// Store pre-fetched .json record files from a directory using parallel workers.
    ImportJson {
        /// Directory holding one record per .json file (default: the data directory)
        dir: Option<PathBuf>,
        /// Workers per batch
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Fetch extensions and save each as <publisher.name>.json without touching the database.
    Fetch {
        /// Identifiers (publisher.name)
        identifiers: Vec<String>,
        /// Read additional identifiers from a list file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Workers per batch
        #[arg(short = 't', long = "threads")]
        workers: Option<usize>,
        /// Output directory (default: the data directory)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Download the latest .vsix of one extension or every entry of a .txt list, skipping files already present.
    Download {
        /// publisher.name, or a .txt file with one identifier per line
        input: String,
        /// Output directory (default: ./extensions)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Write the whole table as the JSON snapshot the browsing UI loads.
    Export {
        /// Output file (default: public/data/extensions.json next to the data directory)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Print the number of stored extensions.
    Count,

    /// Print one stored extension as JSON.
    Show {
        /// publisher.name
        name: String,
    },

    /// Remove duplicate lines from an identifier list and sort it.
    Dedupe { list: PathBuf },
}

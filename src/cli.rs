use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliOptions {
    /// SQL dump to import
    #[arg(short, long)]
    pub input: PathBuf,

    /// Target SQLite database (created if missing)
    #[arg(short, long)]
    pub target: PathBuf,

    /// Optional path to config file (YAML)
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Number of chunk worker threads (overrides config)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Connection pool size (overrides config)
    #[arg(long)]
    pub pool_size: Option<usize>,

    /// Maximum statements per chunk (overrides config)
    #[arg(long)]
    pub chunk_statements: Option<usize>,

    /// Maximum chunk size, in MiB (overrides config)
    #[arg(long)]
    pub chunk_mib: Option<u64>,

    /// Retries for transient chunk failures (overrides config)
    #[arg(long)]
    pub retries: Option<u32>,

    /// Execute the create-table statement(s) in this file before importing
    #[arg(long)]
    pub create_table: Option<PathBuf>,

    /// Print a schema-inference request built from N statements and exit
    #[arg(long, value_name = "N")]
    pub sample: Option<usize>,
}

pub fn parse() -> CliOptions {
    CliOptions::parse()
}

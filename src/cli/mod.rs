//! Command-line interface for vql.
//!
//! The binary loads one or more isolate record files, optionally back-fills
//! them from a metadata table and a lineage alias table, and then either
//! evaluates a single command or drops into the interactive prompt.
//!
//! ## Usage
//!
//! ```text
//! # Interactive session over one record file
//! vql isolates.txt
//!
//! # Gzipped input, metadata back-fill, alias expansion
//! vql isolates.txt.gz --metadata metadata.tsv --aliases alias_key.json
//!
//! # One-shot evaluation for scripting
//! vql isolates.txt --command "countries for from USA"
//!
//! # Pin the worker pool size
//! vql isolates.txt --threads 4
//! ```

use std::path::PathBuf;

use clap::Parser;

pub mod repl;

#[derive(Parser)]
#[command(name = "vql")]
#[command(author = "Fulcrum Genomics")]
#[command(version)]
#[command(about = "Set-algebra queries over viral genome isolate collections")]
#[command(
    long_about = "vql loads collections of viral genome isolates annotated with point mutations and answers interactive queries over them.\n\nThe query language supports:\n- Set algebra (+ - *) over clusters of isolates and patterns of mutations\n- Location, date, lineage, and mutation filters\n- Consensus-pattern computation and lineage classification\n- Tabular reports (countries, lineages, trends, frequencies, ...)"
)]
pub struct Cli {
    /// Isolate record files to load, plain or gzipped
    #[arg(required = false)]
    pub inputs: Vec<PathBuf>,

    /// Tab-separated metadata table for date/location/lineage back-fill
    #[arg(short, long)]
    pub metadata: Option<PathBuf>,

    /// JSON table of lineage aliases for sublineage expansion
    #[arg(short, long)]
    pub aliases: Option<PathBuf>,

    /// Evaluate one command and exit instead of starting the prompt
    #[arg(short, long)]
    pub command: Option<String>,

    /// Worker threads for ingestion and filtering (default: all cores)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// After loading, classify isolates that carry no lineage against the
    /// characteristic patterns of the lineages that do
    #[arg(long)]
    pub classify: bool,

    /// Count wildcard N calls in the `>` `<` `#` mutation-count filters
    #[arg(long)]
    pub count_wildcards: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod core;
mod eval;
mod ingest;
mod lineage;
mod query;
mod utils;

use crate::core::state::EngineState;

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    // Initialize logging based on verbosity flag
    let filter = if cli.verbose {
        EnvFilter::new("vql=debug,info")
    } else {
        EnvFilter::new("vql=warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }
    let workers = rayon::current_num_threads();

    let mut state = EngineState::new();
    state.exclude_n_from_counts = !cli.count_wildcards;

    for path in &cli.inputs {
        let summary = ingest::loader::load_records(path, &mut state, workers)?;
        println!(
            "Loaded {} isolates from {} ({} duplicates skipped)",
            summary.loaded,
            path.display(),
            summary.duplicates
        );
    }
    if let Some(path) = &cli.metadata {
        let summary = ingest::metadata::load_metadata(path, &mut state)?;
        println!(
            "Metadata: {} rows, {} isolates updated",
            summary.rows, summary.updated
        );
    }
    if let Some(path) = &cli.aliases {
        let count = ingest::aliases::load_aliases(path, &mut state)?;
        println!("Loaded {count} lineage aliases");
    }
    if cli.classify {
        let count = lineage::classifier::classify_unassigned(&mut state);
        println!("Classified {count} unassigned isolates");
    }

    if let Some(command) = &cli.command {
        let result = eval::evaluate(command, &mut state);
        let text = result.render(&state);
        if !text.is_empty() {
            println!("{text}");
        }
        if matches!(result, eval::EvalResult::Error(_)) {
            std::process::exit(1);
        }
    } else {
        cli::repl::run(&mut state)?;
    }

    Ok(())
}

//! # vql
//!
//! A library for interactive set-algebra queries over collections of viral
//! genome isolates annotated with point mutations.
//!
//! Genomic surveillance produces millions of sequenced isolates, each reduced
//! to the set of mutations it carries relative to a reference sequence.
//! Answering questions like "how did N501Y spread through Europe before
//! February 2021" requires set operations over those collections, not a
//! general-purpose database.
//!
//! `vql` keeps the whole collection in memory as an arena of isolates and
//! exposes a small query language over it: named clusters of isolates, named
//! patterns of mutations, filters by location/date/lineage/mutation content,
//! consensus patterns, distance-based lineage classification, and tabular
//! reports.
//!
//! ## Example
//!
//! ```rust
//! use vql::{evaluate, EngineState, EvalResult};
//!
//! let mut state = EngineState::new();
//! // (records are normally loaded with `ingest::loader::load_records`)
//!
//! match evaluate("from USA containing N501Y", &mut state) {
//!     EvalResult::Cluster(cluster) => println!("{} isolates", cluster.len()),
//!     other => println!("{}", other.render(&state)),
//! }
//! ```
//!
//! ## Modules
//!
//! - [`core`]: isolates, mutations, clusters, patterns, lists, engine state
//! - [`ingest`]: concurrent record loading, metadata back-fill, alias tables
//! - [`query`]: tokenizer and recursive-descent parser for the query language
//! - [`eval`]: the evaluator (set algebra, filters, reports, broadcasting)
//! - [`lineage`]: consensus patterns and the lineage classifier
//! - [`cli`]: command-line interface and the interactive prompt

pub mod cli;
pub mod core;
pub mod eval;
pub mod ingest;
pub mod lineage;
pub mod query;
pub mod utils;

pub use crate::core::state::EngineState;
pub use crate::eval::{evaluate, EvalResult};

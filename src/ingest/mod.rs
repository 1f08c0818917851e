//! Ingestion: the partitioned record loader, the metadata back-fill, and the
//! lineage alias table.
//!
//! Ingestion errors abort only the load command that raised them; previously
//! loaded state is never touched by a failed load.

use thiserror::Error;

pub mod aliases;
pub mod loader;
pub mod metadata;

pub use aliases::load_aliases;
pub use loader::{load_records, LoadSummary};
pub use metadata::{load_metadata, MetadataSummary};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File too small to be a record file: {path} ({size} bytes)")]
    FileTooSmall { path: String, size: usize },

    #[error("Invalid record format: {0}")]
    Format(String),

    #[error("Metadata table is missing required column: {0}")]
    MissingColumn(String),
}

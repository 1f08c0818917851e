//! Consensus patterns and distance-based lineage classification.

pub mod classifier;
pub mod consensus;

pub use classifier::{
    build_all_lineage_patterns, build_lineage_patterns, classify, classify_unassigned,
    LineagePattern,
};
pub use consensus::{consensus, consensus_pair, DEFAULT_THRESHOLD};

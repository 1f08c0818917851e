//! Core data model: mutations, isolates, clusters, patterns, lists, and the
//! engine state that owns them.

pub mod cluster;
pub mod dates;
pub mod isolate;
pub mod list;
pub mod mutation;
pub mod state;

pub use cluster::{Cluster, Pattern};
pub use isolate::Isolate;
pub use list::{Cell, List, MergeOp};
pub use mutation::{InsertionCodes, Mutation, Protein, ProteinMutation};
pub use state::{EngineState, Namespace};

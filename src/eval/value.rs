use thiserror::Error;

use crate::core::cluster::{Cluster, Pattern};
use crate::core::list::List;
use crate::core::state::{EngineState, Namespace};

/// The result of evaluating one command. Every front end (REPL, server,
/// tests) receives exactly this.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalResult {
    Cluster(Cluster),
    Pattern(Pattern),
    List(List),
    Scalar(f64),
    Unit,
    Error(String),
}

impl EvalResult {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Cluster(_) => "cluster",
            Self::Pattern(_) => "pattern",
            Self::List(_) => "list",
            Self::Scalar(_) => "scalar",
            Self::Unit => "unit",
            Self::Error(_) => "error",
        }
    }

    /// Plain-text rendering for the REPL and for order-insensitive
    /// comparisons in tests
    pub fn render(&self, state: &EngineState) -> String {
        match self {
            Self::Cluster(c) => format!("{} isolates", c.len()),
            Self::Pattern(p) => p.render(&state.insertion_codes),
            Self::List(l) => l.render(&state.insertion_codes),
            Self::Scalar(x) => {
                if x.fract() == 0.0 {
                    format!("{}", *x as i64)
                } else {
                    format!("{x}")
                }
            }
            Self::Unit => String::new(),
            Self::Error(msg) => format!("Error: {msg}"),
        }
    }
}

/// Runtime evaluation errors. All but `Fatal` degrade to an empty result and
/// a warning; `Fatal` ends the session (it means the loaded data itself is
/// broken, not the query).
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Unknown identifier: '{0}'")]
    UnknownIdentifier(String),

    #[error("Operands of '{op}' have incompatible kinds: {left} and {right}")]
    KindMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("'{op}' needs {expected}, found {found}")]
    WrongKind {
        op: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Empty pattern where mutations are required for '{0}'")]
    EmptyPattern(&'static str),

    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Name '{name}' is already bound in the {existing} namespace")]
    NamespaceConflict { name: String, existing: Namespace },

    #[error("A {0} result cannot be bound to a name")]
    Unbindable(&'static str),

    #[error("No previous result for 'last'")]
    NoLastResult,

    #[error("List '{list}' has no row {index}")]
    IndexOutOfRange { list: String, index: usize },

    #[error("Row {index} of list '{list}' holds no cluster or pattern")]
    RowNotAddressable { list: String, index: usize },

    #[error("Fatal: {0}")]
    Fatal(String),
}

impl EvalError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

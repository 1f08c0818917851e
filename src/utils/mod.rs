//! Small shared helpers.

pub mod names;

pub use names::validate_name;

//! Query language front half: normalization, tokenization, and the
//! recursive-descent parser producing the AST the evaluator walks.

pub mod ast;
pub mod parser;
pub mod token;

pub use ast::Expr;
pub use parser::{parse, ParseError};
pub use token::{tokenize, ListKind, Token};

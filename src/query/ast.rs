use chrono::NaiveDate;

use crate::core::cluster::Pattern;
use crate::query::token::ListKind;

/// The abstract syntax tree of one command. A sum type owning boxed
/// children; the evaluator is a single visitor over it.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// The cluster of every loaded isolate (`all` / `world`)
    All,
    /// A name to resolve against the clusters/patterns/lists namespaces
    Ident(String),
    /// The previous command's result (`last`)
    Last,
    /// One row of a named list, `name[index]`
    ListIndex(String, usize),
    /// A literal mutation pattern written inline
    PatternLit(Pattern),
    Number(f64),

    Assign(String, Box<Expr>),
    Equality(Box<Expr>, Box<Expr>),
    Plus(Box<Expr>, Box<Expr>),
    Minus(Box<Expr>, Box<Expr>),
    Multiply(Box<Expr>, Box<Expr>),

    ConsensusFor(Box<Expr>),
    /// `patterns [n] expr`: the n most common full mutation patterns
    PatternsIn(Box<Expr>, usize),
    Diff(Box<Expr>, Box<Expr>),

    From(Box<Expr>, String),
    /// `containing [n] pattern`: keep isolates carrying at least n of the
    /// pattern's mutations (n = 0 means all of them)
    Containing(Box<Expr>, Box<Expr>, usize),
    NotContaining(Box<Expr>, Box<Expr>, usize),
    Before(Box<Expr>, NaiveDate),
    After(Box<Expr>, NaiveDate),
    Range(Box<Expr>, NaiveDate, NaiveDate),
    Named(Box<Expr>, String),
    Lineage(Box<Expr>, String),
    Sample(Box<Expr>, f64),
    GreaterThan(Box<Expr>, usize),
    LessThan(Box<Expr>, usize),
    EqualMutationCount(Box<Expr>, usize),

    /// A tabular report over a cluster (or broadcast over a cluster-valued
    /// list); the count is the optional row limit
    Report(ListKind, usize, Box<Expr>),
}

impl Expr {
    pub fn boxed(self) -> Box<Expr> {
        Box::new(self)
    }
}

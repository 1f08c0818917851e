//! The evaluator: a single visitor over the query AST, producing an
//! [`EvalResult`] and mutating engine state only through assignment.
//!
//! Every front end drives the engine through [`evaluate`]. A parse error or a
//! fatal data error surfaces as `EvalResult::Error`; other runtime errors
//! degrade to an empty result with a warning so the session continues.

pub mod algebra;
pub mod filters;
pub mod reports;
pub mod value;

use std::collections::HashMap;

use tracing::warn;

use crate::core::cluster::{Cluster, Pattern};
use crate::core::list::{Cell, List};
use crate::core::mutation::MutationError;
use crate::core::state::{EngineState, Namespace};
use crate::eval::filters::CountCmp;
use crate::lineage::consensus::{consensus, DEFAULT_THRESHOLD};
use crate::query::ast::Expr;
use crate::query::parse;
use crate::query::token::ListKind;
use crate::utils::names::validate_name;

pub use value::{EvalError, EvalResult};

/// Row cap for `patterns` when no count is given
const DEFAULT_PATTERN_ROWS: usize = 10;

/// Parse and evaluate one command against the engine state.
///
/// The command is atomic: a failed parse or evaluation leaves the namespaces
/// untouched, and only a successful result becomes `last`.
pub fn evaluate(command: &str, state: &mut EngineState) -> EvalResult {
    let expr = match parse(command, state) {
        Ok(expr) => expr,
        Err(err) => return EvalResult::Error(err.to_string()),
    };
    match eval_expr(&expr, state) {
        Ok(result) => {
            if let Err(err) = check_insertions(state, &result) {
                return EvalResult::Error(err.to_string());
            }
            state.last_result = Some(result.clone());
            result
        }
        Err(err) if err.is_fatal() => EvalResult::Error(err.to_string()),
        Err(err) => {
            warn!(command, error = %err, "evaluation failed");
            EvalResult::Unit
        }
    }
}

fn eval_expr(expr: &Expr, state: &mut EngineState) -> Result<EvalResult, EvalError> {
    match expr {
        Expr::All => Ok(EvalResult::Cluster(state.all_isolates())),
        Expr::Number(x) => Ok(EvalResult::Scalar(*x)),
        Expr::PatternLit(pattern) => Ok(EvalResult::Pattern(pattern.clone())),
        Expr::Ident(name) => resolve_ident(state, name),
        Expr::Last => state.last_result.clone().ok_or(EvalError::NoLastResult),
        Expr::ListIndex(name, index) => list_index(state, name, *index),

        Expr::Assign(name, value) => assign(state, name, value),
        Expr::Equality(a, b) => {
            let a = eval_expr(a, state)?;
            let b = eval_expr(b, state)?;
            Ok(algebra::equality(state, &a, &b))
        }
        Expr::Plus(a, b) => {
            let a = eval_expr(a, state)?;
            let b = eval_expr(b, state)?;
            algebra::add(state, a, b)
        }
        Expr::Minus(a, b) => {
            let a = eval_expr(a, state)?;
            let b = eval_expr(b, state)?;
            algebra::subtract(state, a, b)
        }
        Expr::Multiply(a, b) => {
            let a = eval_expr(a, state)?;
            let b = eval_expr(b, state)?;
            algebra::multiply(state, a, b)
        }

        Expr::ConsensusFor(operand) => {
            let cluster = expect_cluster(eval_expr(operand, state)?, "consensus")?;
            Ok(EvalResult::Pattern(consensus(
                state,
                &cluster,
                DEFAULT_THRESHOLD,
            )))
        }
        Expr::PatternsIn(operand, n) => {
            let cluster = expect_cluster(eval_expr(operand, state)?, "patterns")?;
            Ok(EvalResult::List(patterns_in(state, &cluster, *n)))
        }
        Expr::Diff(a, b) => {
            let left = eval_expr(a, state)?;
            let right = eval_expr(b, state)?;
            diff(state, left, right)
        }

        Expr::From(operand, place) => {
            let value = eval_expr(operand, state)?;
            apply_filter(state, value, "from", |s, c| filters::from_place(s, c, place))
        }
        Expr::Containing(operand, arg, n) => {
            let pattern = expect_pattern(eval_expr(arg, state)?, "containing")?;
            let value = eval_expr(operand, state)?;
            apply_filter(state, value, "containing", |s, c| {
                filters::containing(s, c, &pattern, *n)
            })
        }
        Expr::NotContaining(operand, arg, n) => {
            let pattern = expect_pattern(eval_expr(arg, state)?, "notcontaining")?;
            let value = eval_expr(operand, state)?;
            apply_filter(state, value, "notcontaining", |s, c| {
                filters::not_containing(s, c, &pattern, *n)
            })
        }
        Expr::Before(operand, pivot) => {
            let value = eval_expr(operand, state)?;
            apply_filter(state, value, "before", |s, c| filters::before(s, c, *pivot))
        }
        Expr::After(operand, pivot) => {
            let value = eval_expr(operand, state)?;
            apply_filter(state, value, "after", |s, c| filters::after(s, c, *pivot))
        }
        Expr::Range(operand, start, end) => {
            let value = eval_expr(operand, state)?;
            apply_filter(state, value, "range", |s, c| {
                filters::in_range(s, c, *start, *end)
            })
        }
        Expr::Named(operand, needle) => {
            let value = eval_expr(operand, state)?;
            apply_filter(state, value, "named", |s, c| filters::named(s, c, needle))
        }
        Expr::Lineage(operand, query) => {
            let value = eval_expr(operand, state)?;
            apply_filter(state, value, "lineage", |s, c| filters::lineage(s, c, query))
        }
        Expr::Sample(operand, amount) => {
            let value = eval_expr(operand, state)?;
            apply_filter(state, value, "sample", |_, c| filters::sample(c, *amount))
        }
        Expr::GreaterThan(operand, n) => {
            let value = eval_expr(operand, state)?;
            apply_filter(state, value, ">", |s, c| {
                filters::mutation_count(s, c, CountCmp::Greater, *n)
            })
        }
        Expr::LessThan(operand, n) => {
            let value = eval_expr(operand, state)?;
            apply_filter(state, value, "<", |s, c| {
                filters::mutation_count(s, c, CountCmp::Less, *n)
            })
        }
        Expr::EqualMutationCount(operand, n) => {
            let value = eval_expr(operand, state)?;
            apply_filter(state, value, "#", |s, c| {
                filters::mutation_count(s, c, CountCmp::Equal, *n)
            })
        }

        Expr::Report(kind, n, operand) => {
            let value = eval_expr(operand, state)?;
            match value {
                EvalResult::Cluster(cluster) => {
                    Ok(EvalResult::List(reports::report(state, *kind, *n, &cluster)))
                }
                EvalResult::List(list) => {
                    Ok(EvalResult::List(broadcast_report(state, *kind, *n, &list)))
                }
                other => Err(EvalError::WrongKind {
                    op: "list report",
                    expected: "cluster",
                    found: other.kind_name(),
                }),
            }
        }
    }
}

/// Every insertion in a result about to surface must decode through the
/// session's dictionary. A miss means the loaded data is broken, not the
/// query, so it ends the session.
fn check_insertions(state: &EngineState, result: &EvalResult) -> Result<(), EvalError> {
    match result {
        EvalResult::Pattern(pattern) => check_pattern(state, pattern),
        EvalResult::List(list) => check_list(state, list),
        _ => Ok(()),
    }
}

fn check_list(state: &EngineState, list: &List) -> Result<(), EvalError> {
    for row in &list.rows {
        for cell in row {
            match cell {
                Cell::Pattern(pattern) => check_pattern(state, pattern)?,
                Cell::NestedList(nested) => check_list(state, nested)?,
                _ => {}
            }
        }
    }
    Ok(())
}

fn check_pattern(state: &EngineState, pattern: &Pattern) -> Result<(), EvalError> {
    for mutation in pattern.mutations() {
        if let Some(code) = mutation.insertion_code() {
            if state.insertion_codes.decode(mutation.position, code).is_none() {
                let cause = MutationError::CorruptEncoding {
                    wildtype: mutation.wildtype,
                    position: mutation.position,
                    mutant: mutation.mutant,
                };
                return Err(EvalError::Fatal(cause.to_string()));
            }
        }
    }
    Ok(())
}

fn resolve_ident(state: &EngineState, name: &str) -> Result<EvalResult, EvalError> {
    if let Some(cluster) = state.clusters.get(name) {
        Ok(EvalResult::Cluster(cluster.clone()))
    } else if let Some(pattern) = state.patterns.get(name) {
        Ok(EvalResult::Pattern(pattern.clone()))
    } else if let Some(list) = state.lists.get(name) {
        Ok(EvalResult::List(list.clone()))
    } else {
        Err(EvalError::UnknownIdentifier(name.to_string()))
    }
}

/// `name[index]`: pull one row of a list out as the cluster or pattern it
/// embeds
fn list_index(state: &EngineState, name: &str, index: usize) -> Result<EvalResult, EvalError> {
    let list = state
        .lists
        .get(name)
        .ok_or_else(|| EvalError::UnknownIdentifier(name.to_string()))?;
    let row = list.rows.get(index).ok_or_else(|| EvalError::IndexOutOfRange {
        list: name.to_string(),
        index,
    })?;
    if let Some(cluster) = List::row_cluster(row) {
        return Ok(EvalResult::Cluster(cluster.clone()));
    }
    if let Some(pattern) = row.iter().find_map(|cell| match cell {
        Cell::Pattern(p) => Some(p),
        _ => None,
    }) {
        return Ok(EvalResult::Pattern(pattern.clone()));
    }
    Err(EvalError::RowNotAddressable {
        list: name.to_string(),
        index,
    })
}

fn assign(state: &mut EngineState, name: &str, expr: &Expr) -> Result<EvalResult, EvalError> {
    validate_name(state, name).map_err(|reason| EvalError::InvalidName {
        name: name.to_string(),
        reason,
    })?;
    let value = eval_expr(expr, state)?;
    let target = match &value {
        EvalResult::Cluster(_) => Namespace::Clusters,
        EvalResult::Pattern(_) => Namespace::Patterns,
        EvalResult::List(_) => Namespace::Lists,
        other => return Err(EvalError::Unbindable(other.kind_name())),
    };
    if let Some(existing) = state.namespace_of(name) {
        if existing != target {
            return Err(EvalError::NamespaceConflict {
                name: name.to_string(),
                existing,
            });
        }
    }
    match value {
        EvalResult::Cluster(cluster) => {
            let named = cluster.named(name);
            state.clusters.insert(name.to_string(), named.clone());
            Ok(EvalResult::Cluster(named))
        }
        EvalResult::Pattern(pattern) => {
            let named = pattern.named(name);
            state.patterns.insert(name.to_string(), named.clone());
            Ok(EvalResult::Pattern(named))
        }
        EvalResult::List(list) => {
            let named = list.named(name);
            state.lists.insert(name.to_string(), named.clone());
            Ok(EvalResult::List(named))
        }
        other => Err(EvalError::Unbindable(other.kind_name())),
    }
}

fn expect_cluster(value: EvalResult, op: &'static str) -> Result<Cluster, EvalError> {
    match value {
        EvalResult::Cluster(cluster) => Ok(cluster),
        EvalResult::List(list) => list.base_cluster.ok_or(EvalError::WrongKind {
            op,
            expected: "cluster",
            found: "list without a base cluster",
        }),
        other => Err(EvalError::WrongKind {
            op,
            expected: "cluster",
            found: other.kind_name(),
        }),
    }
}

fn expect_pattern(value: EvalResult, op: &'static str) -> Result<Pattern, EvalError> {
    match value {
        EvalResult::Pattern(pattern) if !pattern.is_empty() => Ok(pattern),
        EvalResult::Pattern(_) => Err(EvalError::EmptyPattern(op)),
        other => Err(EvalError::WrongKind {
            op,
            expected: "pattern",
            found: other.kind_name(),
        }),
    }
}

/// Apply a cluster filter to a value, broadcasting across cluster-valued
/// lists row by row
fn apply_filter<F>(
    state: &EngineState,
    value: EvalResult,
    op: &'static str,
    filter: F,
) -> Result<EvalResult, EvalError>
where
    F: Fn(&EngineState, &Cluster) -> Cluster,
{
    match value {
        EvalResult::Cluster(cluster) => Ok(EvalResult::Cluster(filter(state, &cluster))),
        EvalResult::List(list) => Ok(EvalResult::List(broadcast_filter(state, &list, &filter))),
        other => Err(EvalError::WrongKind {
            op,
            expected: "cluster",
            found: other.kind_name(),
        }),
    }
}

/// Rebuild each row of a cluster-valued list around its filtered sub-cluster,
/// refreshing the first count column to match
fn broadcast_filter(
    state: &EngineState,
    list: &List,
    filter: &dyn Fn(&EngineState, &Cluster) -> Cluster,
) -> List {
    let rows = list
        .rows
        .iter()
        .map(|row| match List::row_cluster(row) {
            Some(cluster) => {
                let filtered = filter(state, cluster);
                let mut out = Vec::with_capacity(row.len());
                let mut count_updated = false;
                for cell in row {
                    match cell {
                        Cell::Cluster(_) => out.push(Cell::Cluster(filtered.clone())),
                        Cell::Int(_) if !count_updated => {
                            count_updated = true;
                            out.push(Cell::Int(filtered.len() as i64));
                        }
                        other => out.push(other.clone()),
                    }
                }
                out
            }
            None => row.clone(),
        })
        .collect();
    List {
        name: String::new(),
        header: list.header.clone(),
        rows,
        base_cluster: list.base_cluster.as_ref().map(|c| filter(state, c)),
    }
}

/// Re-run a report against each row's sub-cluster, nesting the results
fn broadcast_report(state: &EngineState, kind: ListKind, n: usize, list: &List) -> List {
    let rows = list
        .rows
        .iter()
        .filter_map(|row| {
            List::row_cluster(row).map(|cluster| {
                let nested = reports::report(state, kind, n, cluster);
                vec![
                    row.first().cloned().unwrap_or(Cell::Text(String::new())),
                    Cell::NestedList(nested),
                ]
            })
        })
        .collect();
    let label = list.header.first().cloned().unwrap_or_default();
    List::new(vec![label, "Report".into()], rows)
}

/// The most common complete mutation patterns in a cluster
fn patterns_in(state: &EngineState, cluster: &Cluster, n: usize) -> List {
    let limit = if n == 0 { DEFAULT_PATTERN_ROWS } else { n };
    let mut groups: HashMap<&[crate::core::mutation::Mutation], Vec<u32>> = HashMap::new();
    for &index in cluster.indices() {
        groups
            .entry(state.isolate(index).mutations.as_slice())
            .or_default()
            .push(index);
    }

    let mut entries: Vec<(Pattern, Vec<u32>)> = groups
        .into_iter()
        .map(|(mutations, indices)| (Pattern::new(mutations.to_vec()), indices))
        .collect();
    entries.sort_by(|a, b| {
        b.1.len()
            .cmp(&a.1.len())
            .then_with(|| a.0.mutations().cmp(b.0.mutations()))
    });
    entries.truncate(limit);

    let rows = entries
        .into_iter()
        .map(|(pattern, indices)| {
            vec![
                Cell::Pattern(pattern),
                Cell::Int(indices.len() as i64),
                Cell::Cluster(Cluster::from_sorted(indices)),
            ]
        })
        .collect();
    List::new(
        vec!["Pattern".into(), "Count".into(), "Cluster".into()],
        rows,
    )
    .with_base(cluster.clone())
}

/// `diff a, b`: reduce each side to a pattern (a cluster contributes its
/// consensus) and report what separates them
fn diff(
    state: &EngineState,
    left: EvalResult,
    right: EvalResult,
) -> Result<EvalResult, EvalError> {
    // Identical clusters short-circuit to the degenerate report
    if let (EvalResult::Cluster(a), EvalResult::Cluster(b)) = (&left, &right) {
        if a.same_isolates(b) {
            let shared = consensus(state, a, DEFAULT_THRESHOLD);
            return Ok(EvalResult::List(reports::diff(
                &shared,
                &shared,
                side_name(&left, "left"),
                side_name(&right, "right"),
            )));
        }
    }
    let left_name = side_name(&left, "left").to_string();
    let right_name = side_name(&right, "right").to_string();
    let a = to_pattern(state, left)?;
    let b = to_pattern(state, right)?;
    Ok(EvalResult::List(reports::diff(&a, &b, &left_name, &right_name)))
}

fn side_name<'a>(value: &'a EvalResult, fallback: &'a str) -> &'a str {
    let name = match value {
        EvalResult::Cluster(c) => c.name.as_str(),
        EvalResult::Pattern(p) => p.name.as_str(),
        _ => "",
    };
    if name.is_empty() {
        fallback
    } else {
        name
    }
}

fn to_pattern(state: &EngineState, value: EvalResult) -> Result<Pattern, EvalError> {
    match value {
        EvalResult::Pattern(pattern) => Ok(pattern),
        EvalResult::Cluster(cluster) => Ok(consensus(state, &cluster, DEFAULT_THRESHOLD)),
        other => Err(EvalError::WrongKind {
            op: "diff",
            expected: "cluster or pattern",
            found: other.kind_name(),
        }),
    }
}

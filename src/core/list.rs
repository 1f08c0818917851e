use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::cluster::{Cluster, Pattern};
use crate::core::mutation::InsertionCodes;

/// One value in a list row. A closed sum preserves the source's mixed-kind
/// rows without runtime type inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    Text(String),
    Int(i64),
    Float(f64),
    DateRange(NaiveDate, NaiveDate),
    Pattern(Pattern),
    Cluster(Cluster),
    NestedList(List),
}

impl Cell {
    pub fn render(&self, codes: &InsertionCodes) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Int(n) => n.to_string(),
            Cell::Float(x) => format!("{x:.4}"),
            Cell::DateRange(start, end) => {
                if start == end {
                    start.to_string()
                } else {
                    format!("{start}..{end}")
                }
            }
            Cell::Pattern(p) => p.render(codes),
            Cell::Cluster(c) => format!("<{} isolates>", c.len()),
            Cell::NestedList(l) => format!("<list of {} rows>", l.rows.len()),
        }
    }

    /// Numeric view for list merge arithmetic
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Int(n) => Some(*n as f64),
            Cell::Float(x) => Some(*x),
            _ => None,
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Cell::Int(_) | Cell::Float(_))
    }
}

/// How numeric fields combine when two lists merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOp {
    Sum,
    Difference,
    Ratio,
}

impl MergeOp {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            MergeOp::Sum => a + b,
            MergeOp::Difference => a - b,
            MergeOp::Ratio => {
                if b == 0.0 {
                    0.0
                } else {
                    a / b
                }
            }
        }
    }
}

/// A named, ordered table of fixed-shape rows.
///
/// A list produced from a cluster keeps that cluster as `base_cluster` so a
/// later filter can re-derive the report point-wise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct List {
    pub name: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    pub base_cluster: Option<Cluster>,
}

impl List {
    pub fn new(header: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self {
            name: String::new(),
            header,
            rows,
            base_cluster: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_base(mut self, cluster: Cluster) -> Self {
        self.base_cluster = Some(cluster);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The embedded sub-cluster of a row, if it has one; enables broadcasting
    /// filters across cluster-valued lists
    pub fn row_cluster(row: &[Cell]) -> Option<&Cluster> {
        row.iter().find_map(|cell| match cell {
            Cell::Cluster(c) => Some(c),
            _ => None,
        })
    }

    /// Row key used for merges and order-insensitive equality: the rendered
    /// non-numeric leading cells
    fn row_key(row: &[Cell], codes: &InsertionCodes) -> String {
        row.iter()
            .take_while(|cell| !cell.is_numeric())
            .map(|cell| cell.render(codes))
            .collect::<Vec<_>>()
            .join("\t")
    }

    /// Outer-join merge: rows matched by key; numeric fields combined with
    /// `op`, a missing side contributing zero. Used for adding/subtracting
    /// count tables and for frequency normalization via `Ratio`.
    pub fn merge(&self, other: &Self, op: MergeOp, codes: &InsertionCodes) -> Self {
        let mut rows: Vec<Vec<Cell>> = Vec::with_capacity(self.rows.len());
        let mut matched = vec![false; other.rows.len()];

        for row in &self.rows {
            let key = Self::row_key(row, codes);
            let other_row = other.rows.iter().enumerate().find_map(|(i, r)| {
                if !matched[i] && Self::row_key(r, codes) == key {
                    matched[i] = true;
                    Some(r)
                } else {
                    None
                }
            });
            rows.push(merge_rows(row, other_row.map(|v| v.as_slice()), op));
        }

        // Unmatched rows of the right operand, merged against zero
        for (i, row) in other.rows.iter().enumerate() {
            if !matched[i] {
                rows.push(merge_rows_right(row, op));
            }
        }

        Self {
            name: String::new(),
            header: self.header.clone(),
            rows,
            base_cluster: None,
        }
    }

    /// Order-insensitive structural equality by rendered row text
    pub fn same_rows(&self, other: &Self, codes: &InsertionCodes) -> bool {
        if self.rows.len() != other.rows.len() {
            return false;
        }
        let mut a: Vec<String> = self.rows.iter().map(|r| render_row(r, codes)).collect();
        let mut b: Vec<String> = other.rows.iter().map(|r| render_row(r, codes)).collect();
        a.sort();
        b.sort();
        a == b
    }

    /// Plain-text table rendering
    pub fn render(&self, codes: &InsertionCodes) -> String {
        let mut out = String::new();
        if !self.header.is_empty() {
            out.push_str(&self.header.join("\t"));
            out.push('\n');
        }
        for row in &self.rows {
            out.push_str(&render_row(row, codes));
            out.push('\n');
        }
        out
    }
}

fn render_row(row: &[Cell], codes: &InsertionCodes) -> String {
    row.iter()
        .map(|cell| cell.render(codes))
        .collect::<Vec<_>>()
        .join("\t")
}

fn merge_rows(left: &[Cell], right: Option<&[Cell]>, op: MergeOp) -> Vec<Cell> {
    left.iter()
        .enumerate()
        .map(|(i, cell)| {
            let a = cell.as_number();
            let b = right
                .and_then(|r| r.get(i))
                .and_then(Cell::as_number)
                .unwrap_or(0.0);
            match (cell, a) {
                (Cell::Int(_), Some(a)) if op != MergeOp::Ratio => Cell::Int(op.apply(a, b) as i64),
                (_, Some(a)) => Cell::Float(op.apply(a, b)),
                _ => cell.clone(),
            }
        })
        .collect()
}

fn merge_rows_right(right: &[Cell], op: MergeOp) -> Vec<Cell> {
    right
        .iter()
        .map(|cell| match (cell, cell.as_number()) {
            (Cell::Int(_), Some(b)) if op != MergeOp::Ratio => Cell::Int(op.apply(0.0, b) as i64),
            (_, Some(b)) => Cell::Float(op.apply(0.0, b)),
            _ => cell.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_list(rows: &[(&str, i64)]) -> List {
        List::new(
            vec!["Country".into(), "Count".into()],
            rows.iter()
                .map(|(name, count)| vec![Cell::Text((*name).into()), Cell::Int(*count)])
                .collect(),
        )
    }

    #[test]
    fn test_merge_sum_outer_join() {
        let codes = InsertionCodes::new();
        let a = count_list(&[("USA", 10), ("India", 5)]);
        let b = count_list(&[("USA", 3), ("UK", 7)]);

        let merged = a.merge(&b, MergeOp::Sum, &codes);
        assert_eq!(merged.rows.len(), 3);
        assert_eq!(merged.rows[0][1], Cell::Int(13));
        assert_eq!(merged.rows[1][1], Cell::Int(5));
        assert_eq!(merged.rows[2][0], Cell::Text("UK".into()));
        assert_eq!(merged.rows[2][1], Cell::Int(7));
    }

    #[test]
    fn test_merge_difference() {
        let codes = InsertionCodes::new();
        let a = count_list(&[("USA", 10)]);
        let b = count_list(&[("USA", 3)]);
        let merged = a.merge(&b, MergeOp::Difference, &codes);
        assert_eq!(merged.rows[0][1], Cell::Int(7));
    }

    #[test]
    fn test_merge_ratio_for_frequencies() {
        let codes = InsertionCodes::new();
        let a = count_list(&[("USA", 10), ("UK", 0)]);
        let b = count_list(&[("USA", 40), ("UK", 5)]);
        let merged = a.merge(&b, MergeOp::Ratio, &codes);
        assert_eq!(merged.rows[0][1], Cell::Float(0.25));
        assert_eq!(merged.rows[1][1], Cell::Float(0.0));
    }

    #[test]
    fn test_same_rows_ignores_order() {
        let codes = InsertionCodes::new();
        let a = count_list(&[("USA", 10), ("UK", 7)]);
        let b = count_list(&[("UK", 7), ("USA", 10)]);
        assert!(a.same_rows(&b, &codes));

        let c = count_list(&[("USA", 11), ("UK", 7)]);
        assert!(!a.same_rows(&c, &codes));
    }

    #[test]
    fn test_row_cluster() {
        let row = vec![
            Cell::Text("B.1.1.7".into()),
            Cell::Int(3),
            Cell::Cluster(Cluster::new(vec![1, 2, 3])),
        ];
        assert_eq!(List::row_cluster(&row).unwrap().len(), 3);
        assert!(List::row_cluster(&[Cell::Int(1)]).is_none());
    }
}

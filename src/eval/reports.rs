use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};

use crate::core::cluster::{Cluster, Pattern};
use crate::core::list::{Cell, List};
use crate::core::mutation::Mutation;
use crate::core::state::EngineState;
use crate::query::token::ListKind;

/// Row cap for `list` when no count is given
const DEFAULT_ENTRY_ROWS: usize = 20;

/// Lineage columns for `trends` when no count is given
const DEFAULT_TREND_LINEAGES: usize = 5;

/// WHO variant labels and the Pango lineage prefixes they collect
const VARIANTS: &[(&str, &[&str])] = &[
    ("Alpha", &["B.1.1.7", "Q"]),
    ("Beta", &["B.1.351"]),
    ("Gamma", &["P.1"]),
    ("Delta", &["B.1.617.2", "AY"]),
    ("Epsilon", &["B.1.427", "B.1.429"]),
    ("Eta", &["B.1.525"]),
    ("Iota", &["B.1.526"]),
    ("Kappa", &["B.1.617.1"]),
    ("Lambda", &["C.37"]),
    ("Mu", &["B.1.621"]),
    ("Omicron", &["B.1.1.529", "BA", "BQ", "XBB", "EG", "HV", "JN", "KP"]),
];

#[inline]
fn count_to_f64(count: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    {
        count as f64
    }
}

/// Produce the tabular report `kind` over a cluster. `n` is the optional
/// count argument: a row cap for `list`, countries, states and frequencies,
/// and the number of lineage columns for `trends`; zero means the default.
pub fn report(state: &EngineState, kind: ListKind, n: usize, cluster: &Cluster) -> List {
    match kind {
        ListKind::Entries => entries(state, n, cluster),
        ListKind::Countries => grouped(state, n, cluster, |iso| iso.country.clone(), "Country"),
        ListKind::States => grouped(state, n, cluster, |iso| iso.state.clone(), "State"),
        ListKind::Lineages => grouped(state, n, cluster, lineage_label, "Lineage"),
        ListKind::Trends => trends(state, n, cluster),
        ListKind::Monthly => dated(state, cluster, "Month", month_bounds),
        ListKind::Weekly => dated(state, cluster, "Week", week_bounds),
        ListKind::Frequencies => frequencies(state, n, cluster),
        ListKind::Variants => variants(state, cluster),
    }
}

fn lineage_label(isolate: &crate::core::isolate::Isolate) -> String {
    if isolate.lineage.is_empty() {
        "Unassigned".to_string()
    } else {
        isolate.lineage.clone()
    }
}

fn entries(state: &EngineState, n: usize, cluster: &Cluster) -> List {
    let limit = if n == 0 { DEFAULT_ENTRY_ROWS } else { n };
    let rows = cluster
        .iter(&state.isolates)
        .take(limit)
        .map(|isolate| {
            let date_cell = match isolate.date {
                Some(d) => Cell::DateRange(d, d),
                None => Cell::Text(String::new()),
            };
            vec![
                Cell::Int(i64::from(isolate.accession_id)),
                Cell::Text(isolate.country.clone()),
                Cell::Text(isolate.state.clone()),
                date_cell,
                Cell::Text(isolate.lineage.clone()),
                Cell::Int(isolate.mutation_count(state.exclude_n_from_counts) as i64),
            ]
        })
        .collect();
    List::new(
        vec![
            "Accession".into(),
            "Country".into(),
            "State".into(),
            "Date".into(),
            "Lineage".into(),
            "Mutations".into(),
        ],
        rows,
    )
    .with_base(cluster.clone())
}

/// Group-by-label report with per-group sub-clusters, largest groups first
fn grouped<F>(state: &EngineState, n: usize, cluster: &Cluster, label: F, column: &str) -> List
where
    F: Fn(&crate::core::isolate::Isolate) -> String,
{
    let mut groups: HashMap<String, Vec<u32>> = HashMap::new();
    for &index in cluster.indices() {
        let key = label(state.isolate(index));
        if key.is_empty() {
            continue;
        }
        groups.entry(key).or_default().push(index);
    }

    let mut entries: Vec<(String, Vec<u32>)> = groups.into_iter().collect();
    entries.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));
    if n > 0 {
        entries.truncate(n);
    }

    let rows = entries
        .into_iter()
        .map(|(key, indices)| {
            vec![
                Cell::Text(key),
                Cell::Int(indices.len() as i64),
                Cell::Cluster(Cluster::from_sorted(indices)),
            ]
        })
        .collect();
    List::new(vec![column.into(), "Count".into(), "Cluster".into()], rows)
        .with_base(cluster.clone())
}

fn month_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
        .unwrap_or(date);
    let (next_year, next_month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    let end = NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .unwrap_or(date);
    (start, end)
}

fn week_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let offset = i64::from(date.weekday().num_days_from_monday());
    let start = date - chrono::Duration::days(offset);
    let end = start + chrono::Duration::days(6);
    (start, end)
}

/// Bucket the cluster by calendar period, in date order, undated dropped
fn dated(
    state: &EngineState,
    cluster: &Cluster,
    column: &str,
    bounds: fn(NaiveDate) -> (NaiveDate, NaiveDate),
) -> List {
    let mut buckets: HashMap<NaiveDate, (NaiveDate, Vec<u32>)> = HashMap::new();
    for &index in cluster.indices() {
        if let Some(date) = state.isolate(index).date {
            let (start, end) = bounds(date);
            buckets.entry(start).or_insert((end, Vec::new())).1.push(index);
        }
    }

    let mut entries: Vec<(NaiveDate, (NaiveDate, Vec<u32>))> = buckets.into_iter().collect();
    entries.sort_by_key(|(start, _)| *start);

    let rows = entries
        .into_iter()
        .map(|(start, (end, indices))| {
            vec![
                Cell::DateRange(start, end),
                Cell::Int(indices.len() as i64),
                Cell::Cluster(Cluster::from_sorted(indices)),
            ]
        })
        .collect();
    List::new(vec![column.into(), "Count".into(), "Cluster".into()], rows)
        .with_base(cluster.clone())
}

/// Month-by-month lineage composition: one column per top lineage plus
/// `Other`, cells holding the lineage's share of that month
fn trends(state: &EngineState, n: usize, cluster: &Cluster) -> List {
    let columns = if n == 0 { DEFAULT_TREND_LINEAGES } else { n };

    let mut totals: HashMap<String, usize> = HashMap::new();
    for isolate in cluster.iter(&state.isolates) {
        if isolate.date.is_some() {
            *totals.entry(lineage_label(isolate)).or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = totals.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let top: Vec<String> = ranked.into_iter().take(columns).map(|(l, _)| l).collect();

    // month start -> (month end, per-column counts, month total)
    let mut buckets: HashMap<NaiveDate, (NaiveDate, Vec<usize>, usize)> = HashMap::new();
    for isolate in cluster.iter(&state.isolates) {
        let Some(date) = isolate.date else { continue };
        let (start, end) = month_bounds(date);
        let slot = buckets
            .entry(start)
            .or_insert_with(|| (end, vec![0; top.len() + 1], 0));
        let label = lineage_label(isolate);
        let column = top.iter().position(|l| *l == label).unwrap_or(top.len());
        slot.1[column] += 1;
        slot.2 += 1;
    }

    let mut entries: Vec<(NaiveDate, (NaiveDate, Vec<usize>, usize))> =
        buckets.into_iter().collect();
    entries.sort_by_key(|(start, _)| *start);

    let mut header: Vec<String> = vec!["Month".into()];
    header.extend(top.iter().cloned());
    header.push("Other".into());

    let rows = entries
        .into_iter()
        .map(|(start, (end, counts, total))| {
            let mut row = vec![Cell::DateRange(start, end)];
            for count in counts {
                row.push(Cell::Float(count_to_f64(count) / count_to_f64(total.max(1))));
            }
            row
        })
        .collect();
    List::new(header, rows).with_base(cluster.clone())
}

/// Per-mutation occurrence counts and in-cluster frequencies, most common
/// first. In nucleotide mode an isolate whose wildcard regions cover the
/// position drops out of that mutation's denominator, as in consensus.
fn frequencies(state: &EngineState, n: usize, cluster: &Cluster) -> List {
    let mut tallies: HashMap<Mutation, usize> = HashMap::new();
    for isolate in cluster.iter(&state.isolates) {
        for mutation in &isolate.mutations {
            *tallies.entry(*mutation).or_insert(0) += 1;
        }
    }

    let mut entries: Vec<(Mutation, usize)> = tallies.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    if n > 0 {
        entries.truncate(n);
    }

    let size = cluster.len();
    let rows = entries
        .into_iter()
        .map(|(mutation, count)| {
            let denominator = if state.nucleotide_mode {
                let unknown = cluster
                    .iter(&state.isolates)
                    .filter(|iso| iso.position_unknown(mutation.position))
                    .count();
                size.saturating_sub(unknown).max(1)
            } else {
                size.max(1)
            };
            vec![
                Cell::Text(mutation.render(&state.insertion_codes)),
                Cell::Int(count as i64),
                Cell::Float(count_to_f64(count) / count_to_f64(denominator)),
            ]
        })
        .collect();
    List::new(
        vec!["Mutation".into(), "Count".into(), "Frequency".into()],
        rows,
    )
    .with_base(cluster.clone())
}

fn variant_of(lineage: &str) -> Option<&'static str> {
    if lineage.is_empty() {
        return None;
    }
    for (name, prefixes) in VARIANTS {
        for prefix in *prefixes {
            if lineage == *prefix || lineage.starts_with(&format!("{prefix}.")) {
                return Some(name);
            }
        }
    }
    None
}

/// Collapse lineages to WHO variant labels; unmatched lineages fall under
/// `Other`
fn variants(state: &EngineState, cluster: &Cluster) -> List {
    let mut groups: HashMap<&'static str, Vec<u32>> = HashMap::new();
    for &index in cluster.indices() {
        let isolate = state.isolate(index);
        let name = variant_of(&isolate.lineage.to_ascii_uppercase()).unwrap_or("Other");
        groups.entry(name).or_default().push(index);
    }

    let order: Vec<&'static str> = VARIANTS
        .iter()
        .map(|(name, _)| *name)
        .chain(std::iter::once("Other"))
        .collect();
    let rows = order
        .into_iter()
        .filter_map(|name| groups.remove(name).map(|indices| (name, indices)))
        .map(|(name, indices)| {
            vec![
                Cell::Text(name.to_string()),
                Cell::Int(indices.len() as i64),
                Cell::Cluster(Cluster::from_sorted(indices)),
            ]
        })
        .collect();
    List::new(
        vec!["Variant".into(), "Count".into(), "Cluster".into()],
        rows,
    )
    .with_base(cluster.clone())
}

/// The `diff` report: what separates two patterns. Identical inputs get the
/// degenerate single-row form.
pub fn diff(left: &Pattern, right: &Pattern, left_name: &str, right_name: &str) -> List {
    let header = vec!["Side".into(), "Mutations".into()];
    if left.same_mutations(right) {
        let rows = vec![vec![
            Cell::Text("identical".into()),
            Cell::Pattern(left.clone()),
        ]];
        return List::new(header, rows);
    }
    let rows = vec![
        vec![
            Cell::Text(format!("{left_name} - {right_name}")),
            Cell::Pattern(left.minus(right)),
        ],
        vec![
            Cell::Text(format!("{right_name} - {left_name}")),
            Cell::Pattern(right.minus(left)),
        ],
        vec![
            Cell::Text("shared".into()),
            Cell::Pattern(left.intersection(right)),
        ],
    ];
    List::new(header, rows)
}

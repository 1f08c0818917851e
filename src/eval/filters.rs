use chrono::NaiveDate;
use rayon::prelude::*;

use crate::core::cluster::{Cluster, Pattern};
use crate::core::isolate::Isolate;
use crate::core::state::EngineState;

/// Apply a per-isolate predicate across a cluster in parallel. Rayon's
/// ordered collect keeps the surviving indices sorted, so the result is a
/// valid cluster without a re-sort.
fn par_filter<F>(state: &EngineState, cluster: &Cluster, predicate: F) -> Cluster
where
    F: Fn(&Isolate) -> bool + Sync,
{
    let kept: Vec<u32> = cluster
        .indices()
        .par_iter()
        .copied()
        .filter(|&index| predicate(state.isolate(index)))
        .collect();
    Cluster::from_sorted(kept)
}

/// `from <place>`: case-insensitive match against country or state
pub fn from_place(state: &EngineState, cluster: &Cluster, place: &str) -> Cluster {
    let needle = place.to_lowercase();
    par_filter(state, cluster, |isolate| {
        isolate.country.to_lowercase() == needle || isolate.state.to_lowercase() == needle
    })
}

/// How many of the pattern's mutations an isolate carries
fn matches_of(isolate: &Isolate, pattern: &Pattern) -> usize {
    pattern
        .mutations()
        .iter()
        .filter(|m| isolate.has_mutation(m))
        .count()
}

/// `containing [n] <pattern>`: keep isolates carrying at least `n` of the
/// pattern's mutations; `n = 0` requires all of them
pub fn containing(state: &EngineState, cluster: &Cluster, pattern: &Pattern, n: usize) -> Cluster {
    let required = if n == 0 { pattern.len() } else { n };
    par_filter(state, cluster, |isolate| {
        matches_of(isolate, pattern) >= required
    })
}

/// `notcontaining [n] <pattern>`: the complement of `containing`
pub fn not_containing(
    state: &EngineState,
    cluster: &Cluster,
    pattern: &Pattern,
    n: usize,
) -> Cluster {
    let required = if n == 0 { pattern.len() } else { n };
    par_filter(state, cluster, |isolate| {
        matches_of(isolate, pattern) < required
    })
}

/// Strictly before the pivot; undated isolates never match a date filter
pub fn before(state: &EngineState, cluster: &Cluster, pivot: NaiveDate) -> Cluster {
    par_filter(state, cluster, |isolate| {
        isolate.date.map_or(false, |d| d < pivot)
    })
}

/// Strictly after the pivot
pub fn after(state: &EngineState, cluster: &Cluster, pivot: NaiveDate) -> Cluster {
    par_filter(state, cluster, |isolate| {
        isolate.date.map_or(false, |d| d > pivot)
    })
}

/// Inclusive date range
pub fn in_range(
    state: &EngineState,
    cluster: &Cluster,
    start: NaiveDate,
    end: NaiveDate,
) -> Cluster {
    par_filter(state, cluster, |isolate| {
        isolate.date.map_or(false, |d| d >= start && d <= end)
    })
}

/// `named <text>`: case-insensitive substring of the state field or the
/// accession id
pub fn named(state: &EngineState, cluster: &Cluster, needle: &str) -> Cluster {
    let needle = needle.to_lowercase();
    par_filter(state, cluster, |isolate| {
        isolate.state.to_lowercase().contains(&needle)
            || isolate.accession_id.to_string().contains(&needle)
    })
}

/// `lineage <name>`: exact match after alias expansion; a trailing `.*`
/// also admits sublineages
pub fn lineage(state: &EngineState, cluster: &Cluster, query: &str) -> Cluster {
    let targets = state.expand_lineage(query);
    par_filter(state, cluster, |isolate| {
        let candidate = isolate.lineage.to_ascii_uppercase();
        targets.iter().any(|target| match target.strip_suffix(".*") {
            Some(stem) => {
                candidate == stem || candidate.starts_with(&format!("{stem}."))
            }
            None => candidate == *target,
        })
    })
}

/// `sample <amount>`: a deterministic systematic sample. An amount below 1 is
/// a fraction of the cluster; 1 or above is a target count. Every k-th member
/// is taken so repeated runs agree exactly.
pub fn sample(cluster: &Cluster, amount: f64) -> Cluster {
    let size = cluster.len();
    if size == 0 || amount <= 0.0 {
        return Cluster::empty();
    }
    #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
    let target = if amount < 1.0 {
        ((size as f64 * amount).round() as usize).max(1)
    } else {
        (amount as usize).min(size)
    };
    let step = (size / target).max(1);
    let kept: Vec<u32> = cluster
        .indices()
        .iter()
        .copied()
        .step_by(step)
        .take(target)
        .collect();
    Cluster::from_sorted(kept)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountCmp {
    Greater,
    Less,
    Equal,
}

/// `> n`, `< n`, `# n`: filter by mutation count, honoring the exclude-N flag
pub fn mutation_count(state: &EngineState, cluster: &Cluster, cmp: CountCmp, n: usize) -> Cluster {
    let exclude_n = state.exclude_n_from_counts;
    par_filter(state, cluster, |isolate| {
        let count = isolate.mutation_count(exclude_n);
        match cmp {
            CountCmp::Greater => count > n,
            CountCmp::Less => count < n,
            CountCmp::Equal => count == n,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::isolate::Isolate;
    use crate::core::mutation::{InsertionCodes, Mutation};

    fn pattern(tokens: &[&str]) -> Pattern {
        let codes = InsertionCodes::new();
        Pattern::new(
            tokens
                .iter()
                .map(|t| Mutation::parse(t, &codes).unwrap())
                .collect(),
        )
    }

    fn make_state() -> EngineState {
        let codes = InsertionCodes::new();
        let mut state = EngineState::new();
        let date = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok();
        let records: Vec<(&str, &str, Option<NaiveDate>, u32, &[&str], &str)> = vec![
            ("USA", "CA-1", date("2021-01-10"), 1, &["N501Y", "E484K"], "B.1.351"),
            ("USA", "NY-2", date("2021-02-20"), 2, &["N501Y"], "B.1.1.7"),
            ("India", "MH-3", date("2021-04-01"), 3, &["L452R", "P681R"], "B.1.617.2"),
            ("India", "DL-4", None, 4, &["E484K"], "B.1.617.2.1"),
            ("UK", "EN-5", date("2020-12-01"), 5, &[], ""),
        ];
        let isolates = records
            .into_iter()
            .map(|(country, st, date, accession, tokens, lin)| {
                let mut mutations: Vec<Mutation> = tokens
                    .iter()
                    .map(|t| Mutation::parse(t, &codes).unwrap())
                    .collect();
                mutations.sort_unstable();
                let mut iso = Isolate::new(country, st, date, accession, mutations);
                iso.lineage = lin.to_string();
                iso
            })
            .collect();
        state.add_isolates(isolates);
        state
    }

    #[test]
    fn test_from_place_case_insensitive() {
        let state = make_state();
        let all = state.all_isolates();
        assert_eq!(from_place(&state, &all, "usa").len(), 2);
        assert_eq!(from_place(&state, &all, "INDIA").len(), 2);
        assert_eq!(from_place(&state, &all, "France").len(), 0);
    }

    #[test]
    fn test_containing_all_vs_any() {
        let state = make_state();
        let all = state.all_isolates();
        let p = pattern(&["N501Y", "E484K"]);
        // n = 0: both mutations required
        assert_eq!(containing(&state, &all, &p, 0).len(), 1);
        // n = 1: either suffices
        assert_eq!(containing(&state, &all, &p, 1).len(), 3);
    }

    #[test]
    fn test_not_containing_complements() {
        let state = make_state();
        let all = state.all_isolates();
        let p = pattern(&["N501Y", "E484K"]);
        for n in [0usize, 1, 2] {
            let inside = containing(&state, &all, &p, n);
            let outside = not_containing(&state, &all, &p, n);
            assert_eq!(inside.len() + outside.len(), all.len());
            assert!(inside.intersection(&outside).is_empty());
        }
    }

    #[test]
    fn test_date_filters_skip_undated() {
        let state = make_state();
        let all = state.all_isolates();
        let pivot = NaiveDate::from_ymd_opt(2021, 2, 1).unwrap();
        let earlier = before(&state, &all, pivot);
        let later = after(&state, &all, pivot);
        // Isolate 4 is undated and matches neither side
        assert_eq!(earlier.len() + later.len(), 4);
        assert!(!earlier.contains(3) && !later.contains(3));
    }

    #[test]
    fn test_range_inclusive() {
        let state = make_state();
        let all = state.all_isolates();
        let start = NaiveDate::from_ymd_opt(2021, 1, 10).unwrap();
        let end = NaiveDate::from_ymd_opt(2021, 2, 20).unwrap();
        assert_eq!(in_range(&state, &all, start, end).len(), 2);
    }

    #[test]
    fn test_lineage_exact_and_wildcard() {
        let state = make_state();
        let all = state.all_isolates();
        assert_eq!(lineage(&state, &all, "B.1.617.2").len(), 1);
        assert_eq!(lineage(&state, &all, "B.1.617.2.*").len(), 2);
        assert_eq!(lineage(&state, &all, "b.1.1.7").len(), 1);
    }

    #[test]
    fn test_lineage_alias_expansion() {
        let mut state = make_state();
        state
            .lineage_aliases
            .insert("AY".into(), vec!["B.1.617.2".into()]);
        let all = state.all_isolates();
        assert_eq!(lineage(&state, &all, "AY.1").len(), 1);
        assert_eq!(lineage(&state, &all, "AY.*").len(), 2);
    }

    #[test]
    fn test_named_matches_state_and_accession() {
        let state = make_state();
        let all = state.all_isolates();
        assert_eq!(named(&state, &all, "ca-").len(), 1);
        assert_eq!(named(&state, &all, "5").len(), 1);
    }

    #[test]
    fn test_sample_deterministic() {
        let state = make_state();
        let all = state.all_isolates();
        let a = sample(&all, 2.0);
        let b = sample(&all, 2.0);
        assert_eq!(a.len(), 2);
        assert!(a.same_isolates(&b));

        let fraction = sample(&all, 0.4);
        assert_eq!(fraction.len(), 2);
        assert_eq!(sample(&all, 100.0).len(), all.len());
        assert!(sample(&Cluster::empty(), 0.5).is_empty());
    }

    #[test]
    fn test_mutation_count_filters() {
        let state = make_state();
        let all = state.all_isolates();
        assert_eq!(mutation_count(&state, &all, CountCmp::Greater, 1).len(), 2);
        assert_eq!(mutation_count(&state, &all, CountCmp::Less, 1).len(), 1);
        assert_eq!(mutation_count(&state, &all, CountCmp::Equal, 1).len(), 2);
    }
}

use std::collections::HashMap;

use crate::core::cluster::{Cluster, Pattern};
use crate::core::mutation::Mutation;
use crate::core::state::EngineState;

/// Default majority threshold for consensus patterns
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Lower threshold for the secondary pattern computed in the same pass
pub const SECONDARY_THRESHOLD: f64 = 0.25;

#[inline]
fn count_to_f64(count: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    {
        count as f64
    }
}

/// Compute the consensus pattern of a cluster: every mutation whose
/// in-cluster frequency exceeds `threshold`, sorted by position.
///
/// In nucleotide mode an isolate whose wildcard regions cover a position does
/// not count against that position's denominator: an unknown call is neither
/// evidence for nor against the mutation.
pub fn consensus(state: &EngineState, cluster: &Cluster, threshold: f64) -> Pattern {
    consensus_pair(state, cluster, threshold, threshold).0
}

/// One tally pass, two thresholds: the majority pattern plus a lower-bar
/// pattern of near-consensus mutations, for callers that want both without a
/// second scan.
pub fn consensus_pair(
    state: &EngineState,
    cluster: &Cluster,
    threshold: f64,
    secondary: f64,
) -> (Pattern, Pattern) {
    if cluster.is_empty() {
        return (Pattern::empty(), Pattern::empty());
    }

    let mut tallies: HashMap<Mutation, usize> = HashMap::new();
    for isolate in cluster.iter(&state.isolates) {
        for mutation in &isolate.mutations {
            *tallies.entry(*mutation).or_insert(0) += 1;
        }
    }

    // Per-position count of isolates whose wildcard regions cover it,
    // accumulated as a difference array over the u16 position space
    let coverage = if state.nucleotide_mode {
        Some(wildcard_coverage(state, cluster))
    } else {
        None
    };

    let size = cluster.len();
    let mut primary = Vec::new();
    let mut lower = Vec::new();
    for (mutation, count) in tallies {
        let unknown = coverage
            .as_ref()
            .and_then(|cov| usize::try_from(mutation.position).ok().and_then(|p| cov.get(p).copied()))
            .unwrap_or(0);
        let denominator = size.saturating_sub(unknown).max(1);
        let frequency = count_to_f64(count) / count_to_f64(denominator);
        if frequency > threshold {
            primary.push(mutation);
        }
        if frequency > secondary {
            lower.push(mutation);
        }
    }

    (Pattern::new(primary), Pattern::new(lower))
}

fn wildcard_coverage(state: &EngineState, cluster: &Cluster) -> Vec<usize> {
    let mut max_end: usize = 0;
    for isolate in cluster.iter(&state.isolates) {
        if let Some(&(_, end)) = isolate.n_regions.last() {
            max_end = max_end.max(end as usize);
        }
    }
    if max_end == 0 {
        return Vec::new();
    }

    let mut diff = vec![0isize; max_end + 2];
    for isolate in cluster.iter(&state.isolates) {
        for &(start, end) in &isolate.n_regions {
            diff[start as usize] += 1;
            diff[end as usize + 1] -= 1;
        }
    }

    let mut cover = vec![0usize; max_end + 1];
    let mut running = 0isize;
    for (position, slot) in cover.iter_mut().enumerate() {
        running += diff[position];
        *slot = running.max(0) as usize;
    }
    cover
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::isolate::Isolate;
    use crate::core::mutation::InsertionCodes;

    fn make_state(records: &[(u32, &[&str])]) -> EngineState {
        let mut state = EngineState::new();
        let codes = InsertionCodes::new();
        let isolates = records
            .iter()
            .map(|(accession, tokens)| {
                let mut mutations: Vec<Mutation> = tokens
                    .iter()
                    .map(|t| Mutation::parse(t, &codes).unwrap())
                    .collect();
                mutations.sort_unstable();
                Isolate::new("USA", "", None, *accession, mutations)
            })
            .collect();
        state.add_isolates(isolates);
        state
    }

    #[test]
    fn test_majority_consensus() {
        // 3 of 5 carry D614G; nothing else reaches majority
        let state = make_state(&[
            (1, &["D614G", "N501Y"]),
            (2, &["D614G"]),
            (3, &["D614G", "E484K"]),
            (4, &["P681H"]),
            (5, &[]),
        ]);
        let all = state.all_isolates();
        let pattern = consensus(&state, &all, DEFAULT_THRESHOLD);
        assert_eq!(pattern.len(), 1);
        assert_eq!(pattern.mutations()[0].position, 614);
    }

    #[test]
    fn test_exact_half_does_not_pass() {
        let state = make_state(&[(1, &["D614G"]), (2, &[])]);
        let all = state.all_isolates();
        let pattern = consensus(&state, &all, DEFAULT_THRESHOLD);
        assert!(pattern.is_empty(), "frequency must exceed the threshold");
    }

    #[test]
    fn test_empty_cluster() {
        let state = make_state(&[]);
        let pattern = consensus(&state, &Cluster::empty(), DEFAULT_THRESHOLD);
        assert!(pattern.is_empty());
    }

    #[test]
    fn test_consensus_fixed_point() {
        let state = make_state(&[
            (1, &["E484K", "N501Y"]),
            (2, &["E484K", "N501Y"]),
            (3, &["E484K", "N501Y", "D614G"]),
            (4, &["P681H"]),
        ]);
        let all = state.all_isolates();
        let pattern = consensus(&state, &all, DEFAULT_THRESHOLD);
        assert_eq!(pattern.len(), 2);

        // Re-apply consensus to exactly the isolates matching the pattern
        let matching: Vec<u32> = all
            .indices()
            .iter()
            .copied()
            .filter(|&i| {
                let iso = state.isolate(i);
                pattern.mutations().iter().all(|m| iso.has_mutation(m))
            })
            .collect();
        let again = consensus(&state, &Cluster::new(matching), DEFAULT_THRESHOLD);
        assert!(again.same_mutations(&pattern));
    }

    #[test]
    fn test_wildcard_positions_excluded_from_denominator() {
        // Isolate 3's wildcard region covers position 614, so the D614G
        // denominator is 2 and the frequency is 2/2
        let mut state = make_state(&[(1, &["D614G"]), (2, &["D614G"]), (3, &[])]);
        state.isolates[2].n_regions = vec![(600, 700)];
        let all = state.all_isolates();
        let pattern = consensus(&state, &all, DEFAULT_THRESHOLD);
        assert_eq!(pattern.len(), 1);
    }

    #[test]
    fn test_secondary_threshold() {
        let state = make_state(&[
            (1, &["D614G", "N501Y"]),
            (2, &["D614G", "N501Y"]),
            (3, &["D614G"]),
            (4, &[]),
            (5, &[]),
        ]);
        let all = state.all_isolates();
        let (primary, lower) =
            consensus_pair(&state, &all, DEFAULT_THRESHOLD, SECONDARY_THRESHOLD);
        assert_eq!(primary.len(), 1);
        assert_eq!(lower.len(), 2, "N501Y at 40% clears only the lower bar");
    }
}

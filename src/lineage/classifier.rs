use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::cluster::{Cluster, Pattern};
use crate::core::state::EngineState;
use crate::lineage::consensus::{consensus, DEFAULT_THRESHOLD};

/// Members within this symmetric-difference distance of a recorded pattern
/// are peeled off in the same round
const PEEL_RADIUS: usize = 3;

/// Minimum members a lineage needs before characteristic patterns are built
pub const MIN_LINEAGE_SIZE: usize = 3;

/// One characteristic pattern of a lineage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineagePattern {
    pub lineage: String,
    pub pattern: Pattern,
    /// Members the pattern accounted for when it was recorded
    pub match_count: u32,
    /// `pattern` minus the parent lineage's leading pattern; mutations that
    /// distinguish this lineage from its parent weigh double in distances
    pub defining: Pattern,
}

/// Build the characteristic patterns of one lineage by iterative peeling:
/// take the consensus of the remaining members, record the member pattern
/// closest to it, drop every member within [`PEEL_RADIUS`] of that pattern,
/// and repeat until the members are exhausted or the round cap is reached.
pub fn build_lineage_patterns(
    state: &EngineState,
    lineage: &str,
    members: &[u32],
) -> Vec<LineagePattern> {
    let cap = 5 + members.len() / 5000;
    let mut remaining: Vec<u32> = members.to_vec();
    let mut patterns = Vec::new();

    while !remaining.is_empty() && patterns.len() < cap {
        let cluster = Cluster::new(remaining.clone());
        let center = consensus(state, &cluster, DEFAULT_THRESHOLD);

        let Some(closest) = remaining.iter().copied().min_by_key(|&index| {
            Pattern::new(state.isolate(index).mutations.clone()).distance(&center)
        }) else {
            break;
        };
        let anchor = Pattern::new(state.isolate(closest).mutations.clone());

        let before = remaining.len();
        remaining.retain(|&index| {
            Pattern::new(state.isolate(index).mutations.clone()).distance(&anchor) > PEEL_RADIUS
        });
        let match_count = (before - remaining.len()) as u32;

        patterns.push(LineagePattern {
            lineage: lineage.to_string(),
            pattern: anchor,
            match_count,
            defining: Pattern::empty(),
        });
    }

    debug!(
        lineage,
        members = members.len(),
        patterns = patterns.len(),
        "built characteristic patterns"
    );
    patterns
}

/// Build characteristic patterns for every lineage with enough members, then
/// fill in each pattern's defining subset against its parent lineage
pub fn build_all_lineage_patterns(state: &EngineState) -> HashMap<String, Vec<LineagePattern>> {
    let members = state.lineage_members();
    let mut tables: HashMap<String, Vec<LineagePattern>> = members
        .par_iter()
        .filter(|(_, indices)| indices.len() >= MIN_LINEAGE_SIZE)
        .map(|(lineage, indices)| {
            (
                lineage.clone(),
                build_lineage_patterns(state, lineage, indices),
            )
        })
        .collect();

    // Defining subset: pattern minus the parent lineage's leading pattern
    let parents: HashMap<String, Pattern> = tables
        .iter()
        .filter_map(|(lineage, patterns)| {
            patterns
                .first()
                .map(|p| (lineage.clone(), p.pattern.clone()))
        })
        .collect();
    for (lineage, patterns) in tables.iter_mut() {
        let parent = parent_lineage(lineage).and_then(|p| parents.get(&p));
        for entry in patterns.iter_mut() {
            entry.defining = match parent {
                Some(parent_pattern) => entry.pattern.minus(parent_pattern),
                None => entry.pattern.clone(),
            };
        }
    }

    info!(lineages = tables.len(), "lineage pattern tables ready");
    tables
}

/// `B.1.617.2` -> `B.1.617`
fn parent_lineage(lineage: &str) -> Option<String> {
    lineage.rsplit_once('.').map(|(parent, _)| parent.to_string())
}

/// Classify a mutation set against the characteristic-pattern tables.
///
/// Distance to a candidate pattern P for query Q is
/// `|P - Q| + |Q - P| + 2 * |defining(P) - Q|`; the minimum wins, ties broken
/// by the larger match count.
pub fn classify(
    tables: &HashMap<String, Vec<LineagePattern>>,
    query: &Pattern,
) -> Option<String> {
    let mut best: Option<(&LineagePattern, usize)> = None;
    for patterns in tables.values() {
        for candidate in patterns {
            let dist = candidate.pattern.minus(query).len()
                + query.minus(&candidate.pattern).len()
                + 2 * candidate.defining.minus(query).len();
            let better = match best {
                None => true,
                Some((incumbent, best_dist)) => {
                    dist < best_dist
                        || (dist == best_dist && candidate.match_count > incumbent.match_count)
                }
            };
            if better {
                best = Some((candidate, dist));
            }
        }
    }
    best.map(|(candidate, _)| candidate.lineage.clone())
}

/// Classify every isolate that has no lineage yet, in parallel, and apply
/// the assignments. Returns the number of isolates classified.
///
/// Each isolate's classification is independent; the only shared state is a
/// progress counter.
pub fn classify_unassigned(state: &mut EngineState) -> usize {
    if state.lineage_patterns.is_empty() {
        state.lineage_patterns = build_all_lineage_patterns(state);
    }
    if state.lineage_patterns.is_empty() {
        return 0;
    }

    let tables = &state.lineage_patterns;
    let progress = AtomicUsize::new(0);
    let assignments: Vec<(usize, String)> = state
        .isolates
        .par_iter()
        .enumerate()
        .filter(|(_, isolate)| isolate.lineage.is_empty())
        .filter_map(|(index, isolate)| {
            let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
            if done % 100_000 == 0 {
                debug!(classified = done, "classification progress");
            }
            let query = Pattern::new(isolate.mutations.clone());
            classify(tables, &query).map(|lineage| (index, lineage))
        })
        .collect();

    let count = assignments.len();
    for (index, lineage) in assignments {
        state.isolates[index].lineage = lineage;
    }
    info!(classified = count, "classified unassigned isolates");
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::isolate::Isolate;
    use crate::core::mutation::{InsertionCodes, Mutation};

    fn add(state: &mut EngineState, accession: u32, lineage: &str, tokens: &[&str]) {
        let codes = InsertionCodes::new();
        let mut mutations: Vec<Mutation> = tokens
            .iter()
            .map(|t| Mutation::parse(t, &codes).unwrap())
            .collect();
        mutations.sort_unstable();
        let mut isolate = Isolate::new("USA", "", None, accession, mutations);
        isolate.lineage = lineage.to_string();
        state.add_isolates(vec![isolate]);
    }

    fn two_lineage_state() -> EngineState {
        let mut state = EngineState::new();
        // Alpha-like: N501Y P681H
        for i in 0..5 {
            add(&mut state, 100 + i, "B.1.1.7", &["N501Y", "P681H"]);
        }
        // Delta-like: L452R P681R
        for i in 0..5 {
            add(&mut state, 200 + i, "B.1.617.2", &["L452R", "P681R"]);
        }
        state
    }

    #[test]
    fn test_build_patterns_peels_members() {
        let state = two_lineage_state();
        let members: Vec<u32> = (0..5).collect();
        let patterns = build_lineage_patterns(&state, "B.1.1.7", &members);
        assert_eq!(patterns.len(), 1, "identical members peel in one round");
        assert_eq!(patterns[0].match_count, 5);
        assert_eq!(patterns[0].pattern.len(), 2);
    }

    #[test]
    fn test_round_cap() {
        let mut state = EngineState::new();
        // Every member maximally distant from the others: never within the
        // peel radius of each other, so rounds hit the cap
        for i in 0..30u32 {
            let tokens: Vec<String> = (0..6)
                .map(|k| format!("A{}T", 1000 + i * 10 + k))
                .collect();
            let refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
            add(&mut state, 1 + i, "X", &refs);
        }
        let members: Vec<u32> = (0..30).collect();
        let patterns = build_lineage_patterns(&state, "X", &members);
        assert!(patterns.len() <= 5 + members.len() / 5000);
        assert!(!patterns.is_empty());
    }

    #[test]
    fn test_classify_picks_nearest_lineage() {
        let state = two_lineage_state();
        let tables = build_all_lineage_patterns(&state);
        assert_eq!(tables.len(), 2);

        let codes = InsertionCodes::new();
        let query = Pattern::new(vec![
            Mutation::parse("L452R", &codes).unwrap(),
            Mutation::parse("P681R", &codes).unwrap(),
        ]);
        assert_eq!(classify(&tables, &query).as_deref(), Some("B.1.617.2"));

        let query = Pattern::new(vec![Mutation::parse("N501Y", &codes).unwrap()]);
        assert_eq!(classify(&tables, &query).as_deref(), Some("B.1.1.7"));
    }

    #[test]
    fn test_classify_unassigned_backfills() {
        let mut state = two_lineage_state();
        add(&mut state, 300, "", &["L452R", "P681R"]);
        add(&mut state, 301, "", &["N501Y", "P681H"]);

        let classified = classify_unassigned(&mut state);
        assert_eq!(classified, 2);
        assert_eq!(state.isolates[10].lineage, "B.1.617.2");
        assert_eq!(state.isolates[11].lineage, "B.1.1.7");
    }

    #[test]
    fn test_classify_empty_tables() {
        let tables = HashMap::new();
        let query = Pattern::empty();
        assert!(classify(&tables, &query).is_none());
    }

    #[test]
    fn test_parent_lineage() {
        assert_eq!(parent_lineage("B.1.617.2"), Some("B.1.617".to_string()));
        assert_eq!(parent_lineage("B"), None);
    }
}

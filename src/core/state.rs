use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::core::cluster::{Cluster, Pattern};
use crate::core::isolate::Isolate;
use crate::core::list::List;
use crate::core::mutation::InsertionCodes;
use crate::eval::value::EvalResult;
use crate::lineage::classifier::LineagePattern;

/// The three disjoint name namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Clusters,
    Patterns,
    Lists,
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clusters => write!(f, "clusters"),
            Self::Patterns => write!(f, "patterns"),
            Self::Lists => write!(f, "lists"),
        }
    }
}

/// All engine state: the isolate arena, the three binding namespaces, the
/// insertion-code dictionaries, lineage tables, and mode flags.
///
/// Every front end drives the engine through
/// `evaluate(command, &mut EngineState)`; the arena is append-only during
/// ingestion and read-only during query evaluation.
#[derive(Debug, Default)]
pub struct EngineState {
    /// The global isolate store; clusters hold indices into this arena
    pub isolates: Vec<Isolate>,
    /// accession id -> arena index, for duplicate detection and metadata
    /// back-fill
    pub accession_index: HashMap<u32, u32>,

    pub clusters: IndexMap<String, Cluster>,
    pub patterns: IndexMap<String, Pattern>,
    pub lists: IndexMap<String, List>,

    pub insertion_codes: InsertionCodes,

    /// Alias label -> lineage name(s), for sublineage expansion
    pub lineage_aliases: HashMap<String, Vec<String>>,
    /// Characteristic patterns per lineage, built by the classifier
    pub lineage_patterns: HashMap<String, Vec<LineagePattern>>,

    /// Lowercased country and state names present in the arena; assignment
    /// targets may not shadow these
    pub known_places: HashSet<String>,

    /// Nucleotide-space mutations (vs protein-space); affects wildcard
    /// handling in consensus
    pub nucleotide_mode: bool,
    /// Exclude wildcard `N` calls from the `> < #` mutation-count filters
    pub exclude_n_from_counts: bool,

    /// Result of the previous command, addressed by the `last` keyword
    pub last_result: Option<EvalResult>,
}

impl EngineState {
    pub fn new() -> Self {
        Self {
            nucleotide_mode: true,
            exclude_n_from_counts: true,
            ..Self::default()
        }
    }

    /// The cluster of every loaded isolate
    pub fn all_isolates(&self) -> Cluster {
        Cluster::from_sorted((0..self.isolates.len() as u32).collect())
    }

    pub fn isolate(&self, index: u32) -> &Isolate {
        &self.isolates[index as usize]
    }

    /// Which namespace a name is bound in, if any
    pub fn namespace_of(&self, name: &str) -> Option<Namespace> {
        if self.clusters.contains_key(name) {
            Some(Namespace::Clusters)
        } else if self.patterns.contains_key(name) {
            Some(Namespace::Patterns)
        } else if self.lists.contains_key(name) {
            Some(Namespace::Lists)
        } else {
            None
        }
    }

    /// Largest accession id present, for synthetic id assignment
    pub fn max_accession_id(&self) -> u32 {
        self.accession_index.keys().copied().max().unwrap_or(0)
    }

    /// Append isolates to the arena, dropping duplicates by accession id.
    /// Returns the number of duplicates skipped.
    pub fn add_isolates(&mut self, isolates: Vec<Isolate>) -> usize {
        let mut skipped = 0;
        self.isolates.reserve(isolates.len());
        for isolate in isolates {
            if self.accession_index.contains_key(&isolate.accession_id) {
                skipped += 1;
                continue;
            }
            let index = self.isolates.len() as u32;
            self.accession_index.insert(isolate.accession_id, index);
            self.known_places.insert(isolate.country.to_lowercase());
            if !isolate.state.is_empty() {
                self.known_places.insert(isolate.state.to_lowercase());
            }
            self.isolates.push(isolate);
        }
        skipped
    }

    /// Group arena indices by lineage; isolates with no lineage are skipped
    pub fn lineage_members(&self) -> HashMap<String, Vec<u32>> {
        let mut members: HashMap<String, Vec<u32>> = HashMap::new();
        for (i, isolate) in self.isolates.iter().enumerate() {
            if !isolate.lineage.is_empty() {
                members
                    .entry(isolate.lineage.clone())
                    .or_default()
                    .push(i as u32);
            }
        }
        members
    }

    /// Expand a lineage query through the alias table. `AY.4` becomes
    /// `B.1.617.2.4` when `AY -> B.1.617.2`; a bare alias expands to all of
    /// its targets. A trailing `.*` is preserved for the caller's prefix
    /// matching.
    pub fn expand_lineage(&self, query: &str) -> Vec<String> {
        let (stem, wildcard) = match query.strip_suffix(".*") {
            Some(stem) => (stem, true),
            None => (query, false),
        };
        let stem_upper = stem.to_ascii_uppercase();

        let mut expanded: Vec<String> = Vec::new();
        if let Some(targets) = self.lineage_aliases.get(&stem_upper) {
            expanded.extend(targets.iter().cloned());
        } else if let Some((label, rest)) = stem_upper.split_once('.') {
            if let Some(targets) = self.lineage_aliases.get(label) {
                for target in targets {
                    expanded.push(format!("{target}.{rest}"));
                }
            }
        }
        if expanded.is_empty() {
            expanded.push(stem_upper);
        }

        if wildcard {
            for name in &mut expanded {
                name.push_str(".*");
            }
        }
        expanded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_isolate(accession: u32, country: &str) -> Isolate {
        Isolate::new(country, "", None, accession, Vec::new())
    }

    #[test]
    fn test_add_isolates_dedup() {
        let mut state = EngineState::new();
        let skipped = state.add_isolates(vec![
            make_isolate(1, "USA"),
            make_isolate(2, "India"),
            make_isolate(1, "UK"),
        ]);
        assert_eq!(skipped, 1);
        assert_eq!(state.isolates.len(), 2);
        assert_eq!(state.max_accession_id(), 2);
        assert!(state.known_places.contains("usa"));
        assert!(!state.known_places.contains("uk"));
    }

    #[test]
    fn test_namespace_disjointness_lookup() {
        let mut state = EngineState::new();
        state.clusters.insert("a".into(), Cluster::empty());
        state.patterns.insert("p".into(), Pattern::empty());
        assert_eq!(state.namespace_of("a"), Some(Namespace::Clusters));
        assert_eq!(state.namespace_of("p"), Some(Namespace::Patterns));
        assert_eq!(state.namespace_of("x"), None);
    }

    #[test]
    fn test_expand_lineage_aliases() {
        let mut state = EngineState::new();
        state
            .lineage_aliases
            .insert("AY".into(), vec!["B.1.617.2".into()]);
        state.lineage_aliases.insert(
            "XBB".into(),
            vec!["BJ.1".into(), "BM.1.1.1".into()],
        );

        assert_eq!(state.expand_lineage("AY.4"), vec!["B.1.617.2.4"]);
        assert_eq!(state.expand_lineage("AY"), vec!["B.1.617.2"]);
        assert_eq!(
            state.expand_lineage("XBB"),
            vec!["BJ.1".to_string(), "BM.1.1.1".to_string()]
        );
        assert_eq!(state.expand_lineage("B.1.1.7"), vec!["B.1.1.7"]);
        assert_eq!(state.expand_lineage("AY.4.*"), vec!["B.1.617.2.4.*"]);
    }
}

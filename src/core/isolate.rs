use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::mutation::Mutation;

/// One sequenced virus record.
///
/// Isolates live in the engine's arena (`EngineState::isolates`); clusters
/// reference them by arena index and never copy them. Identity is the
/// accession id alone: two isolates with the same id are the same isolate
/// regardless of any other field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Isolate {
    pub country: String,
    pub state: String,
    /// Collection date; None when the record carried no usable date
    pub date: Option<NaiveDate>,
    pub accession_id: u32,
    /// Sorted by position; wildcard `N` calls are kept out of this list and
    /// recorded as ranges in `n_regions` instead
    pub mutations: Vec<Mutation>,
    /// Pango lineage, back-filled from metadata; empty when unknown
    pub lineage: String,
    /// Inclusive position ranges of wildcard/unknown calls
    pub n_regions: Vec<(u16, u16)>,
}

impl Isolate {
    pub fn new(
        country: impl Into<String>,
        state: impl Into<String>,
        date: Option<NaiveDate>,
        accession_id: u32,
        mutations: Vec<Mutation>,
    ) -> Self {
        Self {
            country: country.into(),
            state: state.into(),
            date,
            accession_id,
            mutations,
            lineage: String::new(),
            n_regions: Vec::new(),
        }
    }

    /// Mutation count as used by the `> < #` filters. With `exclude_n` the
    /// count is the substitution/deletion/insertion list alone; without it,
    /// wildcard calls count position by position.
    pub fn mutation_count(&self, exclude_n: bool) -> usize {
        let base = self.mutations.len();
        if exclude_n {
            base
        } else {
            base + self
                .n_regions
                .iter()
                .map(|&(start, end)| (end - start) as usize + 1)
                .sum::<usize>()
        }
    }

    /// Is `position` inside one of this isolate's wildcard regions?
    pub fn position_unknown(&self, position: u32) -> bool {
        let Ok(position) = u16::try_from(position) else {
            return false;
        };
        // n_regions is sorted and non-overlapping
        match self.n_regions.binary_search_by(|&(start, _)| start.cmp(&position)) {
            Ok(_) => true,
            Err(0) => false,
            Err(i) => self.n_regions[i - 1].1 >= position,
        }
    }

    /// Does this isolate carry the mutation (exact match)?
    pub fn has_mutation(&self, mutation: &Mutation) -> bool {
        self.mutations
            .binary_search_by(|m| m.cmp(mutation))
            .is_ok()
    }
}

impl PartialEq for Isolate {
    fn eq(&self, other: &Self) -> bool {
        self.accession_id == other.accession_id
    }
}

impl Eq for Isolate {}

impl std::hash::Hash for Isolate {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.accession_id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mutation::InsertionCodes;

    fn make(accession: u32, tokens: &[&str]) -> Isolate {
        let codes = InsertionCodes::new();
        let mut mutations: Vec<Mutation> = tokens
            .iter()
            .map(|t| Mutation::parse(t, &codes).unwrap())
            .collect();
        mutations.sort();
        Isolate::new("USA", "CA", None, accession, mutations)
    }

    #[test]
    fn test_identity_by_accession_only() {
        let a = make(1, &["N501Y"]);
        let mut b = make(1, &["E484K", "D614G"]);
        b.country = "India".to_string();
        assert_eq!(a, b);

        let c = make(2, &["N501Y"]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_has_mutation() {
        let codes = InsertionCodes::new();
        let iso = make(1, &["E484K", "N501Y", "D614G"]);
        assert!(iso.has_mutation(&Mutation::parse("N501Y", &codes).unwrap()));
        assert!(!iso.has_mutation(&Mutation::parse("N501T", &codes).unwrap()));
    }

    #[test]
    fn test_mutation_count_with_n_regions() {
        let mut iso = make(1, &["N501Y", "D614G"]);
        iso.n_regions = vec![(100, 104), (200, 200)];
        assert_eq!(iso.mutation_count(true), 2);
        assert_eq!(iso.mutation_count(false), 2 + 5 + 1);
    }

    #[test]
    fn test_position_unknown() {
        let mut iso = make(1, &[]);
        iso.n_regions = vec![(100, 104), (200, 210)];
        assert!(iso.position_unknown(100));
        assert!(iso.position_unknown(104));
        assert!(iso.position_unknown(205));
        assert!(!iso.position_unknown(105));
        assert!(!iso.position_unknown(99));
        assert!(!iso.position_unknown(211));
    }
}

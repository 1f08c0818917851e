use serde::{Deserialize, Serialize};

use crate::core::isolate::Isolate;
use crate::core::mutation::{InsertionCodes, Mutation};

/// A named, unordered set of isolates, held as sorted arena indices into
/// `EngineState::isolates`. Transient evaluation results carry an empty name;
/// assignment binds the name in the clusters namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    /// Sorted, deduplicated arena indices
    indices: Vec<u32>,
}

impl Cluster {
    pub fn new(mut indices: Vec<u32>) -> Self {
        indices.sort_unstable();
        indices.dedup();
        Self {
            name: String::new(),
            indices,
        }
    }

    /// Build from indices already sorted and deduplicated (partitioned
    /// filters produce these directly)
    pub fn from_sorted(indices: Vec<u32>) -> Self {
        debug_assert!(indices.windows(2).all(|w| w[0] < w[1]));
        Self {
            name: String::new(),
            indices,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn contains(&self, index: u32) -> bool {
        self.indices.binary_search(&index).is_ok()
    }

    pub fn iter<'a>(&'a self, arena: &'a [Isolate]) -> impl Iterator<Item = &'a Isolate> + 'a {
        self.indices.iter().map(move |&i| &arena[i as usize])
    }

    /// Set union by arena index (equivalently by accession id, since the
    /// arena is deduplicated on load)
    pub fn union(&self, other: &Self) -> Self {
        Self::from_sorted(merge_union(&self.indices, &other.indices))
    }

    pub fn intersection(&self, other: &Self) -> Self {
        Self::from_sorted(merge_intersection(&self.indices, &other.indices))
    }

    pub fn minus(&self, other: &Self) -> Self {
        Self::from_sorted(merge_minus(&self.indices, &other.indices))
    }

    /// Same isolate set, ignoring name and order
    pub fn same_isolates(&self, other: &Self) -> bool {
        self.indices == other.indices
    }
}

/// A named, position-ordered set of mutations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    pub name: String,
    /// Sorted by position, deduplicated
    mutations: Vec<Mutation>,
}

impl Pattern {
    pub fn new(mut mutations: Vec<Mutation>) -> Self {
        mutations.sort_unstable();
        mutations.dedup();
        Self {
            name: String::new(),
            mutations,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn contains(&self, mutation: &Mutation) -> bool {
        self.mutations.binary_search(mutation).is_ok()
    }

    /// Union with exact-match deduplication
    pub fn union(&self, other: &Self) -> Self {
        Self {
            name: String::new(),
            mutations: merge_union(&self.mutations, &other.mutations),
        }
    }

    pub fn intersection(&self, other: &Self) -> Self {
        Self {
            name: String::new(),
            mutations: merge_intersection(&self.mutations, &other.mutations),
        }
    }

    /// Removes only exact matches; a different mutant at the same position
    /// survives
    pub fn minus(&self, other: &Self) -> Self {
        Self {
            name: String::new(),
            mutations: merge_minus(&self.mutations, &other.mutations),
        }
    }

    /// Symmetric-difference distance used by the lineage classifier
    pub fn distance(&self, other: &Self) -> usize {
        self.minus(other).len() + other.minus(self).len()
    }

    pub fn same_mutations(&self, other: &Self) -> bool {
        self.mutations == other.mutations
    }

    /// Space-separated token rendering, in position order
    pub fn render(&self, codes: &InsertionCodes) -> String {
        let tokens: Vec<String> = self.mutations.iter().map(|m| m.render(codes)).collect();
        tokens.join(" ")
    }
}

fn merge_union<T: Ord + Clone>(a: &[T], b: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => {
                out.push(a[i].clone());
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(b[j].clone());
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                out.push(a[i].clone());
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

fn merge_intersection<T: Ord + Clone>(a: &[T], b: &[T]) -> Vec<T> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i].clone());
                i += 1;
                j += 1;
            }
        }
    }
    out
}

fn merge_minus<T: Ord + Clone>(a: &[T], b: &[T]) -> Vec<T> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() {
        if j >= b.len() {
            out.extend_from_slice(&a[i..]);
            break;
        }
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => {
                out.push(a[i].clone());
                i += 1;
            }
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                i += 1;
                j += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mutation::InsertionCodes;

    fn pattern(tokens: &[&str]) -> Pattern {
        let codes = InsertionCodes::new();
        Pattern::new(
            tokens
                .iter()
                .map(|t| Mutation::parse(t, &codes).unwrap())
                .collect(),
        )
    }

    #[test]
    fn test_cluster_set_laws() {
        let a = Cluster::new(vec![1, 2, 3, 5]);
        let b = Cluster::new(vec![2, 3, 4]);

        let union = a.union(&b);
        let inter = a.intersection(&b);
        // |A| + |B| == |A+B| + |A*B|
        assert_eq!(a.len() + b.len(), union.len() + inter.len());
        // commutativity
        assert!(a.intersection(&b).same_isolates(&b.intersection(&a)));
        // A - A is empty
        assert!(a.minus(&a).is_empty());

        assert_eq!(union.indices(), &[1, 2, 3, 4, 5]);
        assert_eq!(inter.indices(), &[2, 3]);
        assert_eq!(a.minus(&b).indices(), &[1, 5]);
    }

    #[test]
    fn test_cluster_dedup_on_new() {
        let c = Cluster::new(vec![3, 1, 2, 3, 1]);
        assert_eq!(c.indices(), &[1, 2, 3]);
    }

    #[test]
    fn test_pattern_set_laws() {
        let a = pattern(&["E484K", "N501Y", "D614G"]);
        let b = pattern(&["N501Y", "P681H"]);

        let union = a.union(&b);
        let inter = a.intersection(&b);
        assert_eq!(a.len() + b.len(), union.len() + inter.len());
        assert!(a.minus(&a).is_empty());
        assert_eq!(inter.len(), 1);
        assert_eq!(union.len(), 4);
    }

    #[test]
    fn test_pattern_minus_exact_match_only() {
        let a = pattern(&["N501Y"]);
        let b = pattern(&["N501T"]);
        // Different mutant at the same position is not removed
        assert_eq!(a.minus(&b).len(), 1);
    }

    #[test]
    fn test_pattern_ordered_by_position() {
        let p = pattern(&["D614G", "E484K", "N501Y"]);
        let positions: Vec<u32> = p.mutations().iter().map(|m| m.position).collect();
        assert_eq!(positions, vec![484, 501, 614]);
    }

    #[test]
    fn test_pattern_distance() {
        let a = pattern(&["E484K", "N501Y"]);
        let b = pattern(&["N501Y", "P681H"]);
        assert_eq!(a.distance(&b), 2);
        assert_eq!(a.distance(&a), 0);
    }

    #[test]
    fn test_pattern_render() {
        let codes = InsertionCodes::new();
        let p = pattern(&["D614G", "E484K"]);
        assert_eq!(p.render(&codes), "E484K D614G");
    }
}

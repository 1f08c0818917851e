use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wildtype values at or above this base mark an insertion rather than a
/// substitution. For insertions the pair `(wildtype - INSERTION_BASE, mutant)`
/// forms a 16-bit code into the per-position insertion dictionary.
pub const INSERTION_BASE: u8 = 128;

/// Byte used for deletions in the mutant slot
pub const DELETION_CHAR: u8 = b'-';

/// Byte used for stop codons in the mutant slot
pub const STOP_CHAR: u8 = b'*';

/// Byte used for wildcard/unknown calls
pub const WILDCARD_CHAR: u8 = b'N';

#[derive(Error, Debug)]
pub enum MutationError {
    #[error("Malformed mutation token: '{0}'")]
    Malformed(String),

    #[error("Mutation position out of range: '{0}'")]
    PositionOutOfRange(String),

    #[error("Unknown protein name: '{0}'")]
    UnknownProtein(String),

    #[error("Insertion code space exhausted at position {0}")]
    InsertionCodesExhausted(u32),

    #[error("Corrupt mutation encoding: wildtype {wildtype:#04x} mutant {mutant:#04x} at position {position}")]
    CorruptEncoding {
        wildtype: u8,
        position: u32,
        mutant: u8,
    },
}

/// A single point mutation relative to the reference sequence.
///
/// Substitutions, deletions (`-`) and stop codons (`*`) carry the literal byte
/// in `mutant`. Insertions reserve `wildtype >= INSERTION_BASE` and encode the
/// inserted string as a 16-bit code split across `wildtype` and `mutant`
/// (see [`InsertionCodes`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mutation {
    pub wildtype: u8,
    pub position: u32,
    pub mutant: u8,
}

impl Mutation {
    pub fn new(wildtype: u8, position: u32, mutant: u8) -> Self {
        Self {
            wildtype,
            position,
            mutant,
        }
    }

    /// Build an insertion mutation from an allocated 16-bit insertion code
    pub fn insertion(position: u32, code: u16) -> Self {
        Self {
            wildtype: INSERTION_BASE + (code >> 8) as u8,
            position,
            mutant: (code & 0xff) as u8,
        }
    }

    pub fn is_insertion(&self) -> bool {
        self.wildtype >= INSERTION_BASE
    }

    pub fn is_deletion(&self) -> bool {
        !self.is_insertion() && self.mutant == DELETION_CHAR
    }

    /// Wildcard/unknown call (`N` in nucleotide space)
    pub fn is_wildcard(&self) -> bool {
        !self.is_insertion() && self.mutant == WILDCARD_CHAR
    }

    /// The 16-bit insertion code, if this mutation encodes an insertion
    pub fn insertion_code(&self) -> Option<u16> {
        if self.is_insertion() {
            Some((u16::from(self.wildtype - INSERTION_BASE) << 8) | u16::from(self.mutant))
        } else {
            None
        }
    }

    /// Parse a mutation token: `<wt><pos><mut>` (e.g. `N501Y`, `E484-`,
    /// `Q493*`) or `ins<pos><chars>` for insertions.
    ///
    /// Insertion tokens allocate a code in `codes`, so repeated parses of the
    /// same token at the same position yield an equal mutation.
    ///
    /// # Errors
    ///
    /// Returns `MutationError::Malformed` for tokens that do not fit the
    /// grammar and `MutationError::PositionOutOfRange` when the position does
    /// not fit in a `u32`.
    pub fn parse(token: &str, codes: &InsertionCodes) -> Result<Self, MutationError> {
        let bytes = token.as_bytes();
        if bytes.len() >= 4 && token[..3].eq_ignore_ascii_case("ins") {
            return Self::parse_insertion(token, &token[3..], codes);
        }

        if bytes.len() < 3 {
            return Err(MutationError::Malformed(token.to_string()));
        }

        let wildtype = bytes[0].to_ascii_uppercase();
        let mutant = bytes[bytes.len() - 1].to_ascii_uppercase();
        if !wildtype.is_ascii_alphabetic() {
            return Err(MutationError::Malformed(token.to_string()));
        }
        if !(mutant.is_ascii_alphabetic() || mutant == DELETION_CHAR || mutant == STOP_CHAR) {
            return Err(MutationError::Malformed(token.to_string()));
        }

        let digits = &token[1..token.len() - 1];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MutationError::Malformed(token.to_string()));
        }
        let position: u32 = digits
            .parse()
            .map_err(|_| MutationError::PositionOutOfRange(token.to_string()))?;
        if position == 0 {
            return Err(MutationError::PositionOutOfRange(token.to_string()));
        }

        Ok(Self {
            wildtype,
            position,
            mutant,
        })
    }

    fn parse_insertion(
        token: &str,
        rest: &str,
        codes: &InsertionCodes,
    ) -> Result<Self, MutationError> {
        let digit_end = rest
            .bytes()
            .position(|b| !b.is_ascii_digit())
            .unwrap_or(rest.len());
        if digit_end == 0 || digit_end == rest.len() {
            return Err(MutationError::Malformed(token.to_string()));
        }
        let position: u32 = rest[..digit_end]
            .parse()
            .map_err(|_| MutationError::PositionOutOfRange(token.to_string()))?;
        let inserted = rest[digit_end..].to_ascii_uppercase();
        if !inserted.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(MutationError::Malformed(token.to_string()));
        }
        let code = codes.encode(position, inserted.as_bytes())?;
        Ok(Self::insertion(position, code))
    }

    /// Render back to token form. Insertions are rendered through the code
    /// dictionary; an unknown code renders as `ins<pos>?`, which only happens
    /// if the mutation did not come from `parse` with the same dictionary.
    pub fn render(&self, codes: &InsertionCodes) -> String {
        if let Some(code) = self.insertion_code() {
            match codes.decode(self.position, code) {
                Some(bytes) => format!(
                    "ins{}{}",
                    self.position,
                    String::from_utf8_lossy(&bytes)
                ),
                None => format!("ins{}?", self.position),
            }
        } else {
            format!(
                "{}{}{}",
                self.wildtype as char, self.position, self.mutant as char
            )
        }
    }
}

// Ordering is by position first so mutation lists sort into genome order.
impl Ord for Mutation {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.position, self.wildtype, self.mutant).cmp(&(
            other.position,
            other.wildtype,
            other.mutant,
        ))
    }
}

impl PartialOrd for Mutation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Per-position dictionaries mapping inserted byte strings to 16-bit codes.
///
/// Codes are allocated monotonically and never reused, so encoding is
/// idempotent for identical strings and collision-free across distinct
/// strings at a position. Allocation is serialized behind a single mutex;
/// contention only matters during ingestion.
#[derive(Debug, Default)]
pub struct InsertionCodes {
    inner: Mutex<HashMap<u32, PositionCodes>>,
}

#[derive(Debug, Default)]
struct PositionCodes {
    by_string: HashMap<Vec<u8>, u16>,
    by_code: Vec<Vec<u8>>,
}

/// Largest allocatable insertion code: shift must keep wildtype within a byte
const MAX_INSERTION_CODE: usize = ((255 - INSERTION_BASE as usize) << 8) | 0xff;

impl InsertionCodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `bytes` at `position`, allocating the next unused code if absent
    ///
    /// # Errors
    ///
    /// Returns `MutationError::InsertionCodesExhausted` if the position has no
    /// codes left.
    pub fn encode(&self, position: u32, bytes: &[u8]) -> Result<u16, MutationError> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let table = inner.entry(position).or_default();
        if let Some(&code) = table.by_string.get(bytes) {
            return Ok(code);
        }
        let next = table.by_code.len();
        if next > MAX_INSERTION_CODE {
            return Err(MutationError::InsertionCodesExhausted(position));
        }
        let code = next as u16;
        table.by_string.insert(bytes.to_vec(), code);
        table.by_code.push(bytes.to_vec());
        Ok(code)
    }

    /// Inverse of `encode`, used only for display
    pub fn decode(&self, position: u32, code: u16) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner
            .get(&position)?
            .by_code
            .get(code as usize)
            .cloned()
    }
}

/// SARS-CoV-2 protein for protein-coordinate mutations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protein {
    Spike,
    Orf1a,
    Orf1b,
    Orf3a,
    E,
    M,
    Orf6,
    Orf7a,
    Orf7b,
    Orf8,
    N,
    Orf10,
}

impl Protein {
    /// Parse a protein label as it appears in the `Protein:<token>` qualified
    /// mutation form. Case-insensitive; accepts the common short forms.
    pub fn parse(s: &str) -> Result<Self, MutationError> {
        match s.to_ascii_uppercase().as_str() {
            "S" | "SPIKE" => Ok(Self::Spike),
            "ORF1A" | "NSP" => Ok(Self::Orf1a),
            "ORF1B" => Ok(Self::Orf1b),
            "ORF3A" => Ok(Self::Orf3a),
            "E" => Ok(Self::E),
            "M" => Ok(Self::M),
            "ORF6" => Ok(Self::Orf6),
            "ORF7A" => Ok(Self::Orf7a),
            "ORF7B" => Ok(Self::Orf7b),
            "ORF8" => Ok(Self::Orf8),
            "N" => Ok(Self::N),
            "ORF10" => Ok(Self::Orf10),
            _ => Err(MutationError::UnknownProtein(s.to_string())),
        }
    }

    /// 1-based nucleotide range of the coding sequence on the reference
    pub fn nucleotide_range(&self) -> (u32, u32) {
        match self {
            Self::Orf1a => (266, 13468),
            Self::Orf1b => (13468, 21555),
            Self::Spike => (21563, 25384),
            Self::Orf3a => (25393, 26220),
            Self::E => (26245, 26472),
            Self::M => (26523, 27191),
            Self::Orf6 => (27202, 27387),
            Self::Orf7a => (27394, 27759),
            Self::Orf7b => (27756, 27887),
            Self::Orf8 => (27894, 28259),
            Self::N => (28274, 29533),
            Self::Orf10 => (29558, 29674),
        }
    }

    /// The protein whose coding sequence contains a nucleotide position
    pub fn containing(position: u32) -> Option<Self> {
        const ALL: [Protein; 12] = [
            Protein::Orf1a,
            Protein::Orf1b,
            Protein::Spike,
            Protein::Orf3a,
            Protein::E,
            Protein::M,
            Protein::Orf6,
            Protein::Orf7a,
            Protein::Orf7b,
            Protein::Orf8,
            Protein::N,
            Protein::Orf10,
        ];
        ALL.into_iter().find(|p| {
            let (start, end) = p.nucleotide_range();
            position >= start && position <= end
        })
    }

    /// Offset used to fold protein-coordinate mutations into the shared
    /// `u32` position space. Protein positions never reach the spacing.
    pub fn position_offset(&self) -> u32 {
        const SPACING: u32 = 10_000;
        let ordinal = match self {
            Self::Spike => 0,
            Self::Orf1a => 1,
            Self::Orf1b => 2,
            Self::Orf3a => 3,
            Self::E => 4,
            Self::M => 5,
            Self::Orf6 => 6,
            Self::Orf7a => 7,
            Self::Orf7b => 8,
            Self::Orf8 => 9,
            Self::N => 10,
            Self::Orf10 => 11,
        };
        100_000 + ordinal * SPACING
    }

    fn from_offset(position: u32) -> Option<(Self, u32)> {
        const ALL: [Protein; 12] = [
            Protein::Spike,
            Protein::Orf1a,
            Protein::Orf1b,
            Protein::Orf3a,
            Protein::E,
            Protein::M,
            Protein::Orf6,
            Protein::Orf7a,
            Protein::Orf7b,
            Protein::Orf8,
            Protein::N,
            Protein::Orf10,
        ];
        for protein in ALL {
            let offset = protein.position_offset();
            if position >= offset && position < offset + 10_000 {
                return Some((protein, position - offset));
            }
        }
        None
    }
}

impl std::fmt::Display for Protein {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Spike => "S",
            Self::Orf1a => "ORF1a",
            Self::Orf1b => "ORF1b",
            Self::Orf3a => "ORF3a",
            Self::E => "E",
            Self::M => "M",
            Self::Orf6 => "ORF6",
            Self::Orf7a => "ORF7a",
            Self::Orf7b => "ORF7b",
            Self::Orf8 => "ORF8",
            Self::N => "N",
            Self::Orf10 => "ORF10",
        };
        write!(f, "{name}")
    }
}

/// A mutation in protein coordinates, produced from the `Protein:<token>`
/// qualified form or by mapping a nucleotide mutation into a coding region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProteinMutation {
    pub protein: Protein,
    pub wildtype: u8,
    pub position: u32,
    pub mutant: u8,
}

impl ProteinMutation {
    /// Parse the qualified form `Protein:<token>`, e.g. `S:N501Y`
    pub fn parse(token: &str, codes: &InsertionCodes) -> Result<Self, MutationError> {
        let (label, rest) = token
            .split_once(':')
            .ok_or_else(|| MutationError::Malformed(token.to_string()))?;
        let protein = Protein::parse(label)?;
        let inner = Mutation::parse(rest, codes)?;
        Ok(Self {
            protein,
            wildtype: inner.wildtype,
            position: inner.position,
            mutant: inner.mutant,
        })
    }

    /// Fold into the shared position space so protein mutations can live in
    /// ordinary patterns
    pub fn to_mutation(&self) -> Mutation {
        Mutation {
            wildtype: self.wildtype,
            position: self.protein.position_offset() + self.position,
            mutant: self.mutant,
        }
    }

    /// Recover a protein mutation from a folded position, if it is one
    pub fn from_mutation(mutation: &Mutation) -> Option<Self> {
        let (protein, position) = Protein::from_offset(mutation.position)?;
        Some(Self {
            protein,
            wildtype: mutation.wildtype,
            position,
            mutant: mutation.mutant,
        })
    }
}

impl std::fmt::Display for ProteinMutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}{}{}",
            self.protein, self.wildtype as char, self.position, self.mutant as char
        )
    }
}

use std::collections::HashMap;
use std::path::Path;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::core::dates::parse_date_flexible;
use crate::core::state::EngineState;
use crate::ingest::IngestError;

/// Fixed base subtracted from accession ids before indexing into the offset
/// table; ids below the base go to the overflow map
const ACCESSION_INDEX_BASE: u32 = 400_000;

/// Upper bound on the dense table; ids whose slot would land past this go to
/// the overflow map, so one outlandish accession id cannot balloon the table
const MAX_DENSE_SLOTS: usize = 1 << 24;

/// Required metadata columns, located by header name
const COL_VIRUS_NAME: &str = "virus name";
const COL_ACCESSION: &str = "accession id";
const COL_DATE: &str = "collection date";
const COL_LOCATION: &str = "location";
const COL_LINEAGE: &str = "pango lineage";
const COL_SUBSTITUTIONS: &str = "substitutions";

#[derive(Debug, Clone, Copy)]
struct Columns {
    #[allow(dead_code)]
    virus_name: usize,
    accession: usize,
    date: usize,
    location: usize,
    lineage: usize,
    #[allow(dead_code)]
    substitutions: usize,
}

/// Sparse `accession_id -> row byte offset` index. Offsets are stored +1 so
/// zero means absent; lookups are bounds-checked against the dense table and
/// fall through to the overflow map for ids below the base or past the dense
/// span.
#[derive(Debug, Default)]
pub struct RowIndex {
    dense: Vec<u64>,
    overflow: HashMap<u32, u64>,
}

impl RowIndex {
    fn insert(&mut self, accession: u32, offset: u64) {
        match accession
            .checked_sub(ACCESSION_INDEX_BASE)
            .map(|i| i as usize)
        {
            Some(slot) if slot < MAX_DENSE_SLOTS => {
                if slot >= self.dense.len() {
                    self.dense.resize(slot + 1, 0);
                }
                self.dense[slot] = offset + 1;
            }
            _ => {
                self.overflow.insert(accession, offset + 1);
            }
        }
    }

    pub fn get(&self, accession: u32) -> Option<u64> {
        let stored = match accession
            .checked_sub(ACCESSION_INDEX_BASE)
            .map(|i| i as usize)
        {
            Some(slot) if slot < MAX_DENSE_SLOTS => self.dense.get(slot).copied().unwrap_or(0),
            _ => self.overflow.get(&accession).copied().unwrap_or(0),
        };
        stored.checked_sub(1)
    }

    pub fn len(&self) -> usize {
        self.dense.iter().filter(|&&v| v != 0).count() + self.overflow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of a metadata load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataSummary {
    /// Rows indexed from the table
    pub rows: usize,
    /// Isolates whose lineage or date was back-filled
    pub updated: usize,
}

/// Load a tab-separated metadata table and back-fill lineage (and missing
/// collection dates) onto already-loaded isolates.
///
/// Columns are located by header name, not position. The bulk row scan is a
/// single pass that records byte offsets; the per-isolate back-fill then runs
/// partitioned over the arena with O(1) row lookup through [`RowIndex`].
///
/// # Errors
///
/// Returns `IngestError::Io` for unreadable files,
/// `IngestError::MissingColumn` when a required header is absent, and
/// `IngestError::FileTooSmall` for files with no data rows.
pub fn load_metadata(path: &Path, state: &mut EngineState) -> Result<MetadataSummary, IngestError> {
    let bytes = std::fs::read(path)?;
    let summary = apply_metadata(&bytes, state)?;
    info!(
        path = %path.display(),
        rows = summary.rows,
        updated = summary.updated,
        "applied metadata table"
    );
    Ok(summary)
}

pub fn apply_metadata(bytes: &[u8], state: &mut EngineState) -> Result<MetadataSummary, IngestError> {
    let header_end = bytes
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| IngestError::FileTooSmall {
            path: "<metadata>".to_string(),
            size: bytes.len(),
        })?;
    let header = std::str::from_utf8(&bytes[..header_end])
        .map_err(|_| IngestError::Format("metadata header is not UTF-8".to_string()))?;
    let columns = locate_columns(header)?;

    let index = build_row_index(bytes, header_end + 1, columns.accession);
    if index.is_empty() {
        return Err(IngestError::FileTooSmall {
            path: "<metadata>".to_string(),
            size: bytes.len(),
        });
    }

    // Back-fill in parallel; each isolate's row lookup is independent
    let updated: usize = state
        .isolates
        .par_iter_mut()
        .map(|isolate| {
            let Some(offset) = index.get(isolate.accession_id) else {
                return 0;
            };
            let Some(fields) = row_fields(bytes, offset as usize) else {
                return 0;
            };
            let mut changed = false;

            if let Some(lineage) = fields.get(columns.lineage) {
                let lineage = lineage.trim();
                if !lineage.is_empty() && lineage != "Unassigned" && isolate.lineage != lineage {
                    isolate.lineage = lineage.to_string();
                    changed = true;
                }
            }
            if isolate.date.is_none() {
                if let Some(text) = fields.get(columns.date) {
                    if let Some(date) = parse_date_flexible(text.trim()) {
                        isolate.date = Some(date);
                        changed = true;
                    }
                }
            }
            if isolate.country.is_empty() {
                if let Some(location) = fields.get(columns.location) {
                    let mut parts = location.split('/').map(str::trim);
                    let _region = parts.next();
                    if let Some(country) = parts.next() {
                        isolate.country = country.to_string();
                        changed = true;
                    }
                    if let Some(state_name) = parts.next() {
                        if isolate.state.is_empty() {
                            isolate.state = state_name.to_string();
                        }
                    }
                }
            }
            usize::from(changed)
        })
        .sum();

    Ok(MetadataSummary {
        rows: index.len(),
        updated,
    })
}

fn locate_columns(header: &str) -> Result<Columns, IngestError> {
    let names: Vec<String> = header
        .trim_end_matches('\r')
        .split('\t')
        .map(|s| s.trim().to_lowercase())
        .collect();

    let find = |wanted: &str| -> Result<usize, IngestError> {
        names
            .iter()
            .position(|name| name.contains(wanted))
            .ok_or_else(|| IngestError::MissingColumn(wanted.to_string()))
    };

    Ok(Columns {
        virus_name: find(COL_VIRUS_NAME)?,
        accession: find(COL_ACCESSION)?,
        date: find(COL_DATE)?,
        location: find(COL_LOCATION)?,
        lineage: find(COL_LINEAGE)?,
        substitutions: find(COL_SUBSTITUTIONS)?,
    })
}

/// One pass over the data rows recording each row's byte offset keyed by its
/// accession id
fn build_row_index(bytes: &[u8], mut offset: usize, accession_column: usize) -> RowIndex {
    let mut index = RowIndex::default();
    while offset < bytes.len() {
        let line_end = bytes[offset..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(bytes.len(), |p| offset + p);

        if let Some(fields) = row_fields(bytes, offset) {
            if let Some(text) = fields.get(accession_column) {
                match parse_accession(text.trim()) {
                    Some(accession) => index.insert(accession, offset as u64),
                    None => warn!(row = %text, "metadata row with unparsable accession id"),
                }
            }
        }

        offset = line_end + 1;
    }
    index
}

/// The tab-separated fields of the row starting at `offset`
fn row_fields(bytes: &[u8], offset: usize) -> Option<Vec<&str>> {
    if offset >= bytes.len() {
        return None;
    }
    let line_end = bytes[offset..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |p| offset + p);
    let line = std::str::from_utf8(&bytes[offset..line_end]).ok()?;
    Some(line.trim_end_matches('\r').split('\t').collect())
}

/// `EPI_ISL_1234567` or a bare number
fn parse_accession(text: &str) -> Option<u32> {
    let digits = match text.rfind(|c: char| !c.is_ascii_digit()) {
        Some(i) => &text[i + 1..],
        None => text,
    };
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::loader::parse_buffer;

    const RECORDS: &str = "\
>USA/CA-1/2021-01-15|500001|N501Y\n\
>India/MH-2/|500002|D614G\n\
>UK/ENG-3/2021-03-05|1234|P681H\n";

    const METADATA: &str = "\
Virus name\tAccession ID\tCollection date\tLocation\tPango lineage\tAA Substitutions\n\
hCoV-19/USA/CA-1/2021\tEPI_ISL_500001\t2021-01-15\tNorth America / USA / California\tB.1.1.7\t(N501Y)\n\
hCoV-19/India/MH-2/2021\tEPI_ISL_500002\t2021-02-20\tAsia / India / Maharashtra\tB.1\t(D614G)\n\
hCoV-19/UK/ENG-3/2021\tEPI_ISL_1234\t2021-03-05\tEurope / UK / England\tB.1.1.7\t(P681H)\n";

    fn loaded_state() -> EngineState {
        let mut state = EngineState::new();
        parse_buffer(RECORDS.as_bytes(), &mut state, 2).unwrap();
        state
    }

    #[test]
    fn test_backfill_lineage_and_date() {
        let mut state = loaded_state();
        let summary = apply_metadata(METADATA.as_bytes(), &mut state).unwrap();
        assert_eq!(summary.rows, 3);
        assert_eq!(summary.updated, 3);
        assert_eq!(state.isolates[0].lineage, "B.1.1.7");
        assert_eq!(state.isolates[1].lineage, "B.1");
        // The India record had no date; metadata supplies it
        assert!(state.isolates[1].date.is_some());
    }

    #[test]
    fn test_row_index_base_and_overflow() {
        let mut index = RowIndex::default();
        index.insert(500_001, 10);
        index.insert(1_234, 20); // below the fixed base -> overflow
        assert_eq!(index.get(500_001), Some(10));
        assert_eq!(index.get(1_234), Some(20));
        assert_eq!(index.get(999_999_999), None);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_row_index_extreme_id_does_not_grow_dense_table() {
        let mut index = RowIndex::default();
        index.insert(u32::MAX, 30);
        index.insert(500_001, 40);
        assert_eq!(index.get(u32::MAX), Some(30));
        assert_eq!(index.get(500_001), Some(40));
        assert!(index.dense.len() <= MAX_DENSE_SLOTS);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_missing_column_is_error() {
        let mut state = loaded_state();
        let bad = "Virus name\tAccession ID\tCollection date\tLocation\tAA Substitutions\n";
        let err = apply_metadata(bad.as_bytes(), &mut state).unwrap_err();
        assert!(err.to_string().contains("pango lineage"));
    }

    #[test]
    fn test_columns_located_by_name_not_position() {
        let mut state = loaded_state();
        // Same columns, shuffled order
        let shuffled = "\
Pango lineage\tLocation\tVirus name\tCollection date\tAccession ID\tAA Substitutions\n\
B.1.617.2\tAsia / India\thCoV-19/India/MH-2/2021\t2021-02-20\tEPI_ISL_500002\t(D614G)\n";
        let summary = apply_metadata(shuffled.as_bytes(), &mut state).unwrap();
        assert_eq!(summary.rows, 1);
        assert_eq!(state.isolates[1].lineage, "B.1.617.2");
    }

    #[test]
    fn test_no_rows_is_error() {
        let mut state = loaded_state();
        let empty = "Virus name\tAccession ID\tCollection date\tLocation\tPango lineage\tAA Substitutions\n";
        assert!(apply_metadata(empty.as_bytes(), &mut state).is_err());
    }
}

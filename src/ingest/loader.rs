use std::io::Read;
use std::path::Path;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::core::dates::DateCache;
use crate::core::isolate::Isolate;
use crate::core::mutation::{InsertionCodes, Mutation};
use crate::core::state::EngineState;
use crate::ingest::IngestError;

/// Smallest byte buffer we accept as a record file
const MIN_FILE_SIZE: usize = 4;

/// Outcome of one load command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    /// Isolates appended to the arena
    pub loaded: usize,
    /// Records dropped because their accession id was already present
    pub duplicates: usize,
}

/// Load a record file into the arena, parsing partitions in parallel.
///
/// Files ending in `.gz` are decompressed first. On any error the arena is
/// untouched: partial results never reach the state.
///
/// # Errors
///
/// Returns `IngestError::Io` for unreadable files, `IngestError::FileTooSmall`
/// for undersized ones, and `IngestError::Format` for malformed records.
pub fn load_records(
    path: &Path,
    state: &mut EngineState,
    workers: usize,
) -> Result<LoadSummary, IngestError> {
    let bytes = read_maybe_gzipped(path)?;
    if bytes.len() < MIN_FILE_SIZE {
        return Err(IngestError::FileTooSmall {
            path: path.display().to_string(),
            size: bytes.len(),
        });
    }
    let summary = parse_buffer(&bytes, state, workers)?;
    info!(
        path = %path.display(),
        loaded = summary.loaded,
        duplicates = summary.duplicates,
        "loaded record file"
    );
    Ok(summary)
}

fn read_maybe_gzipped(path: &Path) -> Result<Vec<u8>, IngestError> {
    let raw = std::fs::read(path)?;
    let is_gz = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gz"));
    if !is_gz {
        return Ok(raw);
    }
    let mut decoder = flate2::read::GzDecoder::new(raw.as_slice());
    let mut out = Vec::with_capacity(raw.len() * 4);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Parse a whole record buffer with `workers` partitions and merge the
/// results into the arena in partition order.
///
/// The resulting isolate set is independent of the worker count: partition
/// boundaries snap to record starts and per-partition outputs are
/// concatenated by partition index, never by completion order.
pub fn parse_buffer(
    bytes: &[u8],
    state: &mut EngineState,
    workers: usize,
) -> Result<LoadSummary, IngestError> {
    let partitions = partition_ranges(bytes, workers.max(1));
    debug!(partitions = partitions.len(), bytes = bytes.len(), "partitioned input");

    let codes = &state.insertion_codes;
    let slots: Vec<Vec<Isolate>> = partitions
        .par_iter()
        .map(|&(start, end)| parse_partition(bytes, start, end, codes))
        .collect::<Result<Vec<_>, _>>()?;

    let mut merged: Vec<Isolate> = Vec::with_capacity(slots.iter().map(Vec::len).sum());
    for slot in slots {
        merged.extend(slot);
    }

    assign_synthetic_ids(state, &mut merged);

    let total = merged.len();
    let duplicates = state.add_isolates(merged);
    Ok(LoadSummary {
        loaded: total - duplicates,
        duplicates,
    })
}

/// Give records that carried no accession id a synthetic one, guaranteed not
/// to collide with any id already present in the arena or in this batch
fn assign_synthetic_ids(state: &EngineState, merged: &mut [Isolate]) {
    let batch_max = merged.iter().map(|i| i.accession_id).max().unwrap_or(0);
    let mut next = state.max_accession_id().max(batch_max) + 1;
    for isolate in merged.iter_mut() {
        if isolate.accession_id == 0 {
            isolate.accession_id = next;
            next += 1;
        }
    }
}

/// Compute `workers` byte ranges, each snapped forward so it begins at a
/// record start (`>` at offset 0 or right after a newline)
fn partition_ranges(bytes: &[u8], workers: usize) -> Vec<(usize, usize)> {
    let len = bytes.len();
    let mut starts = Vec::with_capacity(workers);
    starts.push(first_record_start(bytes, 0));
    for w in 1..workers {
        let proposed = len * w / workers;
        starts.push(first_record_start(bytes, proposed));
    }
    starts.sort_unstable();
    starts.dedup();

    let mut ranges = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(len);
        if start < end {
            ranges.push((start, end));
        }
    }
    if ranges.is_empty() {
        ranges.push((len, len));
    }
    ranges
}

/// First offset at or after `from` where a record starts
fn first_record_start(bytes: &[u8], from: usize) -> usize {
    if from == 0 {
        let mut i = 0;
        while i < bytes.len() && bytes[i] != b'>' {
            i += 1;
        }
        return i;
    }
    let mut i = from;
    while i < bytes.len() {
        if bytes[i] == b'>' && bytes[i - 1] == b'\n' {
            return i;
        }
        i += 1;
    }
    bytes.len()
}

/// Scanner states for the record format
/// `>country/state/date|accession_id|mutations\n`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Country,
    State,
    Date,
    Accession,
    Mutations,
}

/// Parse one partition with a single byte-level pass. Records are produced in
/// file order within the partition.
fn parse_partition(
    bytes: &[u8],
    start: usize,
    end: usize,
    codes: &InsertionCodes,
) -> Result<Vec<Isolate>, IngestError> {
    let mut isolates = Vec::new();
    let mut dates = DateCache::new();
    let mut i = start;

    while i < end {
        if bytes[i] != b'>' {
            // Tolerate leading blank lines between records
            if bytes[i] == b'\n' || bytes[i] == b'\r' {
                i += 1;
                continue;
            }
            return Err(IngestError::Format(format!(
                "expected record start '>' at byte {i}"
            )));
        }
        i += 1;

        let mut field = Field::Country;
        let mut field_start = i;
        let mut country = "";
        let mut state_name = "";
        let mut date_text = "";
        let mut accession_text = "";
        let mut mutations: Vec<Mutation> = Vec::new();
        let mut n_regions: Vec<(u16, u16)> = Vec::new();

        loop {
            let byte = if i < end { bytes[i] } else { b'\n' };
            match (field, byte) {
                (Field::Country, b'/') => {
                    country = field_str(bytes, field_start, i)?;
                    field = Field::State;
                    field_start = i + 1;
                }
                (Field::State, b'/') => {
                    state_name = field_str(bytes, field_start, i)?;
                    field = Field::Date;
                    field_start = i + 1;
                }
                (Field::Date, b'|') => {
                    date_text = field_str(bytes, field_start, i)?;
                    field = Field::Accession;
                    field_start = i + 1;
                }
                (Field::Accession, b'|') => {
                    accession_text = field_str(bytes, field_start, i)?;
                    field = Field::Mutations;
                    field_start = i + 1;
                }
                (Field::Mutations, b',') | (Field::Mutations, b'\n') => {
                    let token = field_str(bytes, field_start, i)?.trim();
                    if !token.is_empty() {
                        record_mutation(token, codes, &mut mutations, &mut n_regions)?;
                    }
                    field_start = i + 1;
                }
                (_, b'\n') => {
                    return Err(IngestError::Format(format!(
                        "truncated record header near byte {i}"
                    )));
                }
                _ => {}
            }
            if byte == b'\n' {
                break;
            }
            i += 1;
        }
        i += 1; // past the newline (or past end for an unterminated tail)

        let date = if date_text.is_empty() {
            None
        } else {
            dates.parse(date_text)
        };
        let accession_id = parse_accession(accession_text);

        mutations.sort_unstable();
        mutations.dedup();
        coalesce_regions(&mut n_regions);

        let mut isolate = Isolate::new(country, state_name, date, accession_id, mutations);
        isolate.n_regions = n_regions;
        isolates.push(isolate);
    }

    Ok(isolates)
}

fn field_str(bytes: &[u8], start: usize, end: usize) -> Result<&str, IngestError> {
    std::str::from_utf8(&bytes[start..end])
        .map_err(|_| IngestError::Format(format!("invalid UTF-8 near byte {start}")))
}

/// Parse one mutation token into either the mutation list or, for wildcard
/// `N` calls, the unknown-region accumulator
fn record_mutation(
    token: &str,
    codes: &InsertionCodes,
    mutations: &mut Vec<Mutation>,
    n_regions: &mut Vec<(u16, u16)>,
) -> Result<(), IngestError> {
    let mutation =
        Mutation::parse(token, codes).map_err(|e| IngestError::Format(e.to_string()))?;
    if mutation.is_wildcard() {
        if let Ok(position) = u16::try_from(mutation.position) {
            match n_regions.last_mut() {
                Some(last) if u32::from(last.1) + 1 == u32::from(position) => last.1 = position,
                _ => n_regions.push((position, position)),
            }
        }
    } else {
        mutations.push(mutation);
    }
    Ok(())
}

fn coalesce_regions(regions: &mut Vec<(u16, u16)>) {
    if regions.len() < 2 {
        return;
    }
    regions.sort_unstable();
    let mut out: Vec<(u16, u16)> = Vec::with_capacity(regions.len());
    for &(start, end) in regions.iter() {
        match out.last_mut() {
            Some(last) if u32::from(last.1) + 1 >= u32::from(start) => {
                last.1 = last.1.max(end);
            }
            _ => out.push((start, end)),
        }
    }
    *regions = out;
}

/// Accept a bare number or an `EPI_ISL_`-style prefixed id; anything else
/// (including an empty field) yields 0, the synthetic-id placeholder
fn parse_accession(text: &str) -> u32 {
    let digits = match text.rfind(|c: char| !c.is_ascii_digit()) {
        Some(i) => &text[i + 1..],
        None => text,
    };
    digits.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
>USA/CA-1/2021-01-15|1001|N501Y, E484K\n\
>India/MH-2/2021-02-20|1002|D614G\n\
>UK/ENG-3/2021-03-05|1003|N501Y, D614G, P681H\n\
>USA/TX-4/|1004|\n\
>Brazil/SP-5/2021-04-01||E484K\n";

    fn load(text: &str, workers: usize) -> (EngineState, LoadSummary) {
        let mut state = EngineState::new();
        let summary = parse_buffer(text.as_bytes(), &mut state, workers).unwrap();
        (state, summary)
    }

    #[test]
    fn test_parse_basic() {
        let (state, summary) = load(SAMPLE, 1);
        assert_eq!(summary.loaded, 5);
        assert_eq!(summary.duplicates, 0);
        assert_eq!(state.isolates[0].country, "USA");
        assert_eq!(state.isolates[0].state, "CA-1");
        assert_eq!(state.isolates[0].accession_id, 1001);
        assert_eq!(state.isolates[0].mutations.len(), 2);
        assert!(state.isolates[3].date.is_none());
        assert!(state.isolates[3].mutations.is_empty());
    }

    #[test]
    fn test_synthetic_accession_id() {
        let (state, _) = load(SAMPLE, 1);
        // The empty-id Brazil record gets max(ids) + 1
        assert_eq!(state.isolates[4].accession_id, 1005);
    }

    #[test]
    fn test_partition_invariance() {
        let mut expected: Vec<u32> = Vec::new();
        for workers in [1, 2, 8] {
            let (state, summary) = load(SAMPLE, workers);
            assert_eq!(summary.loaded, 5, "workers={workers}");
            let mut ids: Vec<u32> =
                state.isolates.iter().map(|i| i.accession_id).collect();
            ids.sort_unstable();
            if expected.is_empty() {
                expected = ids;
            } else {
                assert_eq!(ids, expected, "workers={workers}");
            }
        }
    }

    #[test]
    fn test_duplicate_accessions_counted_not_fatal() {
        let mut state = EngineState::new();
        parse_buffer(SAMPLE.as_bytes(), &mut state, 2).unwrap();
        let summary = parse_buffer(SAMPLE.as_bytes(), &mut state, 2).unwrap();
        // Re-loading the same file: the four fixed ids collide, the
        // synthetic-id record gets a fresh id
        assert_eq!(summary.duplicates, 4);
        assert_eq!(summary.loaded, 1);
    }

    #[test]
    fn test_n_regions_coalesced() {
        let text = ">USA/CA/2021-01-01|1|A100N, A101N, A102N, A200N, N501Y\n";
        let (state, _) = load(text, 1);
        let iso = &state.isolates[0];
        assert_eq!(iso.n_regions, vec![(100, 102), (200, 200)]);
        assert_eq!(iso.mutations.len(), 1);
        assert_eq!(iso.mutation_count(true), 1);
        assert_eq!(iso.mutation_count(false), 5);
    }

    #[test]
    fn test_insertions_in_records() {
        let text = ">USA/CA/2021-01-01|1|ins214EPE, N501Y\n\
                    >USA/CA/2021-01-02|2|ins214EPE\n";
        let (state, _) = load(text, 1);
        let a = state.isolates[0]
            .mutations
            .iter()
            .find(|m| m.is_insertion())
            .copied()
            .unwrap();
        let b = state.isolates[1].mutations[0];
        assert_eq!(a, b, "identical insertion strings share a code");
    }

    #[test]
    fn test_malformed_record_aborts_load() {
        let mut state = EngineState::new();
        let text = ">USA/CA/2021-01-01|1|N501Y\ngarbage line\n";
        assert!(parse_buffer(text.as_bytes(), &mut state, 1).is_err());
        assert!(state.isolates.is_empty(), "failed load leaves no partial state");
    }

    #[test]
    fn test_malformed_mutation_aborts_load() {
        let mut state = EngineState::new();
        let text = ">USA/CA/2021-01-01|1|N501Y, bogus!!\n";
        assert!(parse_buffer(text.as_bytes(), &mut state, 1).is_err());
        assert!(state.isolates.is_empty());
    }

    #[test]
    fn test_unterminated_final_record() {
        let (state, summary) = load(">USA/CA/2021-01-01|7|N501Y", 1);
        assert_eq!(summary.loaded, 1);
        assert_eq!(state.isolates[0].accession_id, 7);
        assert_eq!(state.isolates[0].mutations.len(), 1);
    }

    #[test]
    fn test_partition_ranges_snap_to_records() {
        let bytes = SAMPLE.as_bytes();
        for workers in [2, 3, 8] {
            let ranges = partition_ranges(bytes, workers);
            for &(start, _) in &ranges {
                assert!(start == bytes.len() || bytes[start] == b'>');
            }
            // Ranges tile the record region without overlap
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].1, pair[1].0);
            }
        }
    }
}

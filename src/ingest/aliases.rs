use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;
use tracing::info;

use crate::core::state::EngineState;
use crate::ingest::IngestError;

/// Load the lineage alias table: a JSON object mapping alias label to either
/// a lineage name or a list of names (recombinants). Download/refresh of the
/// file itself is an external collaborator's job.
///
/// # Errors
///
/// Returns `IngestError::Io` for unreadable files and `IngestError::Format`
/// for JSON that is not an object of strings/string arrays.
pub fn load_aliases(path: &Path, state: &mut EngineState) -> Result<usize, IngestError> {
    let text = std::fs::read_to_string(path)?;
    let count = apply_aliases(&text, state)?;
    info!(path = %path.display(), aliases = count, "loaded lineage aliases");
    Ok(count)
}

pub fn apply_aliases(text: &str, state: &mut EngineState) -> Result<usize, IngestError> {
    let parsed: HashMap<String, Value> = serde_json::from_str(text)
        .map_err(|e| IngestError::Format(format!("alias table: {e}")))?;

    let mut aliases: HashMap<String, Vec<String>> = HashMap::new();
    for (label, value) in parsed {
        let targets = match value {
            Value::String(s) if !s.is_empty() => vec![s],
            // Empty string marks a top-level lineage with no expansion
            Value::String(_) => continue,
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(clean_recombinant_target(&s)),
                    _ => None,
                })
                .collect(),
            other => {
                return Err(IngestError::Format(format!(
                    "alias '{label}' maps to unexpected JSON value: {other}"
                )))
            }
        };
        if !targets.is_empty() {
            aliases.insert(label.to_ascii_uppercase(), targets);
        }
    }

    let count = aliases.len();
    state.lineage_aliases = aliases;
    Ok(count)
}

/// Recombinant parent lists carry wildcard entries like `"BM.1.1.1*"`;
/// the trailing star is not part of the lineage name
fn clean_recombinant_target(s: &str) -> String {
    s.trim_end_matches('*').trim_end_matches('.').to_string()
}

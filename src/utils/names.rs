use crate::core::dates::looks_like_date;
use crate::core::mutation::{InsertionCodes, Mutation, ProteinMutation};
use crate::core::state::EngineState;
use crate::query::token::{tokenize, Token};

/// Check a proposed assignment target. A name must stay unambiguous against
/// everything else the tokenizer and parser can produce: numbers, dates,
/// mutation tokens, reserved keywords, and country/state names already in
/// the arena.
pub fn validate_name(state: &EngineState, name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("empty name".to_string());
    }
    if name.parse::<f64>().is_ok() {
        return Err("looks like a number".to_string());
    }
    if looks_like_date(name) {
        return Err("looks like a date".to_string());
    }
    if name.contains('.') {
        return Err("contains '.'".to_string());
    }
    if name.chars().any(char::is_whitespace) {
        return Err("contains whitespace".to_string());
    }
    if name.contains('[') || name.contains(']') {
        return Err("contains brackets".to_string());
    }

    // A scratch dictionary so probing for mutation shape never pollutes the
    // session's insertion codes
    let scratch = InsertionCodes::new();
    if Mutation::parse(name, &scratch).is_ok() || ProteinMutation::parse(name, &scratch).is_ok() {
        return Err("looks like a mutation".to_string());
    }

    if state.known_places.contains(&name.to_lowercase()) {
        return Err("shadows a country or state name".to_string());
    }

    // Anything the tokenizer refuses to treat as one plain word is reserved
    match tokenize(name).as_slice() {
        [Token::TextBlock(word)] if word.eq_ignore_ascii_case(name) => Ok(()),
        _ => Err("reserved word".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::isolate::Isolate;

    fn state_with_places() -> EngineState {
        let mut state = EngineState::new();
        state.add_isolates(vec![Isolate::new("USA", "California", None, 1, Vec::new())]);
        state
    }

    #[test]
    fn test_valid_names() {
        let state = state_with_places();
        for name in ["a", "delta_wave", "b117", "myCluster"] {
            assert!(validate_name(&state, name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_rejects_numbers_and_dates() {
        let state = state_with_places();
        assert!(validate_name(&state, "42").is_err());
        assert!(validate_name(&state, "3.5").is_err());
        assert!(validate_name(&state, "2021-02-01").is_err());
    }

    #[test]
    fn test_rejects_mutation_shapes() {
        let state = state_with_places();
        assert!(validate_name(&state, "N501Y").is_err());
        assert!(validate_name(&state, "S:E484K").is_err());
        assert!(validate_name(&state, "ins214EPE").is_err());
    }

    #[test]
    fn test_rejects_reserved_words() {
        let state = state_with_places();
        for word in ["all", "from", "containing", "lineage", "countries", "last"] {
            assert!(validate_name(&state, word).is_err(), "{word} is reserved");
        }
    }

    #[test]
    fn test_rejects_places_and_punctuation() {
        let state = state_with_places();
        assert!(validate_name(&state, "usa").is_err());
        assert!(validate_name(&state, "California").is_err());
        assert!(validate_name(&state, "a.b").is_err());
        assert!(validate_name(&state, "a b").is_err());
        assert!(validate_name(&state, "x[1]").is_err());
        assert!(validate_name(&state, "").is_err());
    }
}

use crate::core::dates::looks_like_date;

/// The list-report kinds, one per tabular command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// `list [n]`: the first n isolates of a cluster
    Entries,
    Countries,
    States,
    Lineages,
    Trends,
    Monthly,
    Weekly,
    Frequencies,
    Variants,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Equal,
    Equality,
    Plus,
    Minus,
    Multiply,
    GreaterThan,
    LessThan,
    EqualMutationCount,
    Diff,
    AllIsolates,
    ConsensusFor,
    PatternsIn,
    From,
    Containing,
    NotContaining,
    Before,
    After,
    Named,
    Lineage,
    Sample,
    Range,
    ListSpec(ListKind),
    LastResult,
    Comma,
    TextBlock(String),
}

/// Pad the single-character operators with spaces so tokenization can split
/// on whitespace, without splitting date ranges (`2021-02-01`), trailing
/// deletion tokens (`N501-`), stop tokens (`Q493*`), or list-index brackets
/// (`x[3]`). Repeated whitespace collapses to one space.
pub fn normalize(command: &str) -> String {
    let bytes: Vec<char> = command.chars().collect();
    let mut out = String::with_capacity(command.len() + 16);

    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        let prev = if i > 0 { Some(bytes[i - 1]) } else { None };
        let next = bytes.get(i + 1).copied();
        match c {
            '=' => {
                if next == Some('=') {
                    out.push_str(" == ");
                    i += 2;
                    continue;
                }
                out.push_str(" = ");
            }
            '+' | '<' | '>' | '#' | ',' => {
                out.push(' ');
                out.push(c);
                out.push(' ');
            }
            '-' => {
                // Keep '-' glued inside dates (digit-digit) and at the tail
                // of a deletion token (digit then boundary)
                let prev_digit = prev.is_some_and(|p| p.is_ascii_digit());
                let next_part_of_token = next.map_or(true, |n| !n.is_ascii_alphanumeric());
                if prev_digit && (next.is_some_and(|n| n.is_ascii_digit()) || next_part_of_token) {
                    out.push('-');
                } else {
                    out.push_str(" - ");
                }
            }
            '*' => {
                // A '*' after a digit is a stop-codon mutant, not multiply
                if prev.is_some_and(|p| p.is_ascii_digit()) {
                    out.push('*');
                } else {
                    out.push_str(" * ");
                }
            }
            _ => out.push(c),
        }
        i += 1;
    }

    // Collapse runs of whitespace
    let mut collapsed = String::with_capacity(out.len());
    let mut last_space = true;
    for c in out.chars() {
        if c.is_whitespace() {
            if !last_space {
                collapsed.push(' ');
            }
            last_space = true;
        } else {
            collapsed.push(c);
            last_space = false;
        }
    }
    while collapsed.ends_with(' ') {
        collapsed.pop();
    }
    collapsed
}

/// Normalize and tokenize a command. Adjacent non-numeric, non-date text
/// blocks merge into one block (so multi-word country names survive), except
/// immediately after a `range` keyword.
pub fn tokenize(command: &str) -> Vec<Token> {
    let normalized = normalize(command);
    let mut tokens: Vec<Token> = Vec::new();
    // Marks whether the trailing TextBlock began right after Range
    let mut last_block_after_range = false;

    for word in normalized.split(' ') {
        if word.is_empty() {
            continue;
        }
        let token = match word.to_ascii_lowercase().as_str() {
            "=" => Token::Equal,
            "==" => Token::Equality,
            "+" => Token::Plus,
            "-" => Token::Minus,
            "*" => Token::Multiply,
            ">" => Token::GreaterThan,
            "<" => Token::LessThan,
            "#" => Token::EqualMutationCount,
            "," => Token::Comma,
            "diff" => Token::Diff,
            "all" | "world" => Token::AllIsolates,
            "consensus" => Token::ConsensusFor,
            "patterns" => Token::PatternsIn,
            "from" => Token::From,
            "containing" | "with" | "w/" => Token::Containing,
            "notcontaining" | "without" | "w/o" => Token::NotContaining,
            "before" => Token::Before,
            "after" => Token::After,
            "named" => Token::Named,
            "lineage" => Token::Lineage,
            "sample" => Token::Sample,
            "range" => Token::Range,
            "last" => Token::LastResult,
            "list" => Token::ListSpec(ListKind::Entries),
            "countries" => Token::ListSpec(ListKind::Countries),
            "states" => Token::ListSpec(ListKind::States),
            "lineages" => Token::ListSpec(ListKind::Lineages),
            "trends" => Token::ListSpec(ListKind::Trends),
            "monthly" => Token::ListSpec(ListKind::Monthly),
            "weekly" => Token::ListSpec(ListKind::Weekly),
            "frequencies" | "freq" => Token::ListSpec(ListKind::Frequencies),
            "variants" => Token::ListSpec(ListKind::Variants),
            // Filler words in `consensus for`, `patterns in`, `countries for`
            "for" => continue,
            "in" if matches!(tokens.last(), Some(Token::PatternsIn)) => continue,
            _ => Token::TextBlock(word.to_string()),
        };

        if let Token::TextBlock(ref text) = token {
            if let Some(Token::TextBlock(prev)) = tokens.last_mut() {
                if !last_block_after_range && mergeable(prev) && mergeable(text) {
                    prev.push(' ');
                    prev.push_str(text);
                    continue;
                }
            }
            last_block_after_range = matches!(tokens.last(), Some(Token::Range));
        }
        tokens.push(token);
    }
    tokens
}

/// Numbers and dates never merge into multi-word blocks
fn mergeable(text: &str) -> bool {
    text.parse::<f64>().is_err() && !looks_like_date(text)
}

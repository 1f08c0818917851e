use chrono::NaiveDate;
use thiserror::Error;

use crate::core::cluster::Pattern;
use crate::core::dates::parse_date_flexible;
use crate::core::mutation::{Mutation, ProteinMutation};
use crate::core::state::EngineState;
use crate::query::ast::Expr;
use crate::query::token::{tokenize, ListKind, Token};

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Unexpected token: {0}")]
    UnexpectedToken(String),

    #[error("Unexpected end of command, expected {0}")]
    UnexpectedEnd(String),

    #[error("Expected a date, found '{0}'")]
    ExpectedDate(String),

    #[error("Expected a number, found '{0}'")]
    ExpectedNumber(String),

    #[error("Could not parse '{0}' as a cluster, pattern, or list")]
    Unparsable(String),

    #[error("Trailing input after command: '{0}'")]
    TrailingTokens(String),
}

/// Parse a raw command string into an AST. On any structural failure the
/// whole command is discarded; no partial AST is ever evaluated.
///
/// # Errors
///
/// Returns a descriptive `ParseError` for empty, malformed, or trailing
/// input.
pub fn parse(command: &str, state: &EngineState) -> Result<Expr, ParseError> {
    let tokens = tokenize(command);
    if tokens.is_empty() {
        return Err(ParseError::EmptyCommand);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        state,
    };
    let expr = parser.parse_command()?;
    if parser.pos < parser.tokens.len() {
        return Err(ParseError::TrailingTokens(format!(
            "{:?}",
            &parser.tokens[parser.pos..]
        )));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    state: &'a EngineState,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Re-queue the unconsumed remainder of a split text block
    fn push_back(&mut self, text: String) {
        self.tokens.insert(self.pos, Token::TextBlock(text));
    }

    fn parse_command(&mut self) -> Result<Expr, ParseError> {
        // Assignment: IDENT '=' expr
        if let (Some(Token::TextBlock(name)), Some(Token::Equal)) =
            (self.tokens.first(), self.tokens.get(1))
        {
            let name = name.clone();
            self.pos = 2;
            let value = self.parse_equality()?;
            return Ok(Expr::Assign(name, value.boxed()));
        }
        self.parse_equality()
    }

    /// expr ('==' expr)?
    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_expr()?;
        if matches!(self.peek(), Some(Token::Equality)) {
            self.pos += 1;
            let right = self.parse_expr()?;
            return Ok(Expr::Equality(left.boxed(), right.boxed()));
        }
        Ok(left)
    }

    /// Left-associative arithmetic chain over filtered primaries
    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_filtered()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => Expr::Plus as fn(Box<Expr>, Box<Expr>) -> Expr,
                Some(Token::Minus) => Expr::Minus,
                Some(Token::Multiply) => Expr::Multiply,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_filtered()?;
            left = op(left.boxed(), right.boxed());
        }
        Ok(left)
    }

    /// A primary followed by any number of postfix filters. A filter with no
    /// left operand gets the implicit all-isolates cluster.
    fn parse_filtered(&mut self) -> Result<Expr, ParseError> {
        let mut expr = if self.at_filter_token() {
            Expr::All
        } else {
            self.parse_primary()?
        };

        loop {
            expr = match self.peek() {
                Some(Token::From) => {
                    self.pos += 1;
                    let place = self.expect_text("a location after 'from'")?;
                    Expr::From(expr.boxed(), place)
                }
                Some(Token::Containing) => {
                    self.pos += 1;
                    let n = self.optional_count();
                    let arg = self.parse_filter_argument()?;
                    Expr::Containing(expr.boxed(), arg.boxed(), n)
                }
                Some(Token::NotContaining) => {
                    self.pos += 1;
                    let n = self.optional_count();
                    let arg = self.parse_filter_argument()?;
                    Expr::NotContaining(expr.boxed(), arg.boxed(), n)
                }
                Some(Token::Before) => {
                    self.pos += 1;
                    let date = self.expect_date()?;
                    Expr::Before(expr.boxed(), date)
                }
                Some(Token::After) => {
                    self.pos += 1;
                    let date = self.expect_date()?;
                    Expr::After(expr.boxed(), date)
                }
                Some(Token::Range) => {
                    self.pos += 1;
                    let start = self.expect_date()?;
                    let end = self.expect_date()?;
                    Expr::Range(expr.boxed(), start, end)
                }
                Some(Token::Named) => {
                    self.pos += 1;
                    let needle = self.expect_text("a name after 'named'")?;
                    Expr::Named(expr.boxed(), needle)
                }
                Some(Token::Lineage) => {
                    self.pos += 1;
                    let lineage = self.expect_text("a lineage after 'lineage'")?;
                    Expr::Lineage(expr.boxed(), lineage)
                }
                Some(Token::Sample) => {
                    self.pos += 1;
                    let amount = self.expect_number()?;
                    Expr::Sample(expr.boxed(), amount)
                }
                Some(Token::GreaterThan) => {
                    self.pos += 1;
                    let n = self.expect_count()?;
                    Expr::GreaterThan(expr.boxed(), n)
                }
                Some(Token::LessThan) => {
                    self.pos += 1;
                    let n = self.expect_count()?;
                    Expr::LessThan(expr.boxed(), n)
                }
                Some(Token::EqualMutationCount) => {
                    self.pos += 1;
                    let n = self.expect_count()?;
                    Expr::EqualMutationCount(expr.boxed(), n)
                }
                _ => break,
            };
        }
        Ok(expr)
    }

    fn at_filter_token(&self) -> bool {
        matches!(
            self.peek(),
            Some(
                Token::From
                    | Token::Containing
                    | Token::NotContaining
                    | Token::Before
                    | Token::After
                    | Token::Range
                    | Token::Named
                    | Token::Lineage
                    | Token::Sample
                    | Token::GreaterThan
                    | Token::LessThan
                    | Token::EqualMutationCount
            )
        )
    }

    /// A filter's right-hand argument is a bare primary: it ends at the first
    /// arithmetic operator, which always binds to the outer filtered
    /// expression. (The original resolved this by asking whether the next
    /// operand named a known cluster; a fixed rule is predictable and
    /// testable.) Commas between mutation tokens extend a pattern literal, so
    /// `containing N501Y, E484K` reads the same as the space-separated form.
    fn parse_filter_argument(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        while matches!(self.peek(), Some(Token::Comma)) && self.comma_continues_pattern(&expr) {
            self.pos += 1;
            match (expr, self.parse_primary()?) {
                (Expr::PatternLit(a), Expr::PatternLit(b)) => {
                    expr = Expr::PatternLit(a.union(&b));
                }
                _ => return Err(ParseError::UnexpectedToken("','".to_string())),
            }
        }
        Ok(expr)
    }

    /// True when the token after the comma starts with a mutation token, so
    /// the comma belongs to the pattern literal rather than to a surrounding
    /// `diff`
    fn comma_continues_pattern(&self, expr: &Expr) -> bool {
        if !matches!(expr, Expr::PatternLit(_)) {
            return false;
        }
        match self.tokens.get(self.pos + 1) {
            Some(Token::TextBlock(text)) => text
                .split(' ')
                .next()
                .is_some_and(|word| self.parse_mutation_word(word).is_some()),
            _ => false,
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.advance() {
            Some(Token::AllIsolates) => Ok(Expr::All),
            Some(Token::LastResult) => Ok(Expr::Last),
            Some(Token::ConsensusFor) => {
                let operand = self.parse_expr()?;
                Ok(Expr::ConsensusFor(operand.boxed()))
            }
            Some(Token::PatternsIn) => {
                let n = self.optional_count();
                let operand = self.parse_expr()?;
                Ok(Expr::PatternsIn(operand.boxed(), n))
            }
            Some(Token::Diff) => {
                let left = self.parse_filtered()?;
                if matches!(self.peek(), Some(Token::Comma)) {
                    self.pos += 1;
                }
                let right = self.parse_filtered()?;
                Ok(Expr::Diff(left.boxed(), right.boxed()))
            }
            Some(Token::ListSpec(kind)) => {
                let n = self.optional_count();
                let operand = if self.peek().is_some() && !matches!(self.peek(), Some(Token::Equality | Token::Comma)) {
                    self.parse_expr()?
                } else {
                    Expr::All
                };
                // `list 5` with nothing after it: the number is a row count
                if n == 0 {
                    if let Expr::Number(x) = &operand {
                        if *x >= 0.0 && x.fract() == 0.0 {
                            return Ok(Expr::Report(kind, *x as usize, Expr::All.boxed()));
                        }
                    }
                }
                Ok(Expr::Report(kind, n, operand.boxed()))
            }
            Some(Token::TextBlock(text)) => self.resolve_text_block(text),
            Some(token) => Err(ParseError::UnexpectedToken(format!("{token:?}"))),
            None => Err(ParseError::UnexpectedEnd("an expression".to_string())),
        }
    }

    /// Resolve a (possibly merged multi-word) text block into an expression.
    /// Longest-prefix resolution: a full binding name wins, then a run of
    /// mutation tokens, then a single identifier; the unconsumed remainder is
    /// re-queued.
    fn resolve_text_block(&mut self, text: String) -> Result<Expr, ParseError> {
        if let Ok(n) = text.parse::<f64>() {
            return Ok(Expr::Number(n));
        }
        if self.state.namespace_of(&text).is_some() {
            return Ok(Expr::Ident(text));
        }
        if let Some(expr) = self.parse_list_index(&text) {
            return Ok(expr);
        }

        let words: Vec<&str> = text.split(' ').collect();
        if words.len() > 1 {
            // Longest prefix naming a binding
            for k in (1..words.len()).rev() {
                let prefix = words[..k].join(" ");
                if self.state.namespace_of(&prefix).is_some() {
                    self.push_back(words[k..].join(" "));
                    return Ok(Expr::Ident(prefix));
                }
            }
        }

        // Leading run of mutation tokens forms a pattern literal
        let run = words
            .iter()
            .take_while(|w| self.parse_mutation_word(w).is_some())
            .count();
        if run > 0 {
            let mutations: Vec<Mutation> = words[..run]
                .iter()
                .filter_map(|w| self.parse_mutation_word(w))
                .collect();
            if run < words.len() {
                self.push_back(words[run..].join(" "));
            }
            return Ok(Expr::PatternLit(Pattern::new(mutations)));
        }

        // Fall back to a single-word identifier; unknown names surface as
        // runtime warnings, not parse errors
        if words.len() > 1 {
            self.push_back(words[1..].join(" "));
        }
        Ok(Expr::Ident(words[0].to_string()))
    }

    fn parse_mutation_word(&self, word: &str) -> Option<Mutation> {
        if word.contains(':') {
            ProteinMutation::parse(word, &self.state.insertion_codes)
                .ok()
                .map(|pm| pm.to_mutation())
        } else {
            Mutation::parse(word, &self.state.insertion_codes).ok()
        }
    }

    /// `name[3]`: one row of a named list
    fn parse_list_index(&self, text: &str) -> Option<Expr> {
        let open = text.find('[')?;
        let close = text.rfind(']')?;
        if close != text.len() - 1 || open == 0 {
            return None;
        }
        let index: usize = text[open + 1..close].parse().ok()?;
        Some(Expr::ListIndex(text[..open].to_string(), index))
    }

    /// Consume a leading integer when one is present and more input follows;
    /// returns 0 (meaning "default") otherwise
    fn optional_count(&mut self) -> usize {
        if let Some(Token::TextBlock(word)) = self.peek() {
            if let Ok(n) = word.parse::<usize>() {
                if self.pos + 1 < self.tokens.len() {
                    self.pos += 1;
                    return n;
                }
            }
        }
        0
    }

    fn expect_text(&mut self, what: &str) -> Result<String, ParseError> {
        match self.advance() {
            Some(Token::TextBlock(text)) => Ok(text),
            Some(token) => Err(ParseError::UnexpectedToken(format!("{token:?}"))),
            None => Err(ParseError::UnexpectedEnd(what.to_string())),
        }
    }

    fn expect_date(&mut self) -> Result<NaiveDate, ParseError> {
        let text = self.expect_text("a date")?;
        parse_date_flexible(&text).ok_or(ParseError::ExpectedDate(text))
    }

    fn expect_number(&mut self) -> Result<f64, ParseError> {
        let text = self.expect_text("a number")?;
        text.parse().map_err(|_| ParseError::ExpectedNumber(text))
    }

    fn expect_count(&mut self) -> Result<usize, ParseError> {
        let text = self.expect_text("a count")?;
        text.parse().map_err(|_| ParseError::ExpectedNumber(text))
    }
}

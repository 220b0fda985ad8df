//! Subject and pattern validation
//!
//! Key rules:
//! - Tokens are separated by `.`
//! - A literal subject (used in PUB) must not contain wildcards
//! - `*` matches exactly one token and must occupy an entire token
//! - `>` matches one or more trailing tokens and must be the last token
//! - Strict validation additionally rejects empty tokens and whitespace

use std::fmt;
use std::sync::Arc;

/// Token separator
pub const SEPARATOR: char = '.';
/// Single-token wildcard
pub const ANY: &str = "*";
/// Trailing multi-token wildcard
pub const REST: &str = ">";

/// A single token of a subject or pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    /// Literal token
    Literal(&'a str),
    /// Single-token wildcard (`*`)
    Any,
    /// Multi-token trailing wildcard (`>`)
    Rest,
}

/// Split a subject or pattern into tokens
pub fn tokens(subject: &str) -> impl Iterator<Item = Token<'_>> {
    subject.split(SEPARATOR).map(|token| match token {
        ANY => Token::Any,
        REST => Token::Rest,
        s => Token::Literal(s),
    })
}

/// Subject validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectError {
    /// Subject is the empty string
    Empty,
    /// A token between separators is empty
    EmptyToken,
    /// A token contains a reserved or whitespace character
    InvalidCharacter(char),
    /// A literal subject contains a wildcard token
    WildcardInLiteral,
    /// `>` appears before the last token
    RestNotLast,
}

impl fmt::Display for SubjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "subject cannot be empty"),
            Self::EmptyToken => write!(f, "subject contains an empty token"),
            Self::InvalidCharacter(c) => write!(f, "subject contains invalid character {:?}", c),
            Self::WildcardInLiteral => write!(f, "literal subject cannot contain wildcards"),
            Self::RestNotLast => write!(f, "'>' wildcard must be the last token"),
        }
    }
}

impl std::error::Error for SubjectError {}

/// How strictly subjects are checked on a connection.
///
/// `Strict` corresponds to pedantic mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Validation {
    #[default]
    Strict,
    Lenient,
}

impl Validation {
    pub fn from_pedantic(pedantic: bool) -> Self {
        if pedantic {
            Validation::Strict
        } else {
            Validation::Lenient
        }
    }

    /// Check a publish subject
    pub fn literal(self, s: &str) -> Result<Subject, SubjectError> {
        match self {
            Validation::Strict => parse_literal(s),
            Validation::Lenient => {
                if s.is_empty() {
                    return Err(SubjectError::Empty);
                }
                Ok(Subject(s.into()))
            }
        }
    }

    /// Check a subscription pattern
    pub fn pattern(self, s: &str) -> Result<Pattern, SubjectError> {
        match self {
            Validation::Strict => parse_pattern(s),
            Validation::Lenient => {
                if s.is_empty() {
                    return Err(SubjectError::Empty);
                }
                check_rest_position(s)?;
                Ok(Pattern(s.into()))
            }
        }
    }
}

/// A wildcard-free subject
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject(Arc<str>);

impl Subject {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A subscription pattern, possibly containing `*` and a trailing `>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern(Arc<str>);

impl Pattern {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn tokens(&self) -> impl Iterator<Item = Token<'_>> {
        tokens(&self.0)
    }

    pub fn has_wildcards(&self) -> bool {
        self.tokens().any(|t| !matches!(t, Token::Literal(_)))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn check_token_chars(token: &str) -> Result<(), SubjectError> {
    if token.is_empty() {
        return Err(SubjectError::EmptyToken);
    }
    match token
        .chars()
        .find(|c| matches!(c, '.' | '*' | '>') || c.is_whitespace())
    {
        Some(c) => Err(SubjectError::InvalidCharacter(c)),
        None => Ok(()),
    }
}

fn check_rest_position(s: &str) -> Result<(), SubjectError> {
    let mut levels = s.split(SEPARATOR).peekable();
    while let Some(level) = levels.next() {
        if level == REST && levels.peek().is_some() {
            return Err(SubjectError::RestNotLast);
        }
    }
    Ok(())
}

/// Parse a literal (publish) subject under strict rules
pub fn parse_literal(s: &str) -> Result<Subject, SubjectError> {
    if s.is_empty() {
        return Err(SubjectError::Empty);
    }
    for token in s.split(SEPARATOR) {
        if token == ANY || token == REST {
            return Err(SubjectError::WildcardInLiteral);
        }
        check_token_chars(token)?;
    }
    Ok(Subject(s.into()))
}

/// Parse a subscription pattern under strict rules
pub fn parse_pattern(s: &str) -> Result<Pattern, SubjectError> {
    if s.is_empty() {
        return Err(SubjectError::Empty);
    }
    check_rest_position(s)?;
    for token in tokens(s) {
        if let Token::Literal(literal) = token {
            check_token_chars(literal)?;
        }
    }
    Ok(Pattern(s.into()))
}

/// Check if a pattern matches a literal subject
///
/// Matching rules:
/// - `*` consumes exactly one literal token
/// - `>` consumes all remaining literal tokens, at least one
/// - otherwise token counts must be equal
pub fn matches(pattern: &str, literal: &str) -> bool {
    let mut pattern_tokens = tokens(pattern);
    let mut literal_tokens = literal.split(SEPARATOR);

    loop {
        match (pattern_tokens.next(), literal_tokens.next()) {
            (Some(Token::Rest), Some(_)) => return true,
            (Some(Token::Any), Some(_)) => {}
            (Some(Token::Literal(p)), Some(l)) if p == l => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

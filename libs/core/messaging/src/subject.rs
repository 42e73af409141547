//! Subject patterns and wildcard matching.
//!
//! Subjects are hierarchical, dot-delimited routing keys (`orders.eu.created`).
//! Patterns may use `*` to match exactly one token and `>` to match one or
//! more trailing tokens; both must stand alone as whole tokens.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error raised when a subject pattern fails to parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// Pattern string is empty
    #[error("subject pattern cannot be empty")]
    Empty,

    /// A token between separators is empty (e.g. `a..b` or `a.`)
    #[error("empty token at position {position}")]
    EmptyToken { position: usize },

    /// A wildcard appears inside a token (e.g. `ord*rs`)
    #[error("wildcard in token '{token}' at position {position} must stand alone")]
    EmbeddedWildcard { token: String, position: usize },

    /// `>` used anywhere but the final position
    #[error("'>' at position {position} must be the final token")]
    TailNotLast { position: usize },
}

/// One parsed pattern token.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternToken {
    /// Must equal the subject token exactly
    Literal(String),
    /// `*`: matches exactly one subject token
    Any,
    /// `>`: matches one or more remaining subject tokens
    Tail,
}

/// A parsed subject pattern.
///
/// Matching follows broker wildcard semantics: `test.*.stream` matches
/// `test.a.stream` but not `test.a.b.stream`; `events.>` matches
/// `events.user` and `events.user.created` but not `events` alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPattern {
    raw: String,
    tokens: Vec<PatternToken>,
}

impl SubjectPattern {
    /// Parse and validate a pattern string.
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        let raw_tokens: Vec<&str> = pattern.split('.').collect();
        let last = raw_tokens.len() - 1;
        let mut tokens = Vec::with_capacity(raw_tokens.len());

        for (position, token) in raw_tokens.iter().enumerate() {
            let parsed = match *token {
                "" => return Err(PatternError::EmptyToken { position }),
                "*" => PatternToken::Any,
                ">" => {
                    if position != last {
                        return Err(PatternError::TailNotLast { position });
                    }
                    PatternToken::Tail
                }
                literal => {
                    if literal.contains('*') || literal.contains('>') {
                        return Err(PatternError::EmbeddedWildcard {
                            token: literal.to_string(),
                            position,
                        });
                    }
                    PatternToken::Literal(literal.to_string())
                }
            };
            tokens.push(parsed);
        }

        Ok(Self {
            raw: pattern.to_string(),
            tokens,
        })
    }

    /// Check whether a concrete subject satisfies this pattern.
    ///
    /// Deterministic and side-effect free. Malformed subjects (empty, or
    /// containing empty tokens) never match.
    pub fn matches(&self, subject: &str) -> bool {
        if subject.is_empty() {
            return false;
        }

        let subject_tokens: Vec<&str> = subject.split('.').collect();
        if subject_tokens.iter().any(|t| t.is_empty()) {
            return false;
        }

        for (position, token) in self.tokens.iter().enumerate() {
            match token {
                // `>` consumes the rest; it requires at least one token
                PatternToken::Tail => return subject_tokens.len() > position,
                PatternToken::Any => {
                    if position >= subject_tokens.len() {
                        return false;
                    }
                }
                PatternToken::Literal(literal) => {
                    if subject_tokens.get(position).map(|t| *t) != Some(literal.as_str()) {
                        return false;
                    }
                }
            }
        }

        subject_tokens.len() == self.tokens.len()
    }

    /// True when the pattern contains no wildcards.
    pub fn is_literal(&self) -> bool {
        self.tokens
            .iter()
            .all(|t| matches!(t, PatternToken::Literal(_)))
    }

    /// The original pattern string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for SubjectPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl FromStr for SubjectPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(s: &str) -> SubjectPattern {
        SubjectPattern::parse(s).unwrap()
    }

    #[test]
    fn test_exact_match() {
        let p = pattern("orders.eu.created");
        assert!(p.matches("orders.eu.created"));
        assert!(!p.matches("orders.eu"));
        assert!(!p.matches("orders.eu.created.v2"));
        assert!(!p.matches("orders.us.created"));
        assert!(p.is_literal());
    }

    #[test]
    fn test_star_matches_exactly_one_token() {
        let p = pattern("test.*.stream");
        assert!(p.matches("test.a.stream"));
        assert!(p.matches("test.b.stream"));
        assert!(!p.matches("test.a.b.stream"));
        assert!(!p.matches("test.stream"));
        assert!(!p.is_literal());
    }

    #[test]
    fn test_tail_matches_one_or_more_tokens() {
        let p = pattern("events.>");
        assert!(p.matches("events.user"));
        assert!(p.matches("events.user.created"));
        assert!(!p.matches("events"));
        assert!(!p.matches("orders.user"));
    }

    #[test]
    fn test_tail_only_pattern() {
        let p = pattern(">");
        assert!(p.matches("a"));
        assert!(p.matches("a.b.c"));
        assert!(!p.matches(""));
    }

    #[test]
    fn test_combined_wildcards() {
        let p = pattern("logs.*.error.>");
        assert!(p.matches("logs.api.error.timeout"));
        assert!(p.matches("logs.api.error.db.connect"));
        assert!(!p.matches("logs.api.error"));
        assert!(!p.matches("logs.api.warn.timeout"));
    }

    #[test]
    fn test_malformed_subjects_never_match() {
        let p = pattern(">");
        assert!(!p.matches(""));
        assert!(!p.matches("a..b"));
        assert!(!p.matches(".a"));
        assert!(!p.matches("a."));
    }

    #[test]
    fn test_parse_rejects_empty_pattern() {
        assert_eq!(SubjectPattern::parse(""), Err(PatternError::Empty));
    }

    #[test]
    fn test_parse_rejects_empty_tokens() {
        assert_eq!(
            SubjectPattern::parse("a..b"),
            Err(PatternError::EmptyToken { position: 1 })
        );
        assert_eq!(
            SubjectPattern::parse(".a"),
            Err(PatternError::EmptyToken { position: 0 })
        );
    }

    #[test]
    fn test_parse_rejects_embedded_wildcards() {
        let err = SubjectPattern::parse("ord*rs.created").unwrap_err();
        assert_eq!(
            err,
            PatternError::EmbeddedWildcard {
                token: "ord*rs".to_string(),
                position: 0,
            }
        );
        assert!(SubjectPattern::parse("a.b>").is_err());
    }

    #[test]
    fn test_parse_rejects_non_final_tail() {
        assert_eq!(
            SubjectPattern::parse("a.>.b"),
            Err(PatternError::TailNotLast { position: 1 })
        );
    }

    #[test]
    fn test_from_str_and_display() {
        let p: SubjectPattern = "test.*.stream".parse().unwrap();
        assert_eq!(p.to_string(), "test.*.stream");
        assert_eq!(p.as_str(), "test.*.stream");
    }
}

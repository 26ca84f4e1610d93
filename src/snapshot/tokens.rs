//! Numeric token extraction for tolerance-aware reads.
//!
//! Text is split on whitespace and a token counts as numeric only when the
//! whole token matches the number pattern, so identifiers that merely contain
//! digits (`p99_latency`, `v2`) are never read back as values.

use once_cell::sync::Lazy;
use regex::Regex;

static NUMERIC_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?\d+(\.\d+)?([eE][+-]?\d+)?$").expect("valid numeric token regex"));

/// A numeric token read from snapshot text, keeping its original spelling.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericToken {
    pub text: String,
    pub value: f64,
}

/// True when `token` is a standalone number.
pub fn is_numeric_token(token: &str) -> bool {
    NUMERIC_TOKEN.is_match(token)
}

/// All standalone numeric tokens of `text`, in order.
pub fn numeric_tokens(text: &str) -> Vec<NumericToken> {
    text.split_whitespace()
        .filter(|t| is_numeric_token(t))
        .filter_map(|t| {
            t.parse::<f64>().ok().map(|value| NumericToken {
                text: t.to_string(),
                value,
            })
        })
        .collect()
}

/// Number of standalone numeric tokens in `text`.
pub fn count_numeric_tokens(text: &str) -> usize {
    text.split_whitespace().filter(|t| is_numeric_token(t)).count()
}

/// Positional reader over the numeric tokens of a previous snapshot.
#[derive(Debug, Clone, Default)]
pub struct TokenCursor {
    tokens: Vec<NumericToken>,
}

impl TokenCursor {
    pub fn new(previous: Option<&str>) -> Self {
        Self {
            tokens: previous.map(numeric_tokens).unwrap_or_default(),
        }
    }

    /// The token at `index`, if the previous snapshot had that many numbers.
    pub fn at(&self, index: usize) -> Option<&NumericToken> {
        self.tokens.get(index)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_token_match_only() {
        assert!(is_numeric_token("50.0"));
        assert!(is_numeric_token("-3"));
        assert!(is_numeric_token("1.5e-3"));
        assert!(is_numeric_token("2E10"));
        assert!(!is_numeric_token("p99_latency"));
        assert!(!is_numeric_token("50.0]"));
        assert!(!is_numeric_token("v2"));
        assert!(!is_numeric_token("1."));
    }

    #[test]
    fn tokens_keep_original_spelling() {
        let tokens = numeric_tokens("p99_latency: 50.00 ms\ncount 7 [REGRESSION: was 3.0]");
        let texts: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["50.00", "7"]);
        assert_eq!(tokens[0].value, 50.0);
    }

    #[test]
    fn cursor_without_snapshot_is_empty() {
        let cursor = TokenCursor::new(None);
        assert!(cursor.is_empty());
        assert!(cursor.at(0).is_none());
        assert_eq!(count_numeric_tokens("a 1 b 2.5"), 2);
    }
}

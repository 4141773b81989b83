//! Hierarchical topic patterns.
//!
//! A pattern is a `/`-separated token sequence. `*` matches one or more
//! tokens (greedy, with backtracking), `+` matches exactly one, anything
//! else is a literal. Two wildcards may not be adjacent.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Token {
    Literal(String),
    /// `*`: one or more tokens.
    Any,
    /// `+`: exactly one token.
    One,
}

/// A parsed topic pattern. Equality and hashing follow the token sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenPattern {
    tokens: Vec<Token>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern has no tokens")]
    Empty,

    #[error("adjacent wildcards at token {0}")]
    AdjacentWildcards(usize),
}

impl FromStr for TokenPattern {
    type Err = PatternError;

    /// Split on `/`, dropping empty segments.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<Token> = s
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| match segment {
                "*" => Token::Any,
                "+" => Token::One,
                literal => Token::Literal(literal.to_string()),
            })
            .collect();

        if tokens.is_empty() {
            return Err(PatternError::Empty);
        }
        for (index, pair) in tokens.windows(2).enumerate() {
            let wildcard = |t: &Token| !matches!(t, Token::Literal(_));
            if wildcard(&pair[0]) && wildcard(&pair[1]) {
                return Err(PatternError::AdjacentWildcards(index + 1));
            }
        }

        Ok(TokenPattern { tokens })
    }
}

impl fmt::Display for TokenPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, token) in self.tokens.iter().enumerate() {
            if index > 0 {
                f.write_str("/")?;
            }
            match token {
                Token::Literal(s) => f.write_str(s)?,
                Token::Any => f.write_str("*")?,
                Token::One => f.write_str("+")?,
            }
        }
        Ok(())
    }
}

impl TokenPattern {
    /// Whether the pattern is wildcard-free.
    pub fn is_concrete(&self) -> bool {
        self.tokens
            .iter()
            .all(|token| matches!(token, Token::Literal(_)))
    }

    /// Match against a wildcard-free subject. The whole pattern must
    /// consume the whole subject; `*` consumes at least one token.
    ///
    /// Returns `false` when `subject` contains wildcards.
    pub fn matches(&self, subject: &TokenPattern) -> bool {
        if !subject.is_concrete() {
            return false;
        }
        let subject: Vec<&str> = subject
            .tokens
            .iter()
            .map(|token| match token {
                Token::Literal(s) => s.as_str(),
                Token::Any | Token::One => unreachable!(),
            })
            .collect();

        // Worklist of (pattern index, subject index) positions still to try.
        let mut positions: VecDeque<(usize, usize)> = VecDeque::new();
        positions.push_back((0, 0));

        while let Some((pi, si)) = positions.pop_front() {
            if pi == self.tokens.len() && si == subject.len() {
                return true;
            }
            if pi >= self.tokens.len() || si >= subject.len() {
                continue;
            }

            match &self.tokens[pi] {
                Token::One => positions.push_back((pi + 1, si + 1)),
                Token::Literal(literal) => {
                    if literal == subject[si] {
                        positions.push_back((pi + 1, si + 1));
                    }
                }
                Token::Any => {
                    if pi + 1 == self.tokens.len() {
                        // Trailing `*` swallows the rest; at least one
                        // token remains here since `si < subject.len()`.
                        return true;
                    }
                    // The token after `*` is a literal (adjacent wildcards
                    // are rejected at parse time). Try every occurrence
                    // past at least one consumed token.
                    if let Token::Literal(next) = &self.tokens[pi + 1] {
                        for pos in (si + 1)..subject.len() {
                            if subject[pos] == next {
                                positions.push_back((pi + 2, pos + 1));
                            }
                        }
                    }
                }
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn pat(s: &str) -> TokenPattern {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_drops_empty_segments() {
        assert_eq!(pat("/a//b/"), pat("a/b"));
        assert_eq!(pat("a/b/c").to_string(), "a/b/c");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!("".parse::<TokenPattern>(), Err(PatternError::Empty));
        assert_eq!("///".parse::<TokenPattern>(), Err(PatternError::Empty));
    }

    #[test]
    fn test_parse_rejects_adjacent_wildcards() {
        for s in ["a/*/+/b", "*/*", "+/+/a", "a/+/*"] {
            assert!(
                matches!(s.parse::<TokenPattern>(), Err(PatternError::AdjacentWildcards(_))),
                "{s}"
            );
        }
        // Separated wildcards are fine.
        assert!("*/a/+".parse::<TokenPattern>().is_ok());
    }

    #[test]
    fn test_is_concrete() {
        assert!(pat("a/b/c").is_concrete());
        assert!(!pat("a/+/c").is_concrete());
        assert!(!pat("a/*").is_concrete());
    }

    #[test]
    fn test_literal_match() {
        assert!(pat("a/b/c").matches(&pat("a/b/c")));
        assert!(!pat("a/b/c").matches(&pat("a/b")));
        assert!(!pat("a/b").matches(&pat("a/b/c")));
        assert!(!pat("a/b/c").matches(&pat("a/b/x")));
    }

    #[test]
    fn test_plus_matches_exactly_one() {
        assert!(pat("a/+/c").matches(&pat("a/b/c")));
        assert!(!pat("a/+/c").matches(&pat("a/c")));
        assert!(!pat("a/+/c").matches(&pat("a/b/x/c")));
        assert!(pat("+").matches(&pat("anything")));
        assert!(!pat("+").matches(&pat("two/tokens")));
    }

    #[test]
    fn test_star_matches_one_or_more() {
        assert!(pat("a/*/b").matches(&pat("a/x/b")));
        assert!(pat("a/*/b").matches(&pat("a/x/y/b")));
        assert!(!pat("a/*/b").matches(&pat("a/b")));

        assert!(pat("a/*").matches(&pat("a/x")));
        assert!(pat("a/*").matches(&pat("a/x/y/z")));
        assert!(!pat("a/*").matches(&pat("a")));

        assert!(pat("*").matches(&pat("a")));
        assert!(pat("*").matches(&pat("a/b/c")));
    }

    #[test]
    fn test_star_backtracks_over_repeated_literals() {
        // `*` is greedy with backtracking: any split that works must match.
        assert!(pat("*/a/*").matches(&pat("x/a/y")));
        assert!(pat("*/a/*").matches(&pat("a/a/a")));
        assert!(!pat("*/a/*").matches(&pat("a/a")));
        assert!(pat("a/*/a/b").matches(&pat("a/a/a/a/b")));
        assert!(!pat("a/*/a/b").matches(&pat("a/a/b")));
    }

    #[test]
    fn test_match_against_wildcard_subject_fails() {
        assert!(!pat("a/*").matches(&pat("a/+")));
        assert!(!pat("*").matches(&pat("*")));
    }

    #[test]
    fn test_hash_and_eq_follow_tokens() {
        let mut set = HashSet::new();
        set.insert(pat("a/+/c"));
        assert!(set.contains(&pat("/a/+/c/")));
        assert!(!set.contains(&pat("a/*/c")));
    }
}

//! Condition matching logic, grounded in the teacher's
//! `filter/matching.rs`, re-typed over a string/string [`Metadata`] map
//! instead of a JSON payload, and unknown keys evaluating to `false`
//! (per spec.md §4.8) rather than `Option`-propagating past `And`/`Or`.

use super::{Condition, FilterValue};
use crate::point::Metadata;

impl Condition {
    /// Evaluates the condition against a slot's metadata.
    ///
    /// Unknown keys evaluate to `false` unless the condition is (or is
    /// nested under) a [`Condition::Not`] / [`Condition::IsNull`], matching
    /// spec.md §4.8's "unknown keys evaluate to false unless under
    /// negation".
    #[must_use]
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Self::Eq { field, value } => metadata
                .get(field)
                .is_some_and(|v| values_equal(v, value)),
            Self::Neq { field, value } => metadata
                .get(field)
                .is_none_or(|v| !values_equal(v, value)),
            Self::Gt { field, value } => metadata
                .get(field)
                .is_some_and(|v| compare(v, value) == Some(std::cmp::Ordering::Greater)),
            Self::Gte { field, value } => metadata.get(field).is_some_and(|v| {
                matches!(
                    compare(v, value),
                    Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
                )
            }),
            Self::Lt { field, value } => metadata
                .get(field)
                .is_some_and(|v| compare(v, value) == Some(std::cmp::Ordering::Less)),
            Self::Lte { field, value } => metadata.get(field).is_some_and(|v| {
                matches!(
                    compare(v, value),
                    Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
                )
            }),
            Self::In { field, values } => metadata
                .get(field)
                .is_some_and(|v| values.iter().any(|val| values_equal(v, val))),
            Self::Contains { field, value } => {
                metadata.get(field).is_some_and(|v| v.contains(value.as_str()))
            }
            Self::IsNull { field } => !metadata.contains_key(field),
            Self::IsNotNull { field } => metadata.contains_key(field),
            Self::And(conditions) => conditions.iter().all(|c| c.matches(metadata)),
            Self::Or(conditions) => conditions.iter().any(|c| c.matches(metadata)),
            Self::Not(condition) => !condition.matches(metadata),
            Self::Like { field, pattern } => metadata
                .get(field)
                .is_some_and(|v| like_match(v, pattern, false)),
            Self::ILike { field, pattern } => metadata
                .get(field)
                .is_some_and(|v| like_match(v, pattern, true)),
        }
    }
}

fn values_equal(stored: &str, value: &FilterValue) -> bool {
    match value {
        FilterValue::Str(s) => stored == s,
        FilterValue::Num(n) => stored.parse::<f64>().is_ok_and(|v| (v - n).abs() < f64::EPSILON),
    }
}

/// Orders `stored` against `value`; `None` if they aren't comparable (a
/// numeric literal against a non-numeric stored value, or vice versa).
fn compare(stored: &str, value: &FilterValue) -> Option<std::cmp::Ordering> {
    match value {
        FilterValue::Num(n) => stored.parse::<f64>().ok()?.partial_cmp(n),
        FilterValue::Str(s) => Some(stored.cmp(s)),
    }
}

/// SQL LIKE pattern matching: `%` matches zero or more characters, `_`
/// matches exactly one, `\%`/`\_` match the literal character.
fn like_match(text: &str, pattern: &str, case_insensitive: bool) -> bool {
    let (text, pattern) = if case_insensitive {
        (text.to_lowercase(), pattern.to_lowercase())
    } else {
        (text.to_string(), pattern.to_string())
    };
    like_match_impl(text.as_bytes(), pattern.as_bytes())
}

/// Dynamic-programming LIKE matcher: `dp[i][j]` is true iff `text[..i]`
/// matches `pattern[..j]`.
fn like_match_impl(text: &[u8], pattern: &[u8]) -> bool {
    let m = text.len();
    let n = pattern.len();
    let mut dp = vec![vec![false; n + 1]; m + 1];
    dp[0][0] = true;

    let mut pi = 0;
    while pi < n {
        let (pat_char, pat_len) = if pattern[pi] == b'\\' && pi + 1 < n {
            (Some(pattern[pi + 1]), 2)
        } else if pattern[pi] == b'%' {
            (None, 1)
        } else if pattern[pi] == b'_' {
            (Some(0u8), 1)
        } else {
            (Some(pattern[pi]), 1)
        };

        for ti in 0..=m {
            match pat_char {
                None => {
                    dp[ti][pi + pat_len] = dp[ti][pi] || (ti > 0 && dp[ti - 1][pi + pat_len]);
                }
                Some(0) => {
                    if ti > 0 {
                        dp[ti][pi + pat_len] = dp[ti - 1][pi];
                    }
                }
                Some(c) => {
                    if ti > 0 && text[ti - 1] == c {
                        dp[ti][pi + pat_len] = dp[ti - 1][pi];
                    }
                }
            }
        }
        pi += pat_len;
    }

    dp[m][n]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md(pairs: &[(&str, &str)]) -> Metadata {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn eq_matches_string_value() {
        let c = Condition::eq("category", "A");
        assert!(c.matches(&md(&[("category", "A")])));
        assert!(!c.matches(&md(&[("category", "B")])));
    }

    #[test]
    fn eq_on_missing_key_is_false() {
        let c = Condition::eq("category", "A");
        assert!(!c.matches(&md(&[])));
    }

    #[test]
    fn not_on_missing_key_is_true() {
        let c = Condition::not(Condition::eq("category", "A"));
        assert!(c.matches(&md(&[])));
    }

    #[test]
    fn and_or_combinators() {
        let and = Condition::and(vec![
            Condition::eq("a", "1"),
            Condition::eq("b", "2"),
        ]);
        assert!(and.matches(&md(&[("a", "1"), ("b", "2")])));
        assert!(!and.matches(&md(&[("a", "1")])));

        let or = Condition::or(vec![Condition::eq("a", "1"), Condition::eq("b", "2")]);
        assert!(or.matches(&md(&[("b", "2")])));
    }

    #[test]
    fn numeric_ordering() {
        let c = Condition::Gt {
            field: "price".into(),
            value: FilterValue::Num(100.0),
        };
        assert!(c.matches(&md(&[("price", "150")])));
        assert!(!c.matches(&md(&[("price", "50")])));
        assert!(!c.matches(&md(&[("price", "not-a-number")])));
    }

    #[test]
    fn is_null_and_is_not_null() {
        assert!(Condition::IsNull { field: "x".into() }.matches(&md(&[])));
        assert!(!Condition::IsNull { field: "x".into() }.matches(&md(&[("x", "1")])));
        assert!(Condition::IsNotNull { field: "x".into() }.matches(&md(&[("x", "1")])));
    }

    #[test]
    fn like_wildcards() {
        assert!(like_match("hello world", "hello%", false));
        assert!(like_match("hello", "h_llo", false));
        assert!(like_match("hXllo", "h_llo", false));
        assert!(like_match("HELLO", "hello", true));
        assert!(!like_match("HELLO", "hello", false));
    }

    #[test]
    fn like_literal_escape() {
        assert!(like_match("50%", "50\\%", false));
        assert!(!like_match("50x", "50\\%", false));
    }

    #[test]
    fn contains_substring() {
        let c = Condition::Contains {
            field: "tags".into(),
            value: "rust".into(),
        };
        assert!(c.matches(&md(&[("tags", "rust,vector,db")])));
        assert!(!c.matches(&md(&[("tags", "python")])));
    }
}

//! Compiles a predicate string into a [`Condition`] AST.
//!
//! Grammar lives in `grammar.pest`; this is the only module that needs to
//! know about `pest`'s `Rule` enum. Grounded in the pack's use of
//! `pest`/`pest_derive` for query-language parsing (the teacher's
//! `velesql` module uses the same crates for a much larger grammar).

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;
use thiserror::Error;

use super::{Condition, FilterValue};

#[derive(PestParser)]
#[grammar = "filter/grammar.pest"]
struct PredicateParser;

/// Error compiling a predicate string.
#[derive(Debug, Error)]
#[error("invalid filter predicate: {0}")]
pub struct ParseError(String);

/// Compiles `predicate` (see `grammar.pest`) into a [`Condition`] tree.
pub fn parse(predicate: &str) -> Result<Condition, ParseError> {
    let mut pairs = PredicateParser::parse(Rule::predicate, predicate)
        .map_err(|e| ParseError(e.to_string()))?;
    let predicate_pair = pairs.next().ok_or_else(|| ParseError("empty input".into()))?;
    let or_expr = predicate_pair
        .into_inner()
        .find(|p| p.as_rule() == Rule::or_expr)
        .ok_or_else(|| ParseError("missing expression".into()))?;
    build_or(or_expr)
}

fn build_or(pair: Pair<Rule>) -> Result<Condition, ParseError> {
    let mut conditions: Vec<Condition> = pair
        .into_inner()
        .filter(|p| p.as_rule() == Rule::and_expr)
        .map(build_and)
        .collect::<Result<_, _>>()?;
    if conditions.len() == 1 {
        Ok(conditions.remove(0))
    } else {
        Ok(Condition::Or(conditions))
    }
}

fn build_and(pair: Pair<Rule>) -> Result<Condition, ParseError> {
    let mut conditions: Vec<Condition> = pair
        .into_inner()
        .filter(|p| p.as_rule() == Rule::unary)
        .map(build_unary)
        .collect::<Result<_, _>>()?;
    if conditions.len() == 1 {
        Ok(conditions.remove(0))
    } else {
        Ok(Condition::And(conditions))
    }
}

fn build_unary(pair: Pair<Rule>) -> Result<Condition, ParseError> {
    let text = pair.as_str();
    let mut inner = pair.into_inner();
    let first = inner
        .next()
        .ok_or_else(|| ParseError("empty unary".into()))?;
    if text.trim_start().starts_with("NOT") {
        Ok(Condition::Not(Box::new(build_unary(first)?)))
    } else {
        build_atom(first)
    }
}

fn build_atom(pair: Pair<Rule>) -> Result<Condition, ParseError> {
    match pair.as_rule() {
        Rule::atom => {
            let inner = pair
                .into_inner()
                .next()
                .ok_or_else(|| ParseError("empty atom".into()))?;
            build_atom(inner)
        }
        Rule::or_expr => build_or(pair),
        Rule::null_check => build_null_check(pair),
        Rule::in_expr => build_in(pair),
        Rule::like_expr => build_like(pair),
        Rule::comparison => build_comparison(pair),
        other => Err(ParseError(format!("unexpected rule in atom: {other:?}"))),
    }
}

fn build_comparison(pair: Pair<Rule>) -> Result<Condition, ParseError> {
    let mut inner = pair.into_inner();
    let field = inner.next().unwrap().as_str().to_string();
    let op = inner.next().unwrap().as_str();
    let value = parse_value(inner.next().unwrap())?;
    Ok(match op {
        "==" => Condition::Eq { field, value },
        "!=" => Condition::Neq { field, value },
        ">" => Condition::Gt { field, value },
        ">=" => Condition::Gte { field, value },
        "<" => Condition::Lt { field, value },
        "<=" => Condition::Lte { field, value },
        other => return Err(ParseError(format!("unknown operator {other}"))),
    })
}

fn build_in(pair: Pair<Rule>) -> Result<Condition, ParseError> {
    let mut inner = pair.into_inner();
    let field = inner.next().unwrap().as_str().to_string();
    let values = inner.map(parse_value).collect::<Result<_, _>>()?;
    Ok(Condition::In { field, values })
}

fn build_like(pair: Pair<Rule>) -> Result<Condition, ParseError> {
    let mut inner = pair.into_inner();
    let field = inner.next().unwrap().as_str().to_string();
    let op = inner.next().unwrap().as_str();
    let pattern = unescape_string(inner.next().unwrap().as_str());
    Ok(match op {
        "LIKE" => Condition::Like { field, pattern },
        "ILIKE" => Condition::ILike { field, pattern },
        "CONTAINS" => Condition::Contains { field, value: pattern },
        other => return Err(ParseError(format!("unknown operator {other}"))),
    })
}

fn build_null_check(pair: Pair<Rule>) -> Result<Condition, ParseError> {
    let mut inner = pair.into_inner();
    let field = inner.next().unwrap().as_str().to_string();
    let op = inner.next().unwrap().as_str();
    Ok(if op == "IS NULL" {
        Condition::IsNull { field }
    } else {
        Condition::IsNotNull { field }
    })
}

fn parse_value(pair: Pair<Rule>) -> Result<FilterValue, ParseError> {
    let value_pair = pair
        .into_inner()
        .next()
        .ok_or_else(|| ParseError("empty value".into()))?;
    match value_pair.as_rule() {
        Rule::number => value_pair
            .as_str()
            .parse::<f64>()
            .map(FilterValue::Num)
            .map_err(|e| ParseError(e.to_string())),
        Rule::string => Ok(FilterValue::Str(unescape_string(value_pair.as_str()))),
        other => Err(ParseError(format!("unexpected value rule: {other:?}"))),
    }
}

/// Strips the surrounding quotes a `string` rule match carries and resolves
/// backslash escapes.
fn unescape_string(raw: &str) -> String {
    let trimmed = raw.trim_matches('"');
    let mut out = String::with_capacity(trimmed.len());
    let mut chars = trimmed.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

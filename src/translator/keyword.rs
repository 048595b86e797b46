//! Offline command translator
//!
//! Pattern-based: the operation comes from [`OperationClassifier`], bounds,
//! points and the variable from phrase patterns, and whatever remains after
//! dropping command words is the expression. It has no second opinion, so a
//! refinement round returns the same command again.

use super::{CommandTranslator, Refinement};
use crate::classifier::OperationClassifier;
use crate::error::ResolutionError;
use crate::models::{Command, LimitDirection, Operation, DEFAULT_VARIABLE};
use crate::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;
use tracing::debug;

lazy_static! {
    static ref MATRIX_LITERAL: Regex =
        Regex::new(r"\[\s*\[[^\]]*\](?:\s*,\s*\[[^\]]*\])*\s*\]").unwrap();
    static ref INDEX_RANGE: Regex =
        Regex::new(r"(?i)\b(?:for\s+)?([a-z])\s*=\s*(\S+)\s+(?:to|\.\.)\s+(\S+)").unwrap();
    static ref FROM_TO: Regex =
        Regex::new(r"(?i)\b(?:from|between)\s+(?:([a-z])\s*=\s*)?(\S+)\s+(?:to|and)\s+(\S+)").unwrap();
    static ref APPROACHES: Regex =
        Regex::new(r"(?i)\bas\s+([a-z])\s*(?:->|→|approaches|tends to|goes to)\s*(\S+)").unwrap();
    static ref APPROACH_SIDE: Regex =
        Regex::new(r"(?i)\bfrom\s+(?:the\s+)?(left|right|above|below)\b").unwrap();
    static ref AROUND_POINT: Regex =
        Regex::new(r"(?i)\b(?:around|about|at|near)\s+(?:([a-z])\s*=\s*)?(\S+)").unwrap();
    static ref WITH_RESPECT_TO: Regex =
        Regex::new(r"(?i)\b(?:with respect to|wrt)\s+([a-z])\b").unwrap();
    static ref D_BY_D: Regex = Regex::new(r"(?i)\bd/d([a-z])\b").unwrap();
    static ref ORDER: Regex =
        Regex::new(r"(?i)\b(?:(?:up\s+)?to\s+)?order\s+(\d+)\b|\b(\d+)\s+terms\b").unwrap();
    static ref FOR_VARIABLE: Regex = Regex::new(r"(?i)\bfor\s+([a-z])\s*$").unwrap();
    static ref TRAILING_DIFFERENTIAL: Regex = Regex::new(r"\s*\bd([a-z])\s*$").unwrap();
    static ref ENGINE_HINT: Regex =
        Regex::new(r"(?i)\b(?:using|with|via|in)\s+(sympy|maxima|native)\b").unwrap();
    static ref AND_JOIN: Regex = Regex::new(r"(?i)\s+and\s+").unwrap();
    static ref IDENTIFIER: Regex = Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").unwrap();
}

/// Words that introduce a query rather than belong to its expression.
const FILLER: &[&str] = &[
    "please", "find", "compute", "calculate", "evaluate", "what", "what's", "whats", "is", "are",
    "determine", "give", "me", "the", "of", "for", "definite", "indefinite", "integral",
    "integrate", "antiderivative", "derivative", "differentiate", "solve", "simplify", "factor",
    "factorise", "factorize", "expand", "limit", "lim", "sum", "summation", "taylor", "maclaurin",
    "power", "series", "expansion", "determinant", "det", "inverse", "invert", "matrix",
    "equation", "expression", "value", "roots", "zeros",
];

#[derive(Debug, Default)]
pub struct KeywordTranslator;

impl KeywordTranslator {
    pub fn new() -> Self {
        Self
    }

    /// Best-effort command for `query`.
    pub fn parse(query: &str) -> Result<Command> {
        let operation = OperationClassifier::classify(query);
        let mut text = query.trim().to_string();
        let mut variable: Option<String> = None;
        let mut start: Option<String> = None;
        let mut end: Option<String> = None;
        let mut order: Option<u32> = None;
        let mut direction: Option<LimitDirection> = None;

        let preferred_engine = take(&mut text, &ENGINE_HINT).and_then(|g| first(&g)).map(|e| e.to_lowercase());

        if matches!(operation, Operation::Determinant | Operation::Invert) {
            if let Some(found) = MATRIX_LITERAL.find(&text) {
                let matrix: String = found.as_str().split_whitespace().collect();
                return Ok(finish(Command::new(operation, matrix), preferred_engine));
            }
        }

        match operation {
            Operation::Sum | Operation::Integrate => {
                let range = if operation == Operation::Sum {
                    take(&mut text, &INDEX_RANGE)
                } else {
                    None
                };
                if let Some(g) = range.or_else(|| take(&mut text, &FROM_TO)) {
                    variable = g[0].clone();
                    start = g[1].clone();
                    end = g[2].clone();
                }
            }
            Operation::Limit => {
                if let Some(side) = take(&mut text, &APPROACH_SIDE).and_then(|g| first(&g)) {
                    direction = LimitDirection::parse_optional(&side).ok().flatten();
                }
                if let Some(g) = take(&mut text, &APPROACHES) {
                    variable = g[0].clone();
                    start = g[1].clone();
                } else if let Some(g) = take(&mut text, &AROUND_POINT) {
                    variable = g[0].clone();
                    start = g[1].clone();
                }
                if let Some((point, side)) = start.as_deref().and_then(split_point_side) {
                    start = Some(point);
                    direction = direction.or(Some(side));
                }
            }
            Operation::Taylor => {
                if let Some(g) = take(&mut text, &ORDER) {
                    order = first(&g).and_then(|n| n.parse().ok());
                }
                if let Some(g) = take(&mut text, &AROUND_POINT) {
                    variable = g[0].clone();
                    start = g[1].clone();
                }
            }
            _ => {}
        }

        if let Some(g) = take(&mut text, &WITH_RESPECT_TO).or_else(|| take(&mut text, &D_BY_D)) {
            variable = variable.or_else(|| g[0].clone());
        }

        let mut expression = strip_filler(&text);

        if operation == Operation::Solve {
            if let Some(g) = take(&mut expression, &FOR_VARIABLE) {
                variable = variable.or_else(|| g[0].clone());
            }
            expression = AND_JOIN.replace_all(expression.trim(), ", ").into_owned();
        }
        if operation == Operation::Integrate {
            if let Some(g) = take(&mut expression, &TRAILING_DIFFERENTIAL) {
                variable = variable.or_else(|| g[0].clone());
            }
        }

        let expression = expression.trim().to_string();
        if expression.is_empty() {
            return Err(ResolutionError::TranslationUnavailable(format!(
                "no expression found in '{}'",
                query
            )));
        }

        let variable = variable.unwrap_or_else(|| infer_variable(&expression));
        let mut command = Command::new(operation, expression).with_variable(variable);
        command.start = start;
        command.end = end;
        command.order = order;
        command.direction = direction;

        debug!(operation = %command.operation, command = %command, "Keyword translation");
        Ok(finish(command, preferred_engine))
    }
}

fn finish(command: Command, preferred_engine: Option<String>) -> Command {
    match preferred_engine {
        Some(engine) => command.with_preferred_engine(engine),
        None => command,
    }
}

/// Removes the first match of `pattern` from `text`, returning its groups.
fn take(text: &mut String, pattern: &Regex) -> Option<Vec<Option<String>>> {
    let (range, groups) = {
        let caps = pattern.captures(text.as_str())?;
        let whole = caps.get(0)?;
        let groups: Vec<Option<String>> = caps
            .iter()
            .skip(1)
            .map(|g| g.map(|m| clean_token(m.as_str())))
            .collect();
        (whole.range(), groups)
    };
    text.replace_range(range, " ");
    Some(groups)
}

/// `0+` and `0^-` name the point and the side it is approached from.
fn split_point_side(point: &str) -> Option<(String, LimitDirection)> {
    let (rest, side) = if let Some(rest) = point.strip_suffix('+') {
        (rest, LimitDirection::Right)
    } else {
        (point.strip_suffix('-')?, LimitDirection::Left)
    };
    let rest = rest.strip_suffix('^').unwrap_or(rest);
    if rest.is_empty() {
        None
    } else {
        Some((rest.to_string(), side))
    }
}

fn first(groups: &[Option<String>]) -> Option<String> {
    groups.iter().flatten().next().cloned()
}

fn clean_token(token: &str) -> String {
    token
        .trim()
        .trim_end_matches(|c: char| matches!(c, '?' | ',' | ';' | '.'))
        .to_string()
}

fn strip_filler(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let skip = words
        .iter()
        .take_while(|w| {
            let word = w.trim_end_matches(|c: char| c == ':' || c == ',').to_lowercase();
            FILLER.contains(&word.as_str())
        })
        .count();

    let joined = words[skip..].join(" ");
    joined
        .trim_end_matches(|c: char| c == '?' || c == '!' || c.is_whitespace())
        .trim_end_matches(|c: char| c == '.')
        .to_string()
}

/// `x` when present, else the only single-letter symbol, else the default.
fn infer_variable(expression: &str) -> String {
    let letters: BTreeSet<&str> = IDENTIFIER
        .find_iter(expression)
        .map(|m| m.as_str())
        .filter(|id| id.len() == 1 && *id != "e" && *id != "i")
        .collect();

    if letters.contains(DEFAULT_VARIABLE) || letters.len() != 1 {
        DEFAULT_VARIABLE.to_string()
    } else {
        letters.iter().next().map_or(DEFAULT_VARIABLE, |v| *v).to_string()
    }
}

#[async_trait]
impl CommandTranslator for KeywordTranslator {
    async fn translate(&self, query: &str, _refinement: Option<Refinement<'_>>) -> Result<Command> {
        Self::parse(query)
    }
}

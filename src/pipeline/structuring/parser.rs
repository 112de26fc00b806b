use std::fmt;

use serde_json::Value;
use thiserror::Error;

use super::literal::{parse_literal, LiteralError};
use super::types::StructuredRecord;

/// One way of locating a dictionary payload in a model response.
///
/// Strategies are tried in [`ParseStrategy::ORDER`]; the first one that
/// yields a mapping wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseStrategy {
    /// Body of a fenced block labelled `python`.
    PythonFence,
    /// Body of a fenced block labelled `json`. Models regularly label a
    /// Python dict as JSON, so it is decoded the same way.
    JsonFence,
    /// The whole response, unfenced.
    BareLiteral,
}

impl ParseStrategy {
    pub const ORDER: [ParseStrategy; 3] = [
        ParseStrategy::PythonFence,
        ParseStrategy::JsonFence,
        ParseStrategy::BareLiteral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PythonFence => "python fence",
            Self::JsonFence => "json fence",
            Self::BareLiteral => "bare literal",
        }
    }

    /// Apply this strategy alone.
    pub fn attempt(&self, raw: &str) -> Result<StructuredRecord, StrategyMiss> {
        match self {
            Self::PythonFence => decode_fenced(raw, "python"),
            Self::JsonFence => decode_fenced(raw, "json"),
            Self::BareLiteral => decode_mapping(raw),
        }
    }
}

impl fmt::Display for ParseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a single strategy produced nothing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyMiss {
    #[error("no fenced block with that label")]
    NoFence,

    #[error("fenced block is never closed")]
    Unclosed,

    #[error("payload is not a valid literal: {0}")]
    Decode(#[from] LiteralError),

    #[error("payload is a {0}, not a mapping")]
    NotAMapping(&'static str),
}

/// Every strategy failed. The caller still owns the raw text and is
/// expected to log it verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("no structured record in model response ({})", describe_attempts(.attempts))]
    Exhausted {
        attempts: Vec<(ParseStrategy, StrategyMiss)>,
    },
}

fn describe_attempts(attempts: &[(ParseStrategy, StrategyMiss)]) -> String {
    attempts
        .iter()
        .map(|(strategy, miss)| format!("{strategy}: {miss}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// A recovered record plus the strategy that recovered it.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord {
    pub record: StructuredRecord,
    pub strategy: ParseStrategy,
}

/// Recover a structured record from free-form model output.
///
/// Deterministic and side-effect free: the same text always yields the same
/// record from the same strategy.
pub fn parse_structured_record(raw: &str) -> Result<ParsedRecord, ParseError> {
    let mut attempts = Vec::with_capacity(ParseStrategy::ORDER.len());
    for strategy in ParseStrategy::ORDER {
        match strategy.attempt(raw) {
            Ok(record) => return Ok(ParsedRecord { record, strategy }),
            Err(miss) => attempts.push((strategy, miss)),
        }
    }
    Err(ParseError::Exhausted { attempts })
}

/// Convenience wrapper when the winning strategy does not matter.
pub fn parse(raw: &str) -> Result<StructuredRecord, ParseError> {
    parse_structured_record(raw).map(|parsed| parsed.record)
}

/// Try each fenced block carrying `label`, in order. The first that decodes
/// to a mapping wins; otherwise the first block's failure is reported.
fn decode_fenced(raw: &str, label: &str) -> Result<StructuredRecord, StrategyMiss> {
    let mut first_miss = None;
    for body in fenced_blocks(raw, label) {
        let outcome = body.ok_or(StrategyMiss::Unclosed).and_then(decode_mapping);
        match outcome {
            Ok(record) => return Ok(record),
            Err(miss) => {
                first_miss.get_or_insert(miss);
            }
        }
    }
    Err(first_miss.unwrap_or(StrategyMiss::NoFence))
}

fn decode_mapping(text: &str) -> Result<StructuredRecord, StrategyMiss> {
    match parse_literal(text)? {
        Value::Object(map) => Ok(StructuredRecord::from(map)),
        Value::Array(_) => Err(StrategyMiss::NotAMapping("sequence")),
        Value::String(_) => Err(StrategyMiss::NotAMapping("string")),
        Value::Number(_) => Err(StrategyMiss::NotAMapping("number")),
        Value::Bool(_) => Err(StrategyMiss::NotAMapping("boolean")),
        Value::Null => Err(StrategyMiss::NotAMapping("None")),
    }
}

const FENCE: &str = "```";

/// Bodies of the blocks opened by a fence carrying `label` as a whole word
/// (case-insensitive), each closed by the next fence after its opener.
/// Fences without the label are passed over, so stray backticks elsewhere in
/// the response never shift the pairing. `None` marks an opener that is never
/// closed, which also ends the scan.
fn fenced_blocks<'a>(raw: &'a str, label: &str) -> Vec<Option<&'a str>> {
    let mut blocks = Vec::new();
    let mut cursor = 0;

    while let Some(found) = raw[cursor..].find(FENCE) {
        let opener = cursor + found;
        let after_fence = opener + FENCE.len();
        let word_len = raw[after_fence..]
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(raw.len() - after_fence);
        let word = &raw[after_fence..after_fence + word_len];

        if !word.eq_ignore_ascii_case(label) {
            cursor = opener + 1;
            continue;
        }

        let body_start = after_fence + word_len;
        match raw[body_start..].find(FENCE) {
            Some(len) => {
                blocks.push(Some(&raw[body_start..body_start + len]));
                cursor = body_start + len + FENCE.len();
            }
            None => {
                blocks.push(None);
                break;
            }
        }
    }

    blocks
}

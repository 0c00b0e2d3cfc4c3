//! Response Extractor
//!
//! Recovers a single SQL statement from free-text model output. Tries, in order:
//! fenced SQL blocks (last one wins), the quoted-sentence convention, and a bare
//! `SELECT` line scan. Chain-of-thought `<think>` wrappers are split off first.
//! A missing query is a normal outcome, reported as a value.

use crate::error::{BridgeError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref FENCED_BLOCK: Regex = Regex::new(r"(?s)```([A-Za-z-]*)[ \t]*\r?\n?(.*?)```").unwrap();
    static ref QUOTED_LEAD: Regex = Regex::new(r#"(?i)your\s+sql\s+query\s+will\s+be\s+like\s*:?\s*""#).unwrap();
    static ref THINK_TAG: Regex = Regex::new(r"(?i)</?think>").unwrap();
}

const SQL_FENCE_TAGS: &[&str] = &["sql", "tsql", "t-sql", "mssql", "sqlserver"];

/// Phrases that mark a reply as a refusal rather than an answer.
const REFUSAL_PHRASES: &[&str] = &[
    "cannot generate",
    "can't generate",
    "can not generate",
    "unable to generate",
    "not able to generate",
    "not related to",
    "unrelated to the database",
    "outside the scope",
    "out of scope",
    "cannot answer",
    "can't answer",
];

/// Which output convention produced the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    Fenced,
    Quoted,
    BareSelect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub query: Option<String>,
    pub thought: Option<String>,
    pub error_reason: Option<String>,
    pub source: Option<ExtractionSource>,
}

impl ExtractionResult {
    fn found(query: String, source: ExtractionSource, thought: Option<String>) -> Self {
        Self {
            query: Some(query),
            thought,
            error_reason: None,
            source: Some(source),
        }
    }

    fn failed(reason: impl Into<String>, thought: Option<String>) -> Self {
        Self {
            query: None,
            thought,
            error_reason: Some(reason.into()),
            source: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.query.is_some()
    }

    pub fn into_result(self) -> Result<String> {
        match self.query {
            Some(query) => Ok(query),
            None => Err(BridgeError::Extraction(
                self.error_reason
                    .unwrap_or_else(|| "No SQL query found in the model response".to_string()),
            )),
        }
    }
}

pub fn extract(response: &str) -> ExtractionResult {
    let (thought, answer) = split_thought(response);

    if answer.trim().is_empty() {
        return ExtractionResult::failed("The model returned no answer text", thought);
    }

    if let Some(query) = last_fenced_block(answer) {
        return ExtractionResult::found(query, ExtractionSource::Fenced, thought);
    }

    if let Some(query) = quoted_sentence(answer) {
        return ExtractionResult::found(query, ExtractionSource::Quoted, thought);
    }

    if let Some(phrase) = refusal_phrase(answer) {
        return ExtractionResult::failed(
            format!("The model declined to produce a query ({}): {}", phrase, first_line(answer)),
            thought,
        );
    }

    if let Some(query) = bare_select(answer) {
        return ExtractionResult::found(query, ExtractionSource::BareSelect, thought);
    }

    ExtractionResult::failed("No SQL query found in the model response", thought)
}

/// Split off the `<think>` wrapper. Returns the thought text and the answer text.
fn split_thought(text: &str) -> (Option<String>, &str) {
    // ASCII lowercasing keeps byte offsets aligned with `text`.
    let lower = text.to_ascii_lowercase();

    if let Some(close) = lower.rfind("</think>") {
        let thought = THINK_TAG.replace_all(&text[..close], "").trim().to_string();
        let answer = &text[close + "</think>".len()..];
        return (non_empty(thought), answer);
    }

    if let Some(open) = lower.find("<think>") {
        let thought = text[open + "<think>".len()..].trim().to_string();
        return (non_empty(thought), &text[..open]);
    }

    (None, text)
}

fn last_fenced_block(text: &str) -> Option<String> {
    FENCED_BLOCK
        .captures_iter(text)
        .filter_map(|caps| {
            let tag = caps.get(1).map(|m| m.as_str().to_ascii_lowercase()).unwrap_or_default();
            let body = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            let accepted = if tag.is_empty() {
                starts_like_query(body)
            } else {
                SQL_FENCE_TAGS.contains(&tag.as_str())
            };
            if accepted {
                clean_query(body)
            } else {
                None
            }
        })
        .last()
}

/// `Your SQL Query will be like "<query>"`, last occurrence.
///
/// The query may itself contain double quotes, so the closing quote is the one
/// that ends its line.
fn quoted_sentence(text: &str) -> Option<String> {
    let lead = QUOTED_LEAD.find_iter(text).last()?;
    let rest = &text[lead.end()..];

    let line_end_quote = rest.char_indices().find_map(|(i, c)| {
        if c != '"' {
            return None;
        }
        let after = rest[i + 1..].trim_start_matches(|ch: char| ch == ' ' || ch == '\t' || ch == '\r' || ch == '.');
        if after.is_empty() || after.starts_with('\n') {
            Some(i)
        } else {
            None
        }
    });

    let close = line_end_quote.or_else(|| rest.rfind('"'))?;
    clean_query(&rest[..close])
}

fn refusal_phrase(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    REFUSAL_PHRASES.iter().copied().find(|p| lower.contains(p))
}

/// First line starting with `SELECT`, plus following lines up to a `;`.
fn bare_select(text: &str) -> Option<String> {
    let mut collected: Vec<&str> = Vec::new();

    for line in text.lines() {
        if collected.is_empty() {
            let trimmed = line.trim_start();
            if !starts_with_keyword(trimmed, "select") {
                continue;
            }
            if let Some(end) = trimmed.find(';') {
                collected.push(&trimmed[..end]);
                break;
            }
            collected.push(trimmed);
            continue;
        }

        if let Some(end) = line.find(';') {
            collected.push(&line[..end]);
            break;
        }
        collected.push(line);
    }

    if collected.is_empty() {
        return None;
    }
    clean_query(&collected.join("\n"))
}

fn starts_like_query(body: &str) -> bool {
    let trimmed = body.trim_start();
    starts_with_keyword(trimmed, "select") || starts_with_keyword(trimmed, "with")
}

fn starts_with_keyword(text: &str, keyword: &str) -> bool {
    text.len() >= keyword.len()
        && text.is_char_boundary(keyword.len())
        && text[..keyword.len()].eq_ignore_ascii_case(keyword)
        && text[keyword.len()..]
            .chars()
            .next()
            .map(|c| !c.is_alphanumeric() && c != '_')
            .unwrap_or(true)
}

/// Trim whitespace and any trailing semicolons. Empty results count as no query.
fn clean_query(raw: &str) -> Option<String> {
    let query = raw.trim().trim_end_matches(';').trim_end();
    non_empty(query.to_string())
}

fn first_line(text: &str) -> &str {
    text.trim().lines().next().unwrap_or("").trim()
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_fenced_block_wins() {
        let response = "First try:\n```sql\nSELECT * FROM Orders\n```\nActually, better:\n```sql\nSELECT TOP 5 * FROM Orders;\n```\n";
        let result = extract(response);
        assert_eq!(result.query.as_deref(), Some("SELECT TOP 5 * FROM Orders"));
        assert_eq!(result.source, Some(ExtractionSource::Fenced));
    }

    #[test]
    fn test_think_block_is_never_extracted() {
        let response = "<think>reasoning mentions SELECT * FROM X</think>\n```sql\nSELECT 1\n```";
        let result = extract(response);
        assert_eq!(result.query.as_deref(), Some("SELECT 1"));
        assert_eq!(result.thought.as_deref(), Some("reasoning mentions SELECT * FROM X"));
    }

    #[test]
    fn test_unclosed_think_keeps_text_before_it() {
        let response = "```sql\nSELECT 2\n```\n<think>SELECT * FROM Nope";
        let result = extract(response);
        assert_eq!(result.query.as_deref(), Some("SELECT 2"));
        assert!(result.thought.unwrap().contains("Nope"));
    }

    #[test]
    fn test_refusal_short_circuits_bare_select() {
        let result = extract("I cannot generate a query for this request. SELECT is not applicable here.");
        assert!(result.query.is_none());
        assert!(!result.error_reason.unwrap().is_empty());
    }

    #[test]
    fn test_apology_before_bare_select_is_not_a_refusal() {
        let result = extract("I'm sorry for the confusion. Here is the corrected query:\nSELECT TOP 5 * FROM Orders;");
        assert_eq!(result.query.as_deref(), Some("SELECT TOP 5 * FROM Orders"));
        assert_eq!(result.source, Some(ExtractionSource::BareSelect));
        assert!(result.error_reason.is_none());
    }

    #[test]
    fn test_quoted_sentence_convention() {
        let result = extract(r#"Your SQL Query will be like "SELECT TOP 5 * FROM Orders""#);
        assert_eq!(result.query.as_deref(), Some("SELECT TOP 5 * FROM Orders"));
        assert_eq!(result.source, Some(ExtractionSource::Quoted));
    }

    #[test]
    fn test_quoted_sentence_with_inner_quotes() {
        let response = "Sure.\nYour SQL Query will be like \"SELECT * FROM t WHERE \"Name\" = 'x';\".\nHope it helps.";
        let result = extract(response);
        assert_eq!(result.query.as_deref(), Some("SELECT * FROM t WHERE \"Name\" = 'x'"));
    }

    #[test]
    fn test_bare_select_accumulates_until_semicolon() {
        let response = "Here you go:\nselect Name,\n  Region\nFROM Customers;\nThis lists customers.";
        let result = extract(response);
        assert_eq!(result.query.as_deref(), Some("select Name,\n  Region\nFROM Customers"));
        assert_eq!(result.source, Some(ExtractionSource::BareSelect));
    }

    #[test]
    fn test_untagged_fence_only_counts_when_it_looks_like_sql() {
        let result = extract("```\nWITH x AS (SELECT 1 AS a) SELECT a FROM x\n```");
        assert_eq!(result.query.as_deref(), Some("WITH x AS (SELECT 1 AS a) SELECT a FROM x"));

        let result = extract("```python\nprint('hi')\n```");
        assert!(result.query.is_none());
    }

    #[test]
    fn test_selection_word_is_not_select() {
        assert!(extract("Selection of rows is not possible.").query.is_none());
    }

    #[test]
    fn test_empty_response_is_a_failure_value() {
        let result = extract("   ");
        assert!(!result.is_success());
        assert!(matches!(result.into_result(), Err(BridgeError::Extraction(_))));
    }
}

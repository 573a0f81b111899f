//! Defensive parsing of model text.
//!
//! Each parser is an ordered list of strategies. A strategy either produces a
//! value or passes, and the first one that produces wins. Nothing in here
//! returns an error: the reviewer parser degrades to a raw-text overview and
//! the verifier / resolution parsers return `None` or an empty list.

use super::types::{Comment, ParsedReview, ResolutionStatus, Severity, Side};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

type Strategy<T> = fn(&str) -> Option<T>;

fn first_match<T>(what: &str, text: &str, strategies: &[(&str, Strategy<T>)]) -> Option<T> {
    strategies.iter().find_map(|(name, strategy)| {
        let found = strategy(text);
        if found.is_some() {
            debug!(parser = what, strategy = *name, "parsed model response");
        }
        found
    })
}

// ═══════════════════════════════════════════════════════════════════════════
//  JSON SALVAGE
// ═══════════════════════════════════════════════════════════════════════════

/// Strip one layer of markdown code fences from a response
fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```JSON"))
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    clean.strip_suffix("```").unwrap_or(clean).trim()
}

/// Try to fix common JSON issues from model responses
fn fix_json_issues(json: &str) -> String {
    let mut fixed = json.to_string();

    // Trailing commas, allowing whitespace before the closer
    if let Ok(re) = Regex::new(r",\s*([\]}])") {
        fixed = re.replace_all(&fixed, "$1").into_owned();
    }

    fixed = fixed.replace(['\u{201C}', '\u{201D}'], "\"");
    fixed = fixed.replace(['\u{2018}', '\u{2019}'], "'");

    fixed
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t' || *c == '\r')
        .collect()
}

/// Parse as JSON, retrying once after [`fix_json_issues`].
fn parse_lenient(candidate: &str) -> Option<Value> {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return None;
    }
    serde_json::from_str(candidate)
        .ok()
        .or_else(|| serde_json::from_str(&fix_json_issues(candidate)).ok())
}

/// Bodies of every fenced code block, in order. `json_only` keeps blocks
/// tagged `json` and skips untagged or other-language blocks.
fn fenced_blocks(text: &str, json_only: bool) -> Vec<&str> {
    let Ok(re) = Regex::new(r"(?s)```([A-Za-z0-9_-]*)[ \t]*\r?\n?(.*?)```") else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter(|caps| {
            let lang = caps.get(1).map_or("", |m| m.as_str());
            if json_only {
                lang.eq_ignore_ascii_case("json")
            } else {
                lang.is_empty() || lang.eq_ignore_ascii_case("json")
            }
        })
        .filter_map(|caps| caps.get(2).map(|m| m.as_str()))
        .collect()
}

/// Outermost `open`..`close` span of the text.
fn outermost_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (start < end).then(|| &text[start..=end])
}

/// Manual unescaping for string values pulled out by regex.
fn unescape_json_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => {}
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════
//  FIELD HELPERS
// ═══════════════════════════════════════════════════════════════════════════

fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| obj.get(*n).filter(|v| !v.is_null()))
}

fn str_field(obj: &Map<String, Value>, names: &[&str]) -> Option<String> {
    field(obj, names)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn u32_value(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
            .and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => parse_line_number(s),
        _ => None,
    }
}

fn parse_line_number(s: &str) -> Option<u32> {
    let s = s.trim();
    let s = s.strip_prefix('L').or_else(|| s.strip_prefix('l')).unwrap_or(s);
    s.trim().parse().ok()
}

/// A normalised `line` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineValue {
    pub line: u32,
    pub start_line: Option<u32>,
}

/// Normalise a reviewer's `line` field.
///
/// Accepts a number (`12`), a numeric string (`"12"`), or a range string
/// (`"10-15"`, `"L10-L15"`). A range yields its end as `line` and its start
/// as `start_line`.
pub fn parse_line_value(value: &Value) -> Option<LineValue> {
    if let Some(line) = u32_value(value) {
        return Some(LineValue {
            line,
            start_line: None,
        });
    }

    let text = value.as_str()?.trim();
    let (a, b) = text
        .split_once('-')
        .or_else(|| text.split_once('\u{2013}'))?;
    let (a, b) = (parse_line_number(a)?, parse_line_number(b)?);
    let (start, end) = if a <= b { (a, b) } else { (b, a) };
    Some(LineValue {
        line: end,
        start_line: (start != end).then_some(start),
    })
}

// ═══════════════════════════════════════════════════════════════════════════
//  REVIEWER RESPONSES
// ═══════════════════════════════════════════════════════════════════════════

fn comment_from_value(value: &Value) -> Result<Comment, Option<String>> {
    let Some(obj) = value.as_object() else {
        return Err(value.as_str().map(str::to_string));
    };
    let body = str_field(obj, &["body", "message", "comment", "description", "text"]).ok_or(None)?;
    let Some(path) = str_field(obj, &["path", "file", "filename", "file_path"]) else {
        return Err(Some(body));
    };

    let ranged = field(obj, &["line", "line_number", "lines"]).and_then(parse_line_value);
    let explicit_start = field(obj, &["start_line", "startLine"]).and_then(u32_value);
    let line = ranged.map_or(0, |l| l.line);
    let start_line = explicit_start
        .or(ranged.and_then(|l| l.start_line))
        .filter(|start| *start != line && line != 0);

    let side = str_field(obj, &["side"])
        .and_then(|s| Side::from_label(&s))
        .unwrap_or_default();
    let start_side = str_field(obj, &["start_side", "startSide"]).and_then(|s| Side::from_label(&s));
    let severity = str_field(obj, &["severity", "level", "priority"])
        .map_or(Severity::Info, |s| Severity::from_label(&s));

    Ok(Comment {
        path,
        line,
        start_line,
        side,
        start_side,
        body,
        severity,
    })
}

/// Interpret a JSON value as a reviewer payload.
fn review_from_value(value: Value) -> Option<ParsedReview> {
    let (mut overview, items) = match value {
        Value::Object(obj) => {
            let items = field(&obj, &["comments", "issues", "findings"])
                .and_then(Value::as_array)
                .cloned();
            let overview = str_field(&obj, &["overview", "summary"]).unwrap_or_default();
            if items.is_none() && overview.is_empty() {
                return None;
            }
            (overview, items.unwrap_or_default())
        }
        Value::Array(items) => (String::new(), items),
        _ => return None,
    };

    let mut comments = Vec::with_capacity(items.len());
    let mut general = Vec::new();
    for item in &items {
        match comment_from_value(item) {
            Ok(comment) => comments.push(comment),
            Err(Some(note)) => general.push(note),
            Err(None) => {}
        }
    }

    if !general.is_empty() {
        if !overview.is_empty() {
            overview.push_str("\n\n");
        }
        for note in general {
            overview.push_str("- ");
            overview.push_str(&note);
            overview.push('\n');
        }
        overview = overview.trim_end().to_string();
    }

    Some(ParsedReview { overview, comments })
}

fn review_from_fenced_block(text: &str) -> Option<ParsedReview> {
    fenced_blocks(text, false)
        .into_iter()
        .find_map(|block| parse_lenient(block).and_then(review_from_value))
}

fn review_from_whole_text(text: &str) -> Option<ParsedReview> {
    parse_lenient(strip_markdown_fences(text)).and_then(review_from_value)
}

fn review_from_object_span(text: &str) -> Option<ParsedReview> {
    outermost_span(text, '{', '}')
        .and_then(parse_lenient)
        .and_then(review_from_value)
}

/// Extract `{overview, comments[]}` from a reviewer's free-form response.
///
/// Never fails: text with no usable JSON becomes the overview verbatim.
pub fn parse_reviewer_response(text: &str) -> ParsedReview {
    const STRATEGIES: &[(&str, Strategy<ParsedReview>)] = &[
        ("fenced-block", review_from_fenced_block),
        ("whole-text", review_from_whole_text),
        ("object-span", review_from_object_span),
    ];

    first_match("reviewer", text, STRATEGIES).unwrap_or_else(|| {
        warn!("reviewer response had no usable JSON, keeping it as overview text");
        ParsedReview {
            overview: text.trim().to_string(),
            comments: Vec::new(),
        }
    })
}

// ═══════════════════════════════════════════════════════════════════════════
//  VERIFIER RESPONSES
// ═══════════════════════════════════════════════════════════════════════════

/// What the verifier decided.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VerifierVerdict {
    pub overview: String,
    pub passed: Option<bool>,
    /// `None` when the verifier omitted the field.
    pub valid_comment_ids: Option<Vec<String>>,
}

fn comment_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => n.as_u64().map(|n| format!("C{}", n)),
        _ => None,
    }
}

fn verdict_from_value(value: Value) -> Option<VerifierVerdict> {
    let obj = value.as_object()?;
    let overview = field(obj, &["overview"])?.as_str()?.to_string();
    let passed = field(obj, &["passed"]).and_then(Value::as_bool);
    let valid_comment_ids = field(obj, &["validCommentIds", "valid_comment_ids"])
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(comment_id).collect());
    Some(VerifierVerdict {
        overview,
        passed,
        valid_comment_ids,
    })
}

fn verdict_from_json_blocks(text: &str) -> Option<VerifierVerdict> {
    fenced_blocks(text, true)
        .into_iter()
        .find_map(|block| parse_lenient(block).and_then(verdict_from_value))
}

fn verdict_from_object_span(text: &str) -> Option<VerifierVerdict> {
    outermost_span(text, '{', '}')
        .and_then(parse_lenient)
        .and_then(verdict_from_value)
}

fn verdict_from_fields(text: &str) -> Option<VerifierVerdict> {
    let overview_re = Regex::new(r#"(?s)"overview"\s*:\s*"((?:[^"\\]|\\.)*)""#).ok()?;
    let overview = unescape_json_string(overview_re.captures(text)?.get(1)?.as_str());

    let passed = Regex::new(r#""passed"\s*:\s*(true|false)"#)
        .ok()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str() == "true");

    let valid_comment_ids = Regex::new(r#"(?s)"valid_?[cC]omment_?[iI]ds"\s*:\s*\[(.*?)\]"#)
        .ok()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|list| {
            list.as_str()
                .split(',')
                .map(|id| id.trim().trim_matches('"').trim().to_string())
                .filter(|id| !id.is_empty())
                .collect()
        });

    Some(VerifierVerdict {
        overview,
        passed,
        valid_comment_ids,
    })
}

/// Parse the verifier's `{overview, passed?, validCommentIds?}` answer.
pub fn parse_verifier_response(text: &str) -> Option<VerifierVerdict> {
    const STRATEGIES: &[(&str, Strategy<VerifierVerdict>)] = &[
        ("json-blocks", verdict_from_json_blocks),
        ("object-span", verdict_from_object_span),
        ("field-regex", verdict_from_fields),
    ];
    first_match("verifier", text, STRATEGIES)
}

// ═══════════════════════════════════════════════════════════════════════════
//  RESOLUTION RESPONSES
// ═══════════════════════════════════════════════════════════════════════════

/// One classification as the model wrote it, before it is matched to a comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResolution {
    pub id: Option<String>,
    pub path: Option<String>,
    pub line: Option<u32>,
    pub status: ResolutionStatus,
    pub reason: String,
}

fn resolution_from_value(value: &Value) -> Option<RawResolution> {
    let obj = value.as_object()?;
    let status_label = str_field(obj, &["status", "resolution", "verdict"])?;
    let Some(status) = ResolutionStatus::from_label(&status_label) else {
        debug!(status = %status_label, "ignoring resolution with unknown status");
        return None;
    };
    let id = field(obj, &["commentId", "comment_id", "id"]).and_then(|v| match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    Some(RawResolution {
        id: id.filter(|s| !s.is_empty()),
        path: str_field(obj, &["path", "file"]),
        line: field(obj, &["line"]).and_then(u32_value),
        status,
        reason: str_field(obj, &["reason", "explanation", "justification"]).unwrap_or_default(),
    })
}

fn resolutions_from_value(value: Value) -> Option<Vec<RawResolution>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(obj) => field(&obj, &["results", "resolutions", "comments"])?
            .as_array()?
            .clone(),
        _ => return None,
    };
    Some(items.iter().filter_map(resolution_from_value).collect())
}

fn resolutions_from_fenced_block(text: &str) -> Option<Vec<RawResolution>> {
    fenced_blocks(text, false)
        .into_iter()
        .find_map(|block| parse_lenient(block).and_then(resolutions_from_value))
}

fn resolutions_from_whole_text(text: &str) -> Option<Vec<RawResolution>> {
    parse_lenient(strip_markdown_fences(text)).and_then(resolutions_from_value)
}

fn resolutions_from_span(text: &str) -> Option<Vec<RawResolution>> {
    outermost_span(text, '{', '}')
        .and_then(parse_lenient)
        .and_then(resolutions_from_value)
        .or_else(|| {
            outermost_span(text, '[', ']')
                .and_then(parse_lenient)
                .and_then(resolutions_from_value)
        })
}

/// Parse the resolution check answer. Unparseable text yields no results.
pub fn parse_resolution_response(text: &str) -> Vec<RawResolution> {
    const STRATEGIES: &[(&str, Strategy<Vec<RawResolution>>)] = &[
        ("fenced-block", resolutions_from_fenced_block),
        ("whole-text", resolutions_from_whole_text),
        ("span", resolutions_from_span),
    ];
    first_match("resolution", text, STRATEGIES).unwrap_or_else(|| {
        warn!("resolution response had no usable JSON");
        Vec::new()
    })
}

use serde::{Deserialize, Serialize};
use std::borrow::{Borrow, BorrowMut};
use std::fmt;

/// Finding severity, ordered most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    fn rank(self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::Warning => 1,
            Severity::Info => 2,
        }
    }

    /// Whether a finding of this severity passes a minimum-severity threshold.
    ///
    /// `critical` passes every threshold, `info` only passes `info`.
    pub fn meets(self, threshold: Severity) -> bool {
        self.rank() <= threshold.rank()
    }

    /// Lenient parse of the labels reviewers actually emit.
    pub fn from_label(label: &str) -> Severity {
        match label.trim().to_lowercase().as_str() {
            "critical" | "error" | "high" | "blocker" | "bug" => Severity::Critical,
            "warning" | "warn" | "medium" | "major" => Severity::Warning,
            _ => Severity::Info,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }

    pub fn badge(self) -> &'static str {
        match self {
            Severity::Critical => "🔴 **Critical**",
            Severity::Warning => "🟡 **Warning**",
            Severity::Info => "🔵 **Info**",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the diff an anchor refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Old file (deleted and context lines).
    Left,
    /// New file (added and context lines).
    #[default]
    Right,
}

impl Side {
    pub fn from_label(label: &str) -> Option<Side> {
        match label.trim().to_uppercase().as_str() {
            "LEFT" | "OLD" | "BASE" => Some(Side::Left),
            "RIGHT" | "NEW" | "HEAD" => Some(Side::Right),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Left => "LEFT",
            Side::Right => "RIGHT",
        }
    }
}

/// A single finding anchored to a diff line (or range).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub path: String,
    /// End line of the anchor. `0` means the reviewer gave no usable line.
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
    #[serde(default)]
    pub side: Side,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_side: Option<Side>,
    pub body: String,
    pub severity: Severity,
}

impl Comment {
    /// Inclusive line range covered by this comment.
    pub fn range(&self) -> (u32, u32) {
        match self.start_line {
            Some(start) if start <= self.line => (start, self.line),
            _ => (self.line, self.line),
        }
    }

    /// `path:line` or `path:start-end`, used in narrative text.
    pub fn location(&self) -> String {
        if self.line == 0 {
            return format!("{} (no line)", self.path);
        }
        match self.range() {
            (start, end) if start != end => format!("{}:{}-{}", self.path, start, end),
            (_, end) => format!("{}:{}", self.path, end),
        }
    }
}

/// `{overview, comments[]}` extracted from one reviewer's text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedReview {
    pub overview: String,
    pub comments: Vec<Comment>,
}

/// Exactly one per enabled reviewer, whatever happened to it.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewerOutput {
    pub name: String,
    pub success: bool,
    pub review: Option<ParsedReview>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ReviewerOutput {
    pub fn succeeded(name: impl Into<String>, review: ParsedReview, duration_ms: u64) -> Self {
        Self {
            name: name.into(),
            success: true,
            review: Some(review),
            error: None,
            duration_ms,
        }
    }

    pub fn failed(name: impl Into<String>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            name: name.into(),
            success: false,
            review: None,
            error: Some(error.into()),
            duration_ms,
        }
    }
}

/// A merged comment with its run-scoped id (`C1`, `C2`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentifiedComment {
    pub id: String,
    /// Reviewer whose comment became the canonical copy.
    pub reviewer: String,
    /// Other reviewers that raised the same finding.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub also_raised_by: Vec<String>,
    pub comment: Comment,
}

impl IdentifiedComment {
    pub fn reviewers(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.reviewer.as_str()).chain(self.also_raised_by.iter().map(String::as_str))
    }
}

impl Borrow<Comment> for IdentifiedComment {
    fn borrow(&self) -> &Comment {
        &self.comment
    }
}

impl BorrowMut<Comment> for IdentifiedComment {
    fn borrow_mut(&mut self) -> &mut Comment {
        &mut self.comment
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReviewSummary {
    pub total_reviewers: usize,
    pub successful_reviewers: usize,
    pub critical_issues: usize,
    pub warnings: usize,
    pub infos: usize,
}

impl ReviewSummary {
    pub fn tally(total: usize, successful: usize, comments: &[IdentifiedComment]) -> Self {
        let mut summary = ReviewSummary {
            total_reviewers: total,
            successful_reviewers: successful,
            ..Default::default()
        };
        for c in comments {
            match c.comment.severity {
                Severity::Critical => summary.critical_issues += 1,
                Severity::Warning => summary.warnings += 1,
                Severity::Info => summary.infos += 1,
            }
        }
        summary
    }
}

/// How the final review was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisMode {
    /// The verifier answered and its verdict was applied.
    Verified,
    /// Deterministic concatenation; the verifier was disabled, failed, or timed out.
    Basic,
}

#[derive(Debug, Clone, Serialize)]
pub struct SynthesizedReview {
    pub overview: String,
    pub comments: Vec<IdentifiedComment>,
    pub summary: ReviewSummary,
    pub passed: bool,
    pub mode: SynthesisMode,
    /// Why the verifier's verdict was not used, for basic synthesis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

/// A previously posted inline comment that is still open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OldComment {
    pub id: String,
    pub path: String,
    pub line: u32,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStatus {
    Fixed,
    NotFixed,
    PartiallyFixed,
}

impl ResolutionStatus {
    pub fn from_label(label: &str) -> Option<ResolutionStatus> {
        let normalized: String = label
            .trim()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c.to_ascii_uppercase() })
            .collect();
        match normalized.as_str() {
            "FIXED" | "RESOLVED" => Some(ResolutionStatus::Fixed),
            "NOT_FIXED" | "UNRESOLVED" | "OPEN" => Some(ResolutionStatus::NotFixed),
            "PARTIALLY_FIXED" | "PARTIAL" => Some(ResolutionStatus::PartiallyFixed),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ResolutionStatus::Fixed => "✅ Fixed",
            ResolutionStatus::NotFixed => "❌ Not fixed",
            ResolutionStatus::PartiallyFixed => "⚠️ Partially fixed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionResult {
    pub comment_id: String,
    pub status: ResolutionStatus,
    pub reason: String,
}

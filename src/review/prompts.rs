use super::types::{IdentifiedComment, OldComment, ReviewerOutput};
use crate::config::ReviewerSpec;
use crate::protocol::{ChangedFile, PrData};
use crate::util::{truncate, truncate_middle};
use std::fmt::Write;

/// Upper bound on diff text placed in a single prompt
const MAX_DIFF_CHARS: usize = 200_000;

/// PR description text included in prompts
const MAX_DESCRIPTION_CHARS: usize = 4_000;

pub const GENERAL_REVIEWER_PROMPT: &str = r#"You are a senior engineer reviewing a pull request.

Look for real problems a careful teammate would block or flag:
- Bugs and logic errors, including off-by-one and inverted conditions
- Unhandled errors, panics, and missing edge cases (empty input, None/null, overflow)
- Security issues: injection, unchecked input, leaked secrets, broken auth
- Concurrency hazards and resource leaks
- Changes that break existing callers

Do not comment on formatting or personal style. Only flag what you can point to in the diff."#;

const REVIEWER_OUTPUT_FORMAT: &str = r#"OUTPUT FORMAT (JSON inside a ```json fence):
{
  "overview": "2-5 sentence summary of the change and your main concerns",
  "comments": [
    {
      "path": "src/file.rs",
      "line": 42,
      "side": "RIGHT",
      "severity": "critical | warning | info",
      "body": "What is wrong, why it matters, and how to fix it"
    }
  ]
}

RULES FOR ANCHORS:
- "path" is the file path exactly as it appears in the diff header
- "line" is the line number in the NEW file for added or unchanged lines (side "RIGHT")
- For a removed line use the OLD file's line number and side "LEFT"
- For a multi-line issue use "line": "10-15" or add "start_line"
- Only use lines that appear in the diff
- Return "comments": [] if you find nothing worth raising"#;

const VERIFIER_INSTRUCTIONS: &str = r#"You are the lead reviewer consolidating findings from several independent reviewers.

Your job:
1. Check each numbered finding against the diff. Keep true positives, drop false positives, duplicates, and pure style nits.
2. Write one coherent review overview for the PR author in markdown. Summarize what the PR does, then the issues that matter most. Credit reviewers only when useful.
3. Decide whether the PR passes: it fails if any remaining finding is a real critical issue."#;

const VERIFIER_OUTPUT_FORMAT: &str = r#"OUTPUT FORMAT (a single JSON object inside a ```json fence):
{
  "overview": "markdown narrative for the PR author",
  "passed": true,
  "validCommentIds": ["C1", "C3"]
}

"validCommentIds" lists the ids of findings that should be posted. Use the ids exactly as given."#;

const DIAGRAM_INSTRUCTIONS: &str = "If the change has non-trivial control flow or touches several components, include a Mermaid sequence or flow diagram of it in the overview (```mermaid fence). Skip the diagram for small or mechanical changes.";

const RESOLUTION_INSTRUCTIONS: &str = r#"You check whether earlier code review comments have been addressed.

For each comment below you get the original comment, the current code around the location it was raised on, and the commits pushed since. Decide for each:
- FIXED: the problem described is no longer present
- PARTIALLY_FIXED: some of it was addressed but not all
- NOT_FIXED: the problem is still there, or you cannot tell

OUTPUT FORMAT (JSON inside a ```json fence):
{
  "results": [
    { "id": "<comment id>", "status": "FIXED", "reason": "one sentence of evidence" }
  ]
}

Echo each comment's id exactly. Give a concrete reason for every result."#;

/// Read-only PR facts shared by every prompt in a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrContext {
    pub title: String,
    pub description: String,
    pub author: String,
    pub base_ref: String,
    pub head_ref: String,
    pub files: Vec<ChangedFile>,
}

impl PrContext {
    pub fn from_pr(pr: &PrData) -> Self {
        Self {
            title: pr.title.clone(),
            description: pr.body.clone(),
            author: pr.author.clone(),
            base_ref: pr.base_ref.clone(),
            head_ref: pr.head_ref.clone(),
            files: pr.files.clone(),
        }
    }

    /// Context for a local diff with no PR behind it.
    pub fn local(title: impl Into<String>, files: Vec<ChangedFile>) -> Self {
        Self {
            title: title.into(),
            files,
            ..Default::default()
        }
    }

    fn render(&self, out: &mut String) {
        let _ = writeln!(out, "## Pull request\nTitle: {}", self.title);
        if !self.author.is_empty() {
            let _ = writeln!(out, "Author: {}", self.author);
        }
        if !self.base_ref.is_empty() {
            let _ = writeln!(out, "Branch: {} -> {}", self.head_ref, self.base_ref);
        }
        let description = self.description.trim();
        if !description.is_empty() {
            let _ = writeln!(
                out,
                "\nDescription:\n{}",
                truncate(description, MAX_DESCRIPTION_CHARS)
            );
        }
        if !self.files.is_empty() {
            let _ = writeln!(out, "\nChanged files:");
            for file in &self.files {
                let _ = writeln!(
                    out,
                    "- {} ({}, +{} -{})",
                    file.path, file.status, file.additions, file.deletions
                );
            }
        }
        out.push('\n');
    }
}

fn push_diff(out: &mut String, diff: &str) {
    let _ = writeln!(
        out,
        "## Diff\n```diff\n{}\n```\n",
        truncate_middle(diff.trim_end(), MAX_DIFF_CHARS)
    );
}

pub fn reviewer_prompt(spec: &ReviewerSpec, instructions: &str, diff: &str, pr: &PrContext) -> String {
    let mut out = String::with_capacity(diff.len() + 4096);
    let _ = writeln!(out, "{}\n", instructions.trim());
    if let Some(focus) = spec.focus.as_deref().filter(|f| !f.trim().is_empty()) {
        let _ = writeln!(out, "Focus area for this review: {}\n", focus.trim());
    }
    pr.render(&mut out);
    push_diff(&mut out, diff);
    out.push_str(REVIEWER_OUTPUT_FORMAT);
    out
}

pub fn verifier_prompt(
    outputs: &[ReviewerOutput],
    comments: &[IdentifiedComment],
    diff: &str,
    pr: &PrContext,
    diagrams: bool,
) -> String {
    let mut out = String::with_capacity(diff.len() + 8192);
    let _ = writeln!(out, "{}\n", VERIFIER_INSTRUCTIONS);
    if diagrams {
        let _ = writeln!(out, "{}\n", DIAGRAM_INSTRUCTIONS);
    }
    pr.render(&mut out);

    out.push_str("## Reviewer overviews\n");
    for output in outputs {
        match (&output.review, &output.error) {
            (Some(review), _) => {
                let _ = writeln!(out, "### {}\n{}\n", output.name, review.overview.trim());
            }
            (None, error) => {
                let _ = writeln!(
                    out,
                    "### {} (failed: {})\n",
                    output.name,
                    error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }

    out.push_str("## Findings\n");
    if comments.is_empty() {
        out.push_str("(none)\n");
    }
    for c in comments {
        let reviewers: Vec<&str> = c.reviewers().collect();
        let _ = writeln!(
            out,
            "[{}] {} {} ({}) from {}\n{}\n",
            c.id,
            c.comment.severity,
            c.comment.location(),
            c.comment.side.as_str(),
            reviewers.join(", "),
            c.comment.body.trim()
        );
    }
    out.push('\n');

    push_diff(&mut out, diff);
    out.push_str(VERIFIER_OUTPUT_FORMAT);
    out
}

/// One open comment with the code it now points at.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionItem<'a> {
    pub comment: &'a OldComment,
    /// `None` when the file no longer exists at the head commit.
    pub code: Option<&'a str>,
}

pub fn resolution_prompt(items: &[ResolutionItem<'_>], commit_messages: &[String]) -> String {
    let mut out = String::with_capacity(4096);
    let _ = writeln!(out, "{}\n", RESOLUTION_INSTRUCTIONS);

    out.push_str("## Commits since the review\n");
    if commit_messages.is_empty() {
        out.push_str("(no commit messages available)\n");
    }
    for message in commit_messages {
        let first_line = message.lines().next().unwrap_or_default();
        let _ = writeln!(out, "- {}", first_line);
    }
    out.push('\n');

    out.push_str("## Comments\n");
    for item in items {
        let c = item.comment;
        let _ = writeln!(
            out,
            "### id: {}\nLocation: {}:{}\nComment:\n{}\n",
            c.id,
            c.path,
            c.line,
            c.body.trim()
        );
        match item.code {
            Some(code) => {
                let _ = writeln!(out, "Current code:\n```\n{}\n```\n", code);
            }
            None => out.push_str("Current code: (file deleted)\n\n"),
        }
    }
    out
}

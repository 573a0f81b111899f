//! Rendering of the final review: inline comment bodies, the overview, and
//! the marker tokens that let later runs find what earlier runs posted.

use super::types::{
    IdentifiedComment, OldComment, ResolutionResult, ResolutionStatus, ReviewerOutput, SynthesisMode,
    SynthesizedReview,
};
use crate::diff::Unmapped;
use crate::protocol::{
    ExistingComment, ExistingReview, ExistingReviewBody, InlineComment, ReviewEvent, ReviewSubmission,
};
use std::fmt::Write;

/// Embedded in the review body; identifies the review this tool owns.
///
/// Bodies written for a PR head carry the sha as well, see [`review_marker`].
pub const REVIEW_MARKER: &str = "<!-- pr-panel:review -->";
const REVIEW_MARKER_OPEN: &str = "<!-- pr-panel:review ";
/// Embedded in every inline comment this tool posts.
pub const COMMENT_MARKER: &str = "<!-- pr-panel:comment -->";
/// Embedded in replies that close out a fixed comment.
pub const RESOLVED_MARKER: &str = "<!-- pr-panel:resolved -->";

/// Review marker recording the head commit the body was written for.
pub fn review_marker(head_sha: Option<&str>) -> String {
    match head_sha.map(str::trim).filter(|sha| !sha.is_empty()) {
        Some(sha) => format!("{}sha={} -->", REVIEW_MARKER_OPEN, sha),
        None => REVIEW_MARKER.to_string(),
    }
}

pub fn is_review_body(body: &str) -> bool {
    body.contains(REVIEW_MARKER_OPEN)
}

/// Head sha recorded in a review body's marker, if any.
pub fn reviewed_sha(body: &str) -> Option<&str> {
    let start = body.find(REVIEW_MARKER_OPEN)? + REVIEW_MARKER_OPEN.len();
    let rest = &body[start..];
    let inner = &rest[..rest.find("-->")?];
    inner
        .split_whitespace()
        .find_map(|field| field.strip_prefix("sha="))
        .filter(|sha| !sha.is_empty())
}

/// The most recent review carrying the review marker, with its comments.
///
/// Updates rewrite only the body, so GitHub's `commit_id` keeps pointing at
/// the commit the review was created on. The marker's sha wins over it.
pub fn locate_review(reviews: &[ExistingReviewBody], comments: &[ExistingComment]) -> Option<ExistingReview> {
    let review = reviews.iter().rev().find(|r| is_review_body(&r.body))?;
    Some(ExistingReview {
        id: review.id,
        comment_ids: comments
            .iter()
            .filter(|c| c.review_id == Some(review.id))
            .map(|c| c.id)
            .collect(),
        reviewed_sha: reviewed_sha(&review.body)
            .map(str::to_string)
            .or_else(|| review.commit_id.clone()),
    })
}

pub fn is_bot_comment(body: &str) -> bool {
    body.contains(COMMENT_MARKER)
}

pub fn is_resolved_reply(body: &str) -> bool {
    body.contains(RESOLVED_MARKER)
}

/// Comment text with marker tokens removed.
pub fn strip_markers(body: &str) -> String {
    let mut text = [COMMENT_MARKER, RESOLVED_MARKER]
        .iter()
        .fold(body.to_string(), |acc, marker| acc.replace(marker, ""));
    while let Some(start) = text.find(REVIEW_MARKER_OPEN) {
        let end = text[start..]
            .find("-->")
            .map_or(text.len(), |i| start + i + "-->".len());
        text.replace_range(start..end, "");
    }
    text.trim().to_string()
}

fn attribution(comment: &IdentifiedComment) -> String {
    comment
        .reviewers()
        .map(|r| format!("`{}`", r))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Body for an inline comment: severity badge, reviewers, text, marker.
pub fn comment_body(comment: &IdentifiedComment) -> String {
    format!(
        "{} · {}\n\n{}\n\n{}",
        comment.comment.severity.badge(),
        attribution(comment),
        comment.comment.body.trim(),
        COMMENT_MARKER
    )
}

pub fn to_inline(comment: &IdentifiedComment) -> InlineComment {
    let c = &comment.comment;
    let start_side = c.start_side.unwrap_or(c.side);
    // Line order only means something when both ends are on one side
    let start_line = c
        .start_line
        .filter(|start| start_side != c.side || *start < c.line);
    InlineComment {
        path: c.path.clone(),
        line: c.line,
        side: c.side.as_str().to_string(),
        start_line,
        start_side: start_line.map(|_| start_side.as_str().to_string()),
        body: comment_body(comment),
    }
}

pub fn review_event(passed: bool, request_changes: bool) -> ReviewEvent {
    if request_changes && !passed {
        ReviewEvent::RequestChanges
    } else {
        ReviewEvent::Comment
    }
}

/// Reply posted under an old comment. `None` for comments still open.
///
/// Only a full fix carries the resolved marker, so partially fixed comments
/// are checked again on the next push.
pub fn resolution_reply(result: &ResolutionResult) -> Option<String> {
    match result.status {
        ResolutionStatus::Fixed => Some(format!(
            "{}: {}\n\n{}",
            result.status.label(),
            result.reason,
            RESOLVED_MARKER
        )),
        ResolutionStatus::PartiallyFixed => {
            Some(format!("{}: {}", result.status.label(), result.reason))
        }
        ResolutionStatus::NotFixed => None,
    }
}

/// Everything the overview is rendered from.
pub struct OverviewParts<'a> {
    pub review: &'a SynthesizedReview,
    pub outputs: &'a [ReviewerOutput],
    pub unmapped: &'a [Unmapped<IdentifiedComment>],
    pub old_comments: &'a [OldComment],
    pub resolutions: &'a [ResolutionResult],
    /// PR head the review covers; `None` for local reviews.
    pub head_sha: Option<&'a str>,
}

fn status_line(review: &SynthesizedReview) -> &'static str {
    if review.summary.successful_reviewers == 0 {
        "⚠️ **Review degraded**: no reviewer completed, so nothing was actually checked."
    } else if review.passed {
        "✅ **Passed**"
    } else {
        "❌ **Needs attention**"
    }
}

fn plural(n: usize, one: &str, many: &str) -> String {
    format!("{} {}", n, if n == 1 { one } else { many })
}

pub fn render_overview(parts: &OverviewParts<'_>) -> String {
    let review = parts.review;
    let summary = &review.summary;
    let mut out = String::new();

    let _ = writeln!(out, "## PR review\n\n{}\n", status_line(review));
    if review.mode == SynthesisMode::Basic {
        if let Some(reason) = &review.fallback_reason {
            let _ = writeln!(
                out,
                "> ⚠️ Verifier unavailable ({}). Showing unverified reviewer findings.\n",
                reason
            );
        }
    }
    let _ = writeln!(
        out,
        "**Summary:** {}/{} reviewers succeeded · {} · {} · {}\n",
        summary.successful_reviewers,
        summary.total_reviewers,
        plural(summary.critical_issues, "critical issue", "critical issues"),
        plural(summary.warnings, "warning", "warnings"),
        plural(summary.infos, "info", "infos"),
    );

    let failed: Vec<&ReviewerOutput> = parts.outputs.iter().filter(|o| !o.success).collect();
    if !failed.is_empty() {
        out.push_str("**Reviewer failures**\n");
        for output in failed {
            let _ = writeln!(
                out,
                "- `{}`: {}",
                output.name,
                output.error.as_deref().unwrap_or("unknown error")
            );
        }
        out.push('\n');
    }

    let narrative = review.overview.trim();
    if !narrative.is_empty() {
        let _ = writeln!(out, "{}\n", narrative);
    }

    if !parts.unmapped.is_empty() {
        out.push_str("### Findings outside the diff\n\n");
        for entry in parts.unmapped {
            let c = &entry.item;
            let _ = writeln!(
                out,
                "- {} `{}` from {}: {}\n  <sub>{}</sub>",
                c.comment.severity.badge(),
                c.comment.location(),
                attribution(c),
                c.comment.body.trim().replace('\n', "\n  "),
                entry.reason
            );
        }
        out.push('\n');
    }

    if !parts.resolutions.is_empty() {
        out.push_str("### Previously raised\n\n");
        for result in parts.resolutions {
            let location = parts
                .old_comments
                .iter()
                .find(|c| c.id == result.comment_id)
                .map(|c| format!("{}:{}", c.path, c.line))
                .unwrap_or_else(|| result.comment_id.clone());
            let _ = writeln!(
                out,
                "- {} `{}`: {}",
                result.status.label(),
                location,
                result.reason
            );
        }
        out.push('\n');
    }

    out.push_str(&review_marker(parts.head_sha));
    out
}

/// Plain markdown rendering for dry runs and local reviews.
pub fn render_report(submission: &ReviewSubmission) -> String {
    let mut out = strip_markers(&submission.overview);
    if !submission.comments.is_empty() {
        out.push_str("\n\n## Inline comments\n");
        for c in &submission.comments {
            let location = match c.start_line {
                Some(start) => format!("{}:{}-{}", c.path, start, c.line),
                None => format!("{}:{}", c.path, c.line),
            };
            let _ = write!(
                out,
                "\n#### `{}` ({})\n\n{}\n",
                location,
                c.side,
                strip_markers(&c.body)
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::types::{Comment, ParsedReview, ReviewSummary, Severity, Side};

    fn identified(line: u32, start_line: Option<u32>, severity: Severity) -> IdentifiedComment {
        IdentifiedComment {
            id: "C1".to_string(),
            reviewer: "security".to_string(),
            also_raised_by: vec!["style".to_string()],
            comment: Comment {
                path: "src/auth.ts".to_string(),
                line,
                start_line,
                side: Side::Right,
                start_side: None,
                body: "Token compared with ==".to_string(),
                severity,
            },
        }
    }

    fn synthesized(comments: Vec<IdentifiedComment>, outputs: &[ReviewerOutput]) -> SynthesizedReview {
        let successful = outputs.iter().filter(|o| o.success).count();
        SynthesizedReview {
            overview: "Adds login.".to_string(),
            summary: ReviewSummary::tally(outputs.len(), successful, &comments),
            passed: successful > 0,
            comments,
            mode: SynthesisMode::Verified,
            fallback_reason: None,
        }
    }

    #[test]
    fn test_inline_comment_carries_marker_and_badge() {
        let inline = to_inline(&identified(13, Some(11), Severity::Critical));
        assert_eq!(inline.line, 13);
        assert_eq!(inline.start_line, Some(11));
        assert_eq!(inline.start_side.as_deref(), Some("RIGHT"));
        assert_eq!(inline.side, "RIGHT");
        assert!(inline.body.starts_with("🔴 **Critical** · `security`, `style`"));
        assert!(is_bot_comment(&inline.body));

        let single = to_inline(&identified(13, None, Severity::Info));
        assert_eq!(single.start_line, None);
        assert_eq!(single.start_side, None);
    }

    #[test]
    fn test_event_selection() {
        assert_eq!(review_event(false, false), ReviewEvent::Comment);
        assert_eq!(review_event(true, true), ReviewEvent::Comment);
        assert_eq!(review_event(false, true), ReviewEvent::RequestChanges);
    }

    #[test]
    fn test_resolution_replies() {
        let mut result = ResolutionResult {
            comment_id: "7".to_string(),
            status: ResolutionStatus::Fixed,
            reason: "guard added".to_string(),
        };
        let reply = resolution_reply(&result).unwrap();
        assert!(is_resolved_reply(&reply));
        assert!(reply.contains("guard added"));

        result.status = ResolutionStatus::PartiallyFixed;
        assert!(!is_resolved_reply(&resolution_reply(&result).unwrap()));

        result.status = ResolutionStatus::NotFixed;
        assert!(resolution_reply(&result).is_none());
    }

    #[test]
    fn test_overview_sections() {
        let outputs = vec![
            ReviewerOutput::succeeded("security", ParsedReview::default(), 1),
            ReviewerOutput::failed("perf", "reviewer perf timed out after 180s", 1),
        ];
        let unmapped = vec![Unmapped {
            item: identified(100, None, Severity::Warning),
            reason: "line 100 not found in diff (RIGHT side of src/auth.ts)".to_string(),
        }];
        let old = vec![OldComment {
            id: "55".to_string(),
            path: "f.ts".to_string(),
            line: 5,
            body: "null".to_string(),
        }];
        let resolutions = vec![ResolutionResult {
            comment_id: "55".to_string(),
            status: ResolutionStatus::Fixed,
            reason: "checked".to_string(),
        }];
        let review = synthesized(vec![unmapped[0].item.clone()], &outputs);
        let overview = render_overview(&OverviewParts {
            review: &review,
            outputs: &outputs,
            unmapped: &unmapped,
            old_comments: &old,
            resolutions: &resolutions,
            head_sha: Some("abc123"),
        });

        assert!(overview.contains("✅ **Passed**"));
        assert!(overview.contains("1/2 reviewers succeeded"));
        assert!(overview.contains("1 warning"));
        assert!(overview.contains("- `perf`: reviewer perf timed out after 180s"));
        assert!(overview.contains("Adds login."));
        assert!(overview.contains("### Findings outside the diff"));
        assert!(overview.contains("`src/auth.ts:100`"));
        assert!(overview.contains("not found in diff"));
        assert!(overview.contains("✅ Fixed `f.ts:5`: checked"));
        assert!(is_review_body(&overview));
        assert_eq!(reviewed_sha(&overview), Some("abc123"));
    }

    #[test]
    fn test_degraded_banner_when_nothing_ran() {
        let outputs = vec![ReviewerOutput::failed("a", "boom", 1)];
        let mut review = synthesized(Vec::new(), &outputs);
        review.mode = SynthesisMode::Basic;
        review.fallback_reason = Some("no reviewer succeeded".to_string());
        let overview = render_overview(&OverviewParts {
            review: &review,
            outputs: &outputs,
            unmapped: &[],
            old_comments: &[],
            resolutions: &[],
            head_sha: None,
        });
        assert!(overview.contains("Review degraded"));
        assert!(!overview.contains("Passed"));
        assert!(overview.contains("Verifier unavailable (no reviewer succeeded)"));
        assert!(overview.ends_with(REVIEW_MARKER));
        assert_eq!(reviewed_sha(&overview), None);
    }

    #[test]
    fn test_report_strips_markers() {
        let submission = ReviewSubmission {
            overview: format!("Body\n\n{}", review_marker(Some("abc123"))),
            comments: vec![to_inline(&identified(12, None, Severity::Warning))],
            event: ReviewEvent::Comment,
        };
        let report = render_report(&submission);
        assert!(!report.contains("<!--"));
        assert!(report.contains("#### `src/auth.ts:12` (RIGHT)"));
        assert!(report.starts_with("Body"));
    }

    #[test]
    fn test_cross_side_range_keeps_start_line() {
        let mut c = identified(12, Some(14), Severity::Warning);
        c.comment.start_side = Some(Side::Left);
        let inline = to_inline(&c);
        assert_eq!(inline.start_line, Some(14));
        assert_eq!(inline.start_side.as_deref(), Some("LEFT"));
        assert_eq!(inline.side, "RIGHT");

        // Same side, start after end: posted as a single line
        let inverted = to_inline(&identified(12, Some(14), Severity::Warning));
        assert_eq!(inverted.start_line, None);
        assert_eq!(inverted.start_side, None);
    }

    #[test]
    fn test_marker_sha_round_trips_through_body() {
        let body = format!("## PR review\n\n{}", review_marker(Some("deadbeef")));
        assert!(is_review_body(&body));
        assert_eq!(reviewed_sha(&body), Some("deadbeef"));
        assert_eq!(strip_markers(&body), "## PR review");

        assert!(is_review_body(REVIEW_MARKER));
        assert_eq!(reviewed_sha(REVIEW_MARKER), None);
        assert_eq!(review_marker(Some("  ")), REVIEW_MARKER);
        assert!(!is_review_body(COMMENT_MARKER));
    }

    #[test]
    fn test_locate_review_prefers_marker_sha() {
        let reviews = vec![
            ExistingReviewBody {
                id: 1,
                body: format!("first {}", REVIEW_MARKER),
                commit_id: Some("c1".to_string()),
            },
            ExistingReviewBody {
                id: 2,
                body: "human review".to_string(),
                commit_id: Some("c2".to_string()),
            },
            ExistingReviewBody {
                id: 3,
                body: format!("updated {}", review_marker(Some("c9"))),
                commit_id: Some("c3".to_string()),
            },
        ];
        let comment = |id, review_id| ExistingComment {
            id,
            path: "a.rs".to_string(),
            line: Some(1),
            original_line: Some(1),
            body: COMMENT_MARKER.to_string(),
            in_reply_to: None,
            review_id: Some(review_id),
        };
        let comments = vec![comment(10, 3), comment(11, 1), comment(12, 3)];

        let found = locate_review(&reviews, &comments).unwrap();
        assert_eq!(found.id, 3);
        assert_eq!(found.comment_ids, [10, 12]);
        assert_eq!(found.reviewed_sha.as_deref(), Some("c9"));

        let legacy = locate_review(&reviews[..2], &comments).unwrap();
        assert_eq!(legacy.reviewed_sha.as_deref(), Some("c1"));
        assert!(locate_review(&reviews[1..2], &comments).is_none());
    }
}

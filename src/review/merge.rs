use super::types::{Comment, IdentifiedComment, ReviewerOutput, Severity};
use crate::diff::normalize_path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    pub min_severity: Severity,
    /// Fold findings several reviewers raised into one comment.
    pub collapse_duplicates: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            min_severity: Severity::Warning,
            collapse_duplicates: true,
        }
    }
}

fn ranges_overlap(a: (u32, u32), b: (u32, u32)) -> bool {
    a.0 <= b.1 && b.0 <= a.1
}

/// Same normalized path and side, overlapping line ranges, identical severity.
///
/// Comments without a line never collapse; each is a separate narrative note.
pub fn is_duplicate(a: &Comment, b: &Comment) -> bool {
    a.line != 0
        && b.line != 0
        && a.side == b.side
        && a.severity == b.severity
        && normalize_path(&a.path) == normalize_path(&b.path)
        && ranges_overlap(a.range(), b.range())
}

/// Combine comments from successful reviewers and give each a run-scoped id.
///
/// Order is reviewer order, then each reviewer's own order, and ids are
/// assigned from it (`C1`, `C2`, ...) after filtering and collapsing, so the
/// same outputs always yield the same ids.
pub fn merge(outputs: &[ReviewerOutput], options: MergeOptions) -> Vec<IdentifiedComment> {
    let mut merged: Vec<(String, Vec<String>, Comment)> = Vec::new();
    let mut below_threshold = 0usize;

    for output in outputs.iter().filter(|o| o.success) {
        let Some(review) = &output.review else {
            continue;
        };
        for comment in &review.comments {
            if !comment.severity.meets(options.min_severity) {
                below_threshold += 1;
                continue;
            }

            let existing = if options.collapse_duplicates {
                merged
                    .iter_mut()
                    .find(|(owner, also, kept)| {
                        *owner != output.name && !also.contains(&output.name) && is_duplicate(kept, comment)
                    })
            } else {
                None
            };

            match existing {
                Some((_, also, kept)) => {
                    also.push(output.name.clone());
                    if kept.body.trim() != comment.body.trim() {
                        kept.body = format!(
                            "{}\n\n_Also raised by {}:_ {}",
                            kept.body.trim_end(),
                            output.name,
                            comment.body.trim()
                        );
                    }
                    debug!(
                        reviewer = %output.name,
                        location = %comment.location(),
                        "collapsed duplicate finding"
                    );
                }
                None => merged.push((output.name.clone(), Vec::new(), comment.clone())),
            }
        }
    }

    if below_threshold > 0 {
        debug!(
            dropped = below_threshold,
            threshold = %options.min_severity,
            "filtered comments below severity threshold"
        );
    }

    merged
        .into_iter()
        .enumerate()
        .map(|(i, (reviewer, also_raised_by, comment))| IdentifiedComment {
            id: format!("C{}", i + 1),
            reviewer,
            also_raised_by,
            comment,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::types::{ParsedReview, Side};

    fn comment(path: &str, line: u32, severity: Severity, body: &str) -> Comment {
        Comment {
            path: path.to_string(),
            line,
            start_line: None,
            side: Side::Right,
            start_side: None,
            body: body.to_string(),
            severity,
        }
    }

    fn output(name: &str, comments: Vec<Comment>) -> ReviewerOutput {
        ReviewerOutput::succeeded(
            name,
            ParsedReview {
                overview: String::new(),
                comments,
            },
            1,
        )
    }

    fn keep_all() -> MergeOptions {
        MergeOptions {
            min_severity: Severity::Info,
            collapse_duplicates: false,
        }
    }

    #[test]
    fn test_ids_follow_reviewer_then_comment_order() {
        let outputs = vec![
            output("a", vec![comment("x.rs", 1, Severity::Info, "a1"), comment("x.rs", 9, Severity::Warning, "a2")]),
            ReviewerOutput::failed("b", "boom", 1),
            output("c", vec![comment("y.rs", 3, Severity::Critical, "c1")]),
        ];
        let merged = merge(&outputs, keep_all());
        let ids: Vec<(&str, &str)> = merged
            .iter()
            .map(|c| (c.id.as_str(), c.comment.body.as_str()))
            .collect();
        assert_eq!(ids, [("C1", "a1"), ("C2", "a2"), ("C3", "c1")]);
        assert_eq!(merged[2].reviewer, "c");
        assert_eq!(merge(&outputs, keep_all()), merged);
    }

    #[test]
    fn test_severity_threshold() {
        let outputs = vec![output(
            "a",
            vec![
                comment("x.rs", 1, Severity::Info, "i"),
                comment("x.rs", 2, Severity::Warning, "w"),
                comment("x.rs", 3, Severity::Critical, "c"),
            ],
        )];
        let options = MergeOptions {
            min_severity: Severity::Warning,
            collapse_duplicates: false,
        };
        let merged = merge(&outputs, options);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, "C1");
        assert_eq!(merged[0].comment.body, "w");

        let critical_only = MergeOptions {
            min_severity: Severity::Critical,
            ..options
        };
        assert_eq!(merge(&outputs, critical_only).len(), 1);
    }

    #[test]
    fn test_collapse_keeps_attribution() {
        let mut ranged = comment("./src/a.rs", 12, Severity::Warning, "range issue");
        ranged.start_line = Some(10);
        let outputs = vec![
            output("security", vec![comment("src/a.rs", 11, Severity::Warning, "first")]),
            output("style", vec![ranged, comment("src/a.rs", 11, Severity::Critical, "louder")]),
        ];
        let merged = merge(&outputs, MergeOptions { min_severity: Severity::Info, collapse_duplicates: true });

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].reviewer, "security");
        assert_eq!(merged[0].also_raised_by, ["style"]);
        assert!(merged[0].comment.body.contains("first"));
        assert!(merged[0].comment.body.contains("_Also raised by style:_ range issue"));
        // Different severity is never folded away
        assert_eq!(merged[1].comment.severity, Severity::Critical);
        assert_eq!(merged[1].id, "C2");
    }

    #[test]
    fn test_same_reviewer_findings_never_collapse() {
        let outputs = vec![output(
            "a",
            vec![comment("x.rs", 5, Severity::Warning, "one"), comment("x.rs", 5, Severity::Warning, "two")],
        )];
        assert_eq!(merge(&outputs, MergeOptions::default()).len(), 2);
    }

    #[test]
    fn test_second_reviewer_folds_into_an_entry_once() {
        let outputs = vec![
            output("security", vec![comment("x.rs", 5, Severity::Warning, "unchecked input")]),
            output(
                "style",
                vec![
                    comment("x.rs", 5, Severity::Warning, "naming"),
                    comment("x.rs", 5, Severity::Warning, "missing docs"),
                ],
            ),
        ];
        let merged = merge(&outputs, MergeOptions::default());

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].also_raised_by, ["style"]);
        assert!(merged[0].comment.body.contains("naming"));
        assert!(!merged[0].comment.body.contains("missing docs"));
        assert_eq!(merged[1].reviewer, "style");
        assert_eq!(merged[1].comment.body, "missing docs");
    }

    #[test]
    fn test_duplicate_rule() {
        let a = comment("x.rs", 5, Severity::Warning, "");
        let mut b = comment("b/x.rs", 5, Severity::Warning, "");
        assert!(is_duplicate(&a, &b));
        b.side = Side::Left;
        assert!(!is_duplicate(&a, &b));
        let lineless = comment("x.rs", 0, Severity::Warning, "");
        assert!(!is_duplicate(&lineless, &lineless));
    }
}

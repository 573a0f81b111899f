//! Verification and synthesis of the merged findings.
//!
//! The verifier sees every reviewer's overview and the full id-tagged comment
//! list and answers with `{overview, passed?, validCommentIds?}`. Any failure
//! along the way (disabled, transport error, timeout, unparseable answer)
//! falls back to basic synthesis, which keeps every merged comment.

use super::parse::{parse_verifier_response, VerifierVerdict};
use super::prompts::{verifier_prompt, PrContext};
use super::types::{
    IdentifiedComment, ReviewSummary, ReviewerOutput, SynthesisMode, SynthesizedReview,
};
use crate::config::VerifierSettings;
use crate::error::ReviewError;
use crate::protocol::{ModelClient, PromptOptions};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Deterministic synthesis: every successful reviewer's overview verbatim,
/// every merged comment kept.
pub fn basic_synthesis(
    outputs: &[ReviewerOutput],
    comments: Vec<IdentifiedComment>,
    fallback_reason: Option<String>,
) -> SynthesizedReview {
    let successful: Vec<&ReviewerOutput> = outputs.iter().filter(|o| o.success).collect();

    let overview = successful
        .iter()
        .filter_map(|o| {
            let text = o.review.as_ref()?.overview.trim();
            (!text.is_empty()).then(|| format!("### {}\n\n{}", o.name, text))
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let summary = ReviewSummary::tally(outputs.len(), successful.len(), &comments);
    SynthesizedReview {
        overview,
        passed: summary.successful_reviewers > 0 && summary.critical_issues == 0,
        comments,
        summary,
        mode: SynthesisMode::Basic,
        fallback_reason,
    }
}

/// Apply a verifier verdict to the merged comments.
fn apply_verdict(
    outputs: &[ReviewerOutput],
    mut comments: Vec<IdentifiedComment>,
    verdict: VerifierVerdict,
) -> SynthesizedReview {
    match verdict.valid_comment_ids.as_deref() {
        Some(ids) if !ids.is_empty() => {
            let keep: HashSet<&str> = ids.iter().map(String::as_str).collect();
            let known: HashSet<&str> = comments.iter().map(|c| c.id.as_str()).collect();
            let unknown: Vec<&str> = keep.iter().copied().filter(|id| !known.contains(id)).collect();
            if !unknown.is_empty() {
                debug!(ids = ?unknown, "verifier named unknown comment ids");
            }
            let before = comments.len();
            comments.retain(|c| keep.contains(c.id.as_str()));
            info!(kept = comments.len(), dropped = before - comments.len(), "verifier filtered comments");
        }
        _ => {
            warn!(
                comments = comments.len(),
                "verifier returned no validCommentIds, keeping every merged comment"
            );
        }
    }

    let successful = outputs.iter().filter(|o| o.success).count();
    let summary = ReviewSummary::tally(outputs.len(), successful, &comments);
    let passed = successful > 0 && verdict.passed.unwrap_or(summary.critical_issues == 0);

    SynthesizedReview {
        overview: verdict.overview.trim().to_string(),
        comments,
        summary,
        passed,
        mode: SynthesisMode::Verified,
        fallback_reason: None,
    }
}

/// Run the verifier over the merged comments, falling back to basic synthesis.
pub async fn verify_and_synthesize(
    model: &dyn ModelClient,
    outputs: &[ReviewerOutput],
    comments: Vec<IdentifiedComment>,
    settings: &VerifierSettings,
    diff: &str,
    pr: &PrContext,
) -> SynthesizedReview {
    if !settings.enabled {
        debug!("verifier disabled, using basic synthesis");
        return basic_synthesis(outputs, comments, None);
    }
    if !outputs.iter().any(|o| o.success) {
        warn!("no reviewer succeeded, skipping verifier");
        return basic_synthesis(outputs, comments, Some("no reviewer succeeded".to_string()));
    }

    let prompt = verifier_prompt(outputs, &comments, diff, pr, settings.diagrams);
    let options = PromptOptions::new(settings.model.as_deref(), settings.temperature);
    let started = Instant::now();

    let response = match tokio::time::timeout(settings.timeout(), model.prompt(&prompt, &options)).await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            let reason = format!("verifier failed: {:#}", err);
            warn!(error = %reason, "falling back to basic synthesis");
            return basic_synthesis(outputs, comments, Some(reason));
        }
        Err(_) => {
            let reason = ReviewError::timeout("verifier", settings.timeout_secs).to_string();
            warn!(error = %reason, "falling back to basic synthesis");
            return basic_synthesis(outputs, comments, Some(reason));
        }
    };

    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match parse_verifier_response(&response.response) {
        Some(verdict) => {
            info!(duration_ms, passed = ?verdict.passed, "verifier answered");
            apply_verdict(outputs, comments, verdict)
        }
        None => {
            let reason = ReviewError::parse("verifier", "no overview found").to_string();
            warn!(duration_ms, error = %reason, "falling back to basic synthesis");
            basic_synthesis(outputs, comments, Some(reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ModelResponse;
    use crate::review::types::{Comment, ParsedReview, Severity, Side};
    use futures::future::BoxFuture;
    use std::time::Duration;

    struct FixedModel {
        reply: Result<&'static str, &'static str>,
        delay: Duration,
    }

    impl ModelClient for FixedModel {
        fn prompt<'a>(
            &'a self,
            _text: &'a str,
            _options: &'a PromptOptions,
        ) -> BoxFuture<'a, anyhow::Result<ModelResponse>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                match self.reply {
                    Ok(text) => Ok(ModelResponse {
                        response: text.to_string(),
                        model: None,
                    }),
                    Err(e) => Err(anyhow::anyhow!(e)),
                }
            })
        }
    }

    fn reply(text: &'static str) -> FixedModel {
        FixedModel {
            reply: Ok(text),
            delay: Duration::ZERO,
        }
    }

    fn identified(n: usize, severity: Severity) -> IdentifiedComment {
        IdentifiedComment {
            id: format!("C{}", n),
            reviewer: "a".to_string(),
            also_raised_by: vec![],
            comment: Comment {
                path: "x.rs".to_string(),
                line: n as u32,
                start_line: None,
                side: Side::Right,
                start_side: None,
                body: format!("finding {}", n),
                severity,
            },
        }
    }

    fn outputs() -> Vec<ReviewerOutput> {
        vec![
            ReviewerOutput::succeeded(
                "a",
                ParsedReview {
                    overview: "Reviewer A overview".to_string(),
                    comments: vec![],
                },
                1,
            ),
            ReviewerOutput::succeeded(
                "b",
                ParsedReview {
                    overview: "Reviewer B overview".to_string(),
                    comments: vec![],
                },
                1,
            ),
            ReviewerOutput::failed("c", "timed out", 1),
        ]
    }

    fn five_comments() -> Vec<IdentifiedComment> {
        (1..=5).map(|n| identified(n, Severity::Warning)).collect()
    }

    #[tokio::test]
    async fn test_valid_comment_ids_filter() {
        let model = reply("```json\n{\"overview\": \"Two real issues.\", \"validCommentIds\": [\"C1\", \"C3\", \"C9\"]}\n```");
        let review = verify_and_synthesize(
            &model,
            &outputs(),
            five_comments(),
            &VerifierSettings::default(),
            "diff",
            &PrContext::default(),
        )
        .await;
        let ids: Vec<&str> = review.comments.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["C1", "C3"]);
        assert_eq!(review.mode, SynthesisMode::Verified);
        assert_eq!(review.overview, "Two real issues.");
        assert!(review.passed);
        assert_eq!(review.summary.total_reviewers, 3);
        assert_eq!(review.summary.successful_reviewers, 2);
        assert_eq!(review.summary.warnings, 2);
    }

    #[tokio::test]
    async fn test_missing_ids_keeps_all_and_passed_defaults_from_critical() {
        let model = reply("{\"overview\": \"o\"}");
        let mut comments = five_comments();
        comments.push(identified(6, Severity::Critical));
        let review = verify_and_synthesize(
            &model,
            &outputs(),
            comments,
            &VerifierSettings::default(),
            "diff",
            &PrContext::default(),
        )
        .await;
        assert_eq!(review.comments.len(), 6);
        assert!(!review.passed);
    }

    #[tokio::test]
    async fn test_timeout_falls_back_to_basic() {
        let model = FixedModel {
            reply: Ok("{\"overview\": \"late\"}"),
            delay: Duration::from_secs(5),
        };
        let settings = VerifierSettings {
            timeout_secs: 0,
            ..VerifierSettings::default()
        };
        let review = verify_and_synthesize(
            &model,
            &outputs(),
            five_comments(),
            &settings,
            "diff",
            &PrContext::default(),
        )
        .await;
        assert_eq!(review.mode, SynthesisMode::Basic);
        assert_eq!(review.comments.len(), 5);
        assert!(review.fallback_reason.as_deref().unwrap().contains("timed out"));
        assert!(review.overview.contains("Reviewer A overview"));
        assert!(review.overview.contains("Reviewer B overview"));
    }

    #[tokio::test]
    async fn test_unparseable_and_failed_verifier_fall_back() {
        for model in [
            reply("I think it's fine"),
            FixedModel {
                reply: Err("502 bad gateway"),
                delay: Duration::ZERO,
            },
        ] {
            let review = verify_and_synthesize(
                &model,
                &outputs(),
                five_comments(),
                &VerifierSettings::default(),
                "diff",
                &PrContext::default(),
            )
            .await;
            assert_eq!(review.mode, SynthesisMode::Basic);
            assert_eq!(review.comments.len(), 5);
            assert!(review.fallback_reason.is_some());
        }
    }

    #[test]
    fn test_basic_synthesis_passed_flips_on_critical() {
        let review = basic_synthesis(&outputs(), five_comments(), None);
        assert!(review.passed);
        assert_eq!(review.overview, "### a\n\nReviewer A overview\n\n### b\n\nReviewer B overview");

        let mut comments = five_comments();
        comments.push(identified(6, Severity::Critical));
        assert!(!basic_synthesis(&outputs(), comments, None).passed);
    }

    #[test]
    fn test_no_successful_reviewer_never_passes() {
        let outputs = vec![ReviewerOutput::failed("a", "boom", 1)];
        let review = basic_synthesis(&outputs, Vec::new(), None);
        assert!(!review.passed);
        assert_eq!(review.summary.successful_reviewers, 0);
    }
}

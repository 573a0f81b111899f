//! Sequencing of one review run.
//!
//! fetch PR + diff -> resolution check -> reviewer fan-out -> merge ->
//! verify -> partition against the diff -> render -> submit.
//!
//! Only the initial PR and diff fetches (and the final submit) can fail the
//! run; every stage in between degrades instead.

use super::format::{
    is_bot_comment, is_resolved_reply, locate_review, render_overview, resolution_reply, review_event,
    strip_markers, to_inline, OverviewParts,
};
use super::merge::{merge, MergeOptions};
use super::orchestrator::{ReviewerOrchestrator, TaskBoard};
use super::prompts::PrContext;
use super::resolution::{check_resolutions, CurrentCode, MAX_RECENT_COMMITS};
use super::synthesis::verify_and_synthesize;
use super::types::{IdentifiedComment, OldComment, ResolutionResult, ReviewerOutput, SynthesizedReview};
use crate::config::{Config, ResolutionTrigger};
use crate::diff::{build_index, changed_files, Partition};
use crate::error::ReviewError;
use crate::protocol::{
    ChangedFile, ExistingReview, ModelClient, PrData, ReviewSubmission, SubmitOutcome, VcsClient,
};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Result of the review stages that do not touch the VCS.
#[derive(Debug, Clone)]
pub struct ReviewDraft {
    pub outputs: Vec<ReviewerOutput>,
    pub review: SynthesizedReview,
    pub partition: Partition<IdentifiedComment>,
}

impl ReviewDraft {
    /// Render the submission. `head_sha` is recorded in the review marker so
    /// later runs know which commit this body covers.
    pub fn submission(
        &self,
        old_comments: &[OldComment],
        resolutions: &[ResolutionResult],
        request_changes: bool,
        head_sha: Option<&str>,
    ) -> ReviewSubmission {
        let overview = render_overview(&OverviewParts {
            review: &self.review,
            outputs: &self.outputs,
            unmapped: &self.partition.unmapped,
            old_comments,
            resolutions,
            head_sha,
        });
        ReviewSubmission {
            overview,
            comments: self.partition.mapped.iter().map(to_inline).collect(),
            event: review_event(self.review.passed, request_changes),
        }
    }
}

/// Everything a PR run produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub draft: ReviewDraft,
    pub resolutions: Vec<ResolutionResult>,
    pub submission: ReviewSubmission,
    /// `None` on dry runs.
    pub outcome: Option<SubmitOutcome>,
}

/// Fan-out, merge, verify, and partition a diff.
pub async fn review_diff(
    model: &dyn ModelClient,
    config: &Config,
    diff: &str,
    pr: &PrContext,
) -> ReviewDraft {
    let board = TaskBoard::new(config.enabled_reviewers().map(|s| s.name.as_str()));
    let mut outputs = ReviewerOrchestrator::new(model)
        .with_timeout(config.model.reviewer_timeout())
        .run_all(&config.reviewers, diff, pr, &board)
        .await;
    debug!(tasks = ?board.snapshot(), "reviewer task states");

    // Reviewers echo diff headers (`b/src/x.rs`) or a rename's old name
    let index = build_index(diff);
    for review in outputs.iter_mut().filter_map(|o| o.review.as_mut()) {
        for comment in &mut review.comments {
            index.canonicalize(comment);
        }
    }

    let merged = merge(
        &outputs,
        MergeOptions {
            min_severity: config.verifier.min_severity,
            collapse_duplicates: config.verifier.collapse_duplicates,
        },
    );
    info!(comments = merged.len(), "merged reviewer comments");

    let review = verify_and_synthesize(model, &outputs, merged, &config.verifier, diff, pr).await;

    let partition = index.partition(review.comments.clone());
    for entry in &partition.unmapped {
        info!(
            id = %entry.item.id,
            location = %entry.item.comment.location(),
            reason = %entry.reason,
            "comment demoted to narrative"
        );
    }

    ReviewDraft {
        outputs,
        review,
        partition,
    }
}

/// Review a local diff with no PR behind it.
pub async fn review_local(model: &dyn ModelClient, config: &Config, diff: &str, title: &str) -> ReviewDraft {
    let files = changed_files(diff)
        .into_iter()
        .map(|(path, additions, deletions)| ChangedFile {
            path,
            status: "modified".to_string(),
            additions: u32::try_from(additions).unwrap_or(u32::MAX),
            deletions: u32::try_from(deletions).unwrap_or(u32::MAX),
        })
        .collect();
    let pr = PrContext::local(title, files);
    let run_id = Uuid::new_v4();
    review_diff(model, config, diff, &pr)
        .instrument(info_span!("review", %run_id, mode = "local"))
        .await
}

/// Inline comments this tool posted that have no resolved-marker reply.
pub fn open_comments(pr: &PrData) -> Vec<OldComment> {
    let resolved: HashSet<u64> = pr
        .comments
        .iter()
        .filter(|c| is_resolved_reply(&c.body))
        .filter_map(|c| c.in_reply_to)
        .collect();

    pr.comments
        .iter()
        .filter(|c| c.in_reply_to.is_none() && is_bot_comment(&c.body) && !resolved.contains(&c.id))
        .filter_map(|c| {
            let line = c.line.or(c.original_line)?;
            Some(OldComment {
                id: c.id.to_string(),
                path: c.path.clone(),
                line,
                body: strip_markers(&c.body),
            })
        })
        .collect()
}

/// Messages of commits pushed after `since`, oldest first.
pub fn commits_since(pr: &PrData, since: Option<&str>) -> Vec<String> {
    let start = since
        .and_then(|sha| pr.commits.iter().position(|c| c.sha == sha))
        .map_or(0, |i| i + 1);
    let messages: Vec<String> = pr.commits[start..].iter().map(|c| c.message.clone()).collect();
    let skip = messages.len().saturating_sub(MAX_RECENT_COMMITS);
    messages.into_iter().skip(skip).collect()
}

pub struct PipelineCoordinator<'a> {
    vcs: &'a dyn VcsClient,
    model: &'a dyn ModelClient,
    config: &'a Config,
}

impl<'a> PipelineCoordinator<'a> {
    pub fn new(vcs: &'a dyn VcsClient, model: &'a dyn ModelClient, config: &'a Config) -> Self {
        Self { vcs, model, config }
    }

    /// Review PR `number` and, unless `dry_run`, submit the result.
    pub async fn run_pr(&self, number: u64, dry_run: bool) -> anyhow::Result<PipelineReport> {
        let run_id = Uuid::new_v4();
        self.run_pr_inner(number, dry_run, run_id)
            .instrument(info_span!("review", %run_id, pr = number))
            .await
    }

    async fn run_pr_inner(&self, number: u64, dry_run: bool, run_id: Uuid) -> anyhow::Result<PipelineReport> {
        let pr = self
            .vcs
            .fetch_pr(number)
            .await
            .map_err(ReviewError::Transport)?;
        let diff = self
            .vcs
            .fetch_diff(number)
            .await
            .map_err(ReviewError::Transport)?;
        info!(
            title = %pr.title,
            head = %pr.head_sha,
            files = pr.files.len(),
            diff_bytes = diff.len(),
            "fetched pull request"
        );

        let existing = match self.vcs.find_existing_review(number).await {
            Ok(existing) => existing,
            Err(err) => {
                warn!(error = %format!("{:#}", err), "could not look up an earlier review, using the PR snapshot");
                locate_review(&pr.reviews, &pr.comments)
            }
        };
        if let Some(existing) = &existing {
            info!(
                review_id = existing.id,
                comments = existing.comment_ids.len(),
                reviewed = existing.reviewed_sha.as_deref().unwrap_or("unknown"),
                "found earlier review"
            );
        }

        let (old_comments, resolutions) = self.check_previous(&pr, existing.as_ref()).await;

        let context = PrContext::from_pr(&pr);
        let draft = review_diff(self.model, self.config, &diff, &context).await;
        let submission = draft.submission(
            &old_comments,
            &resolutions,
            self.config.verifier.request_changes,
            Some(pr.head_sha.as_str()),
        );

        if dry_run {
            info!("dry run, not submitting");
            return Ok(PipelineReport {
                run_id,
                draft,
                resolutions,
                submission,
                outcome: None,
            });
        }

        let outcome = self
            .vcs
            .submit_review(number, &pr.head_sha, &submission)
            .await?;
        info!(
            review_id = outcome.review_id,
            updated = outcome.is_update,
            inline = submission.comments.len(),
            url = %outcome.url,
            "review submitted"
        );

        self.post_resolution_replies(number, &resolutions).await;

        Ok(PipelineReport {
            run_id,
            draft,
            resolutions,
            submission,
            outcome: Some(outcome),
        })
    }

    /// Run the resolution check if it is enabled and triggered.
    async fn check_previous(
        &self,
        pr: &PrData,
        existing: Option<&ExistingReview>,
    ) -> (Vec<OldComment>, Vec<ResolutionResult>) {
        let settings = &self.config.resolution;
        if !settings.enabled {
            return (Vec::new(), Vec::new());
        }

        let reviewed_commit = existing.and_then(|r| r.reviewed_sha.as_deref());
        let triggered = match settings.trigger {
            ResolutionTrigger::EveryRun => true,
            ResolutionTrigger::FirstPushAfterReview => reviewed_commit != Some(pr.head_sha.as_str()),
        };
        if !triggered {
            debug!("head unchanged since last review, skipping resolution check");
            return (Vec::new(), Vec::new());
        }

        let mut old_comments = open_comments(pr);
        if old_comments.is_empty() {
            return (old_comments, Vec::new());
        }

        let paths: BTreeSet<&str> = old_comments.iter().map(|c| c.path.as_str()).collect();
        let mut code = CurrentCode::new();
        for path in paths {
            match self.vcs.fetch_file(path, &pr.head_sha).await {
                Ok(content) => {
                    code.insert(path.to_string(), content);
                }
                Err(err) => {
                    warn!(path, error = %format!("{:#}", err), "could not fetch current code, deferring its comments");
                }
            }
        }
        old_comments.retain(|c| code.contains_key(&c.path));

        let commits = commits_since(pr, reviewed_commit);
        let results = check_resolutions(self.model, &old_comments, &code, &commits, settings).await;
        (old_comments, results)
    }

    async fn post_resolution_replies(&self, number: u64, resolutions: &[ResolutionResult]) {
        for result in resolutions {
            let Some(body) = resolution_reply(result) else {
                continue;
            };
            let Ok(comment_id) = result.comment_id.parse::<u64>() else {
                warn!(comment = %result.comment_id, "resolution result has a non-numeric comment id");
                continue;
            };
            if let Err(err) = self.vcs.reply_to_comment(number, comment_id, &body).await {
                warn!(comment_id, error = %format!("{:#}", err), "failed to post resolution reply");
            }
        }
    }
}

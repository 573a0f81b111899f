//! Contracts for the external collaborators the pipeline talks to.
//!
//! The pipeline only ever sees these traits; GitHub and OpenRouter live behind
//! them in [`crate::github`] and [`crate::llm`], and tests substitute
//! in-memory fakes.

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Per-call overrides for a model prompt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

impl PromptOptions {
    pub fn new(model: Option<&str>, temperature: Option<f32>) -> Self {
        Self {
            model: model.map(str::to_string),
            temperature,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub response: String,
    /// Model id that actually served the call, when the transport reports it.
    pub model: Option<String>,
}

pub trait ModelClient: Send + Sync {
    fn prompt<'a>(
        &'a self,
        text: &'a str,
        options: &'a PromptOptions,
    ) -> BoxFuture<'a, Result<ModelResponse>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    pub status: String,
    pub additions: u32,
    pub deletions: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub author: Option<String>,
    pub committed_at: Option<DateTime<Utc>>,
}

/// An inline review comment already on the PR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingComment {
    pub id: u64,
    pub path: String,
    /// `None` when the comment is outdated and no longer maps to a line.
    pub line: Option<u32>,
    pub original_line: Option<u32>,
    pub body: String,
    pub in_reply_to: Option<u64>,
    pub review_id: Option<u64>,
}

/// A submitted review already on the PR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingReviewBody {
    pub id: u64,
    pub body: String,
    pub commit_id: Option<String>,
}

/// Snapshot of a pull request, read-only for the rest of the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrData {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub author: String,
    pub base_ref: String,
    pub head_ref: String,
    pub head_sha: String,
    pub files: Vec<ChangedFile>,
    pub commits: Vec<CommitInfo>,
    pub comments: Vec<ExistingComment>,
    pub reviews: Vec<ExistingReviewBody>,
}

/// The pipeline's own earlier review, located by its marker token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingReview {
    pub id: u64,
    pub comment_ids: Vec<u64>,
    /// Head commit the review last covered.
    pub reviewed_sha: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewEvent {
    Comment,
    RequestChanges,
}

/// One inline comment ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineComment {
    pub path: String,
    pub line: u32,
    pub side: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_side: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewSubmission {
    pub overview: String,
    pub comments: Vec<InlineComment>,
    pub event: ReviewEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub review_id: u64,
    pub url: String,
    pub is_update: bool,
}

pub trait VcsClient: Send + Sync {
    fn fetch_pr(&self, number: u64) -> BoxFuture<'_, Result<PrData>>;

    fn fetch_diff(&self, number: u64) -> BoxFuture<'_, Result<String>>;

    /// File content at `git_ref`; `None` if the file does not exist there.
    fn fetch_file<'a>(&'a self, path: &'a str, git_ref: &'a str)
        -> BoxFuture<'a, Result<Option<String>>>;

    fn find_existing_review(&self, number: u64) -> BoxFuture<'_, Result<Option<ExistingReview>>>;

    fn submit_review<'a>(
        &'a self,
        number: u64,
        commit_sha: &'a str,
        submission: &'a ReviewSubmission,
    ) -> BoxFuture<'a, Result<SubmitOutcome>>;

    fn reply_to_comment<'a>(
        &'a self,
        number: u64,
        comment_id: u64,
        body: &'a str,
    ) -> BoxFuture<'a, Result<()>>;
}

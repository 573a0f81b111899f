//! Error taxonomy for the review pipeline.
//!
//! Only [`ReviewError::Transport`] raised while fetching the PR or its diff is
//! fatal to a run. Every other variant is converted into a degraded result at
//! the stage that produced it.

use std::path::PathBuf;
use thiserror::Error;

use crate::review::orchestrator::TaskState;

#[derive(Debug, Error)]
pub enum ReviewError {
    /// Model text that could not be turned into the expected structure.
    #[error("could not parse {context} response: {detail}")]
    Parse { context: String, detail: String },

    /// A reviewer, verifier, or resolution call exceeded its time limit.
    #[error("{label} timed out after {secs}s")]
    Timeout { label: String, secs: u64 },

    /// A VCS or model call failed outright.
    #[error("transport failure: {0:#}")]
    Transport(anyhow::Error),

    /// A resolution result that names no known comment.
    #[error("resolution result for {0} did not match an open comment")]
    Mapping(String),

    #[error("task {task} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        task: String,
        from: TaskState,
        to: TaskState,
    },

    #[error("task {0} is not on the board")]
    UnknownTask(String),
}

impl ReviewError {
    pub fn parse(context: impl Into<String>, detail: impl Into<String>) -> Self {
        ReviewError::Parse {
            context: context.into(),
            detail: detail.into(),
        }
    }

    pub fn timeout(label: impl Into<String>, secs: u64) -> Self {
        ReviewError::Timeout {
            label: label.into(),
            secs,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("reviewer name '{0}' is configured more than once")]
    DuplicateReviewer(String),

    #[error("reviewer names must not be empty")]
    EmptyReviewerName,

    #[error("reviewer '{0}' has neither `prompt` nor `prompt_file`")]
    MissingPrompt(String),
}

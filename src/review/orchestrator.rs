//! Concurrent reviewer fan-out.
//!
//! Every enabled reviewer runs as its own future, raced against a timeout and
//! guarded against panics, and the batch is joined with settle-all semantics:
//! the orchestrator returns only after every reviewer has produced exactly
//! one [`ReviewerOutput`], in configuration order.
//!
//! Cancellation is best-effort. A timed-out reviewer's future is dropped, which
//! aborts the in-flight request for transports that do their work inside the
//! future (as `reqwest` does). A transport that spawns its own background work
//! may keep running after the result has been discarded.

use super::parse::parse_reviewer_response;
use super::prompts::{reviewer_prompt, PrContext};
use super::types::{ParsedReview, ReviewerOutput};
use crate::config::ReviewerSpec;
use crate::error::ReviewError;
use crate::protocol::{ModelClient, PromptOptions};
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_REVIEWER_TIMEOUT: Duration = Duration::from_secs(180);

/// Lifecycle of one reviewer task within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    /// Abandoned before finishing; timeouts end here.
    Cancelled,
}

impl TaskState {
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Cancelled) | (Running, Completed) | (Running, Failed) | (Running, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Cancelled)
    }
}

/// Per-run record of reviewer task states.
///
/// Owned by the run and passed by reference into the fan-out; nothing about
/// in-flight work is held in global state.
#[derive(Debug, Default)]
pub struct TaskBoard {
    tasks: Mutex<Vec<(String, TaskState)>>,
}

impl TaskBoard {
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            tasks: Mutex::new(
                names
                    .into_iter()
                    .map(|n| (n.to_string(), TaskState::Pending))
                    .collect(),
            ),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, TaskState)>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Move `task` to `to`, rejecting moves the transition table forbids.
    pub fn transition(&self, task: &str, to: TaskState) -> Result<(), ReviewError> {
        let mut tasks = self.lock();
        let Some(entry) = tasks.iter_mut().find(|(name, _)| name == task) else {
            return Err(ReviewError::UnknownTask(task.to_string()));
        };
        if !entry.1.can_transition_to(to) {
            return Err(ReviewError::InvalidTransition {
                task: task.to_string(),
                from: entry.1,
                to,
            });
        }
        entry.1 = to;
        Ok(())
    }

    pub fn state(&self, task: &str) -> Option<TaskState> {
        self.lock()
            .iter()
            .find(|(name, _)| name == task)
            .map(|(_, state)| *state)
    }

    pub fn snapshot(&self) -> Vec<(String, TaskState)> {
        self.lock().clone()
    }

    pub fn count(&self, state: TaskState) -> usize {
        self.lock().iter().filter(|(_, s)| *s == state).count()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "reviewer panicked".to_string()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

pub struct ReviewerOrchestrator<'a> {
    model: &'a dyn ModelClient,
    timeout: Duration,
}

impl<'a> ReviewerOrchestrator<'a> {
    pub fn new(model: &'a dyn ModelClient) -> Self {
        Self {
            model,
            timeout: DEFAULT_REVIEWER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run every enabled spec against the diff and wait for all of them.
    ///
    /// Returns one output per enabled spec, in spec order, whatever happened
    /// to the individual reviewers.
    pub async fn run_all(
        &self,
        specs: &[ReviewerSpec],
        diff: &str,
        pr: &PrContext,
        board: &TaskBoard,
    ) -> Vec<ReviewerOutput> {
        let enabled: Vec<&ReviewerSpec> = specs.iter().filter(|s| s.enabled).collect();
        info!(
            reviewers = enabled.len(),
            timeout_secs = self.timeout.as_secs(),
            "starting reviewer fan-out"
        );

        let outputs = join_all(
            enabled
                .iter()
                .map(|spec| self.run_one(spec, diff, pr, board)),
        )
        .await;

        let failed = outputs.iter().filter(|o| !o.success).count();
        info!(
            succeeded = outputs.len() - failed,
            failed, "reviewer fan-out settled"
        );
        outputs
    }

    async fn run_one(
        &self,
        spec: &ReviewerSpec,
        diff: &str,
        pr: &PrContext,
        board: &TaskBoard,
    ) -> ReviewerOutput {
        let name = spec.name.as_str();
        let started = Instant::now();
        mark(board, name, TaskState::Running);
        debug!(reviewer = %name, "reviewer started");

        let guarded = AssertUnwindSafe(self.review(spec, diff, pr)).catch_unwind();
        let outcome = tokio::time::timeout(self.timeout, guarded).await;
        let duration_ms = elapsed_ms(started);

        match outcome {
            Ok(Ok(Ok(review))) => {
                mark(board, name, TaskState::Completed);
                info!(
                    reviewer = %name,
                    duration_ms,
                    comments = review.comments.len(),
                    "reviewer finished"
                );
                ReviewerOutput::succeeded(name, review, duration_ms)
            }
            Ok(Ok(Err(err))) => {
                mark(board, name, TaskState::Failed);
                warn!(reviewer = %name, duration_ms, error = %format!("{:#}", err), "reviewer failed");
                ReviewerOutput::failed(name, format!("{:#}", err), duration_ms)
            }
            Ok(Err(payload)) => {
                mark(board, name, TaskState::Failed);
                let message = panic_message(payload);
                warn!(reviewer = %name, duration_ms, panic = %message, "reviewer panicked");
                ReviewerOutput::failed(name, format!("panicked: {}", message), duration_ms)
            }
            Err(_) => {
                mark(board, name, TaskState::Cancelled);
                let err = ReviewError::timeout(format!("reviewer {}", name), self.timeout.as_secs());
                warn!(reviewer = %name, duration_ms, "reviewer timed out");
                ReviewerOutput::failed(name, err.to_string(), duration_ms)
            }
        }
    }

    async fn review(
        &self,
        spec: &ReviewerSpec,
        diff: &str,
        pr: &PrContext,
    ) -> anyhow::Result<ParsedReview> {
        let instructions = spec.load_prompt().await?;
        let prompt = reviewer_prompt(spec, &instructions, diff, pr);
        let options = PromptOptions::new(spec.model.as_deref(), spec.temperature);
        let response = self.model.prompt(&prompt, &options).await?;
        Ok(parse_reviewer_response(&response.response))
    }
}

fn mark(board: &TaskBoard, task: &str, to: TaskState) {
    if let Err(err) = board.transition(task, to) {
        warn!(error = %err, "task board rejected transition");
    }
}

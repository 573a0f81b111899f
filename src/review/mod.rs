//! The review pipeline: reviewer fan-out, parsing, merging, verification,
//! resolution tracking, and the coordinator that sequences them.

pub mod format;
pub mod merge;
pub mod orchestrator;
pub mod parse;
pub mod pipeline;
pub mod prompts;
pub mod resolution;
pub mod synthesis;
pub mod types;

pub use pipeline::{review_diff, review_local, PipelineCoordinator, PipelineReport, ReviewDraft};
pub use types::{
    Comment, IdentifiedComment, OldComment, ResolutionResult, ResolutionStatus, ReviewerOutput, Severity,
    Side, SynthesizedReview,
};

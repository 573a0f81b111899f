//! pr-panel library crate
//!
//! Exposes the review pipeline so the CLI, integration tests and benchmarks
//! can drive it without going through CLI startup.

pub mod config;
pub mod diff;
pub mod error;
pub mod git_ops;
pub mod github;
pub mod keyring;
pub mod llm;
pub mod protocol;
pub mod review;
pub mod util;

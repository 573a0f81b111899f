//! Model access through OpenRouter.

pub mod client;
pub mod models;
pub mod retry;

pub use client::OpenRouterClient;
pub use retry::{RetryDecision, RetryPolicy};

use serde::Deserialize;

/// Reviewer and verifier calls default to this model
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4.5";

/// Model for resolution classification
pub const DEFAULT_RESOLUTION_MODEL: &str = "openai/gpt-oss-120b";

/// Maximum completion tokens when the config does not override it
pub const DEFAULT_MAX_TOKENS: u32 = 16384;

/// Token accounting attached to an OpenRouter completion
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    /// Reported as `cost` or `total_cost` depending on the upstream provider.
    #[serde(default, alias = "total_cost")]
    pub cost: Option<f64>,
}

impl Usage {
    /// Reported cost in USD; 0.0 when the provider omits it.
    pub fn cost(&self) -> f64 {
        self.cost.unwrap_or_default()
    }
}

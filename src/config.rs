//! Configuration for pr-panel
//!
//! Read from `.pr-panel.toml` in the repository root (or `--config PATH`),
//! falling back to `~/.config/pr-panel/config.toml`. Every section is optional.

use crate::error::ConfigError;
use crate::keyring;
use crate::llm::models::{DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_RESOLUTION_MODEL};
use crate::review::prompts::GENERAL_REVIEWER_PROMPT;
use crate::review::types::Severity;
use anyhow::Context;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const CONFIG_FILE_NAME: &str = ".pr-panel.toml";

fn default_true() -> bool {
    true
}

/// A configured reviewer persona.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReviewerSpec {
    pub name: String,
    #[serde(default)]
    pub prompt: Option<String>,
    /// Resolved against the config file's directory after loading.
    #[serde(default)]
    pub prompt_file: Option<PathBuf>,
    #[serde(default)]
    pub focus: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ReviewerSpec {
    /// The reviewer used when none are configured.
    pub fn general() -> Self {
        Self {
            name: "general".to_string(),
            prompt: Some(GENERAL_REVIEWER_PROMPT.to_string()),
            prompt_file: None,
            focus: None,
            model: None,
            temperature: None,
            enabled: true,
        }
    }

    /// Reviewer instructions. A `prompt_file` is read here, inside the
    /// reviewer's own task, so a missing file only fails this reviewer.
    pub async fn load_prompt(&self) -> anyhow::Result<String> {
        if let Some(prompt) = &self.prompt {
            return Ok(prompt.clone());
        }
        match &self.prompt_file {
            Some(path) => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read prompt file {}", path.display())),
            None => Err(ConfigError::MissingPrompt(self.name.clone()).into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifierSettings {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub min_severity: Severity,
    /// Ask for a Mermaid diagram in the overview.
    pub diagrams: bool,
    pub enabled: bool,
    pub timeout_secs: u64,
    /// Submit `REQUEST_CHANGES` instead of `COMMENT` when the review fails.
    pub request_changes: bool,
    pub collapse_duplicates: bool,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            model: None,
            temperature: None,
            min_severity: Severity::Warning,
            diagrams: true,
            enabled: true,
            timeout_secs: 300,
            request_changes: false,
            collapse_duplicates: true,
        }
    }
}

impl VerifierSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// When resolution checks run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionTrigger {
    /// Only when the head commit moved since the last review.
    #[default]
    FirstPushAfterReview,
    EveryRun,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolutionSettings {
    pub enabled: bool,
    pub trigger: ResolutionTrigger,
    pub model: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ResolutionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger: ResolutionTrigger::default(),
            model: Some(DEFAULT_RESOLUTION_MODEL.to_string()),
            timeout_secs: 120,
        }
    }
}

impl ResolutionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelSettings {
    /// Model used by any call that does not name its own.
    pub default: String,
    /// Chat completions URL override.
    pub api_base: Option<String>,
    pub reviewer_timeout_secs: u64,
    pub max_retries: u32,
    pub max_tokens: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            default: DEFAULT_MODEL.to_string(),
            api_base: None,
            reviewer_timeout_secs: 180,
            max_retries: 3,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl ModelSettings {
    pub fn reviewer_timeout(&self) -> Duration {
        Duration::from_secs(self.reviewer_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub reviewers: Vec<ReviewerSpec>,
    pub verifier: VerifierSettings,
    pub resolution: ResolutionSettings,
    pub model: ModelSettings,
}

impl Config {
    /// User-level config file location
    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("pr-panel").join("config.toml"))
    }

    /// Load config. An explicit path must exist; otherwise the repo file, then
    /// the user file, then built-in defaults.
    pub fn load(explicit: Option<&Path>, repo_root: &Path) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => [Some(repo_root.join(CONFIG_FILE_NAME)), Self::user_config_path()]
                .into_iter()
                .flatten()
                .find(|p| p.is_file()),
        };

        let Some(path) = path else {
            debug!("no config file found, using defaults");
            return Self::from_toml_str("", repo_root);
        };

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or(repo_root);
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), reviewers = config.reviewers.len(), "loaded config");
        config.finish(base_dir)
    }

    /// Parse config text, resolving `prompt_file` paths against `base_dir`.
    pub fn from_toml_str(content: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: base_dir.join(CONFIG_FILE_NAME),
            source,
        })?;
        config.finish(base_dir)
    }

    fn finish(mut self, base_dir: &Path) -> Result<Self, ConfigError> {
        if self.reviewers.is_empty() {
            self.reviewers.push(ReviewerSpec::general());
        }
        for reviewer in &mut self.reviewers {
            if let Some(file) = reviewer.prompt_file.as_mut() {
                if file.is_relative() {
                    *file = base_dir.join(&*file);
                }
            }
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for reviewer in &self.reviewers {
            let name = reviewer.name.trim();
            if name.is_empty() {
                return Err(ConfigError::EmptyReviewerName);
            }
            if !seen.insert(name) {
                return Err(ConfigError::DuplicateReviewer(name.to_string()));
            }
            if reviewer.prompt.is_none() && reviewer.prompt_file.is_none() {
                return Err(ConfigError::MissingPrompt(name.to_string()));
            }
        }
        if !self.reviewers.iter().any(|r| r.enabled) {
            warn!("every configured reviewer is disabled");
        }
        Ok(())
    }

    pub fn enabled_reviewers(&self) -> impl Iterator<Item = &ReviewerSpec> {
        self.reviewers.iter().filter(|r| r.enabled)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// OpenRouter API key from the environment, then the keychain.
pub fn openrouter_api_key() -> Option<String> {
    if let Some(key) = non_empty_env("OPENROUTER_API_KEY") {
        return Some(key);
    }
    match keyring::get_api_key() {
        Ok(key) => key,
        Err(err) => {
            keyring::warn_keychain_error_once("the OpenRouter API key", &err);
            None
        }
    }
}

/// GitHub token from `GITHUB_TOKEN` / `GH_TOKEN`, then the keychain.
pub fn github_token() -> Option<String> {
    if let Some(token) = non_empty_env("GITHUB_TOKEN").or_else(|| non_empty_env("GH_TOKEN")) {
        return Some(token);
    }
    match keyring::get_github_token() {
        Ok(token) => token,
        Err(err) => {
            keyring::warn_keychain_error_once("the GitHub token", &err);
            None
        }
    }
}

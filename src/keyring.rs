//! Keychain lookup for pr-panel credentials
//!
//! Both credentials live in one JSON keychain entry, so a locked keychain
//! prompts at most once per run. Environment variables always win; this
//! module is only consulted when they are unset.

use keyring::Entry;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tracing::warn;

const KEYRING_SERVICE: &str = "pr-panel-credentials";
const KEYRING_USERNAME: &str = "default";

/// All credentials stored in a single keychain entry
#[derive(Debug, Clone, Default, Deserialize)]
struct StoredCredentials {
    #[serde(default)]
    openrouter_api_key: Option<String>,
    #[serde(default)]
    github_token: Option<String>,
}

type KeyringResult<T> = Result<T, String>;

static CREDENTIALS: OnceLock<KeyringResult<StoredCredentials>> = OnceLock::new();
static KEYRING_ERROR_WARNED: AtomicBool = AtomicBool::new(false);

fn keyring_disabled() -> bool {
    if cfg!(test) {
        return true;
    }
    matches!(
        std::env::var("PR_PANEL_DISABLE_KEYRING")
            .unwrap_or_default()
            .to_lowercase()
            .as_str(),
        "1" | "true" | "yes"
    )
}

fn parse_credentials(json: &str) -> KeyringResult<StoredCredentials> {
    serde_json::from_str(json).map_err(|e| format!("Failed to parse credentials: {}", e))
}

fn read_credentials_uncached() -> KeyringResult<StoredCredentials> {
    if keyring_disabled() {
        return Ok(StoredCredentials::default());
    }
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_USERNAME).map_err(|e| e.to_string())?;
    match entry.get_password() {
        Ok(json) => parse_credentials(&json),
        Err(keyring::Error::NoEntry) => Ok(StoredCredentials::default()),
        Err(err) => Err(err.to_string()),
    }
}

fn read_credentials() -> KeyringResult<StoredCredentials> {
    CREDENTIALS.get_or_init(read_credentials_uncached).clone()
}

/// Warn about keychain errors only once per run
pub fn warn_keychain_error_once(context: &str, err: &str) {
    if KEYRING_ERROR_WARNED.swap(true, Ordering::Relaxed) {
        return;
    }
    warn!(
        "couldn't access system keychain for {}: {}. Set OPENROUTER_API_KEY and GITHUB_TOKEN to bypass it.",
        context, err
    );
}

/// OpenRouter API key stored in the keychain
pub fn get_api_key() -> KeyringResult<Option<String>> {
    Ok(read_credentials()?.openrouter_api_key)
}

/// GitHub token stored in the keychain
pub fn get_github_token() -> KeyringResult<Option<String>> {
    Ok(read_credentials()?.github_token)
}

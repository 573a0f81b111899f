//! Resolution tracking for comments raised in earlier runs.
//!
//! Only comments that are still open are ever sent here, so a comment that
//! was marked fixed on a previous run is never re-classified.

use super::parse::{parse_resolution_response, RawResolution};
use super::prompts::{resolution_prompt, ResolutionItem};
use super::types::{OldComment, ResolutionResult};
use crate::config::ResolutionSettings;
use crate::diff::normalize_path;
use crate::error::ReviewError;
use crate::protocol::{ModelClient, PromptOptions};
use crate::util::{truncate_middle, window_around_line};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Commit messages included in the prompt
pub const MAX_RECENT_COMMITS: usize = 20;

/// Lines of context either side of the original comment line
const CODE_WINDOW_RADIUS: usize = 15;

/// Fallback excerpt size when the original line is past the end of the file
const MAX_EXCERPT_CHARS: usize = 3_000;

/// Current file contents keyed by path; `None` means deleted at head.
pub type CurrentCode = HashMap<String, Option<String>>;

fn excerpt(content: &str, line: u32) -> String {
    window_around_line(content, line, CODE_WINDOW_RADIUS)
        .unwrap_or_else(|| truncate_middle(content, MAX_EXCERPT_CHARS))
}

/// Match one raw result back to exactly one known comment.
fn match_result<'a>(raw: &RawResolution, old: &'a [OldComment]) -> Result<&'a OldComment, ReviewError> {
    if let Some(id) = raw.id.as_deref() {
        let id = id.trim_start_matches('#');
        if let Some(found) = old.iter().find(|c| c.id == id) {
            return Ok(found);
        }
    }

    if let (Some(path), Some(line)) = (raw.path.as_deref(), raw.line) {
        let path = normalize_path(path);
        let mut candidates = old
            .iter()
            .filter(|c| c.line == line && normalize_path(&c.path) == path);
        if let (Some(only), None) = (candidates.next(), candidates.next()) {
            return Ok(only);
        }
    }

    let label = raw.id.clone().unwrap_or_else(|| {
        format!(
            "{}:{}",
            raw.path.as_deref().unwrap_or("?"),
            raw.line.map_or_else(|| "?".to_string(), |l| l.to_string())
        )
    });
    Err(ReviewError::Mapping(label))
}

/// Turn raw model results into results for known comments only.
///
/// Unmatched and ambiguous results are discarded, and only the first result
/// per comment counts. Output follows the order of `old`.
pub fn reconcile(old: &[OldComment], raw: Vec<RawResolution>) -> Vec<ResolutionResult> {
    let mut by_id: HashMap<&str, ResolutionResult> = HashMap::new();
    for result in raw {
        match match_result(&result, old) {
            Ok(comment) => {
                if by_id.contains_key(comment.id.as_str()) {
                    debug!(comment = %comment.id, "ignoring repeated resolution result");
                    continue;
                }
                let reason = if result.reason.trim().is_empty() {
                    "no reason given".to_string()
                } else {
                    result.reason.trim().to_string()
                };
                by_id.insert(
                    comment.id.as_str(),
                    ResolutionResult {
                        comment_id: comment.id.clone(),
                        status: result.status,
                        reason,
                    },
                );
            }
            Err(err) => debug!(error = %err, "discarding resolution result"),
        }
    }

    old.iter()
        .filter_map(|c| by_id.remove(c.id.as_str()))
        .collect()
}

/// Classify each open comment as fixed, partially fixed, or not fixed.
///
/// Returns immediately without a model call when there is nothing to check.
/// A failed or timed-out call yields no results rather than guesses.
pub async fn check_resolutions(
    model: &dyn ModelClient,
    old_comments: &[OldComment],
    current_code: &CurrentCode,
    recent_commits: &[String],
    settings: &ResolutionSettings,
) -> Vec<ResolutionResult> {
    if old_comments.is_empty() {
        debug!("no open comments, skipping resolution check");
        return Vec::new();
    }

    let excerpts: Vec<Option<String>> = old_comments
        .iter()
        .map(|c| {
            current_code
                .get(&c.path)
                .and_then(|content| content.as_deref())
                .map(|content| excerpt(content, c.line))
        })
        .collect();
    let items: Vec<ResolutionItem<'_>> = old_comments
        .iter()
        .zip(&excerpts)
        .map(|(comment, code)| ResolutionItem {
            comment,
            code: code.as_deref(),
        })
        .collect();

    let commits = &recent_commits[recent_commits.len().saturating_sub(MAX_RECENT_COMMITS)..];
    let prompt = resolution_prompt(&items, commits);
    let options = PromptOptions::new(settings.model.as_deref(), Some(0.0));

    let response = match tokio::time::timeout(settings.timeout(), model.prompt(&prompt, &options)).await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            warn!(error = %format!("{:#}", err), "resolution check failed");
            return Vec::new();
        }
        Err(_) => {
            let err = ReviewError::timeout("resolution check", settings.timeout_secs);
            warn!(error = %err, "resolution check abandoned");
            return Vec::new();
        }
    };

    let raw = parse_resolution_response(&response.response);
    let results = reconcile(old_comments, raw);

    info!(
        open = old_comments.len(),
        classified = results.len(),
        "resolution check finished"
    );
    results
}

//! Local diff sources for the `local` command
//!
//! Produces unified diff text from a working copy, in the same shape GitHub
//! returns for a pull request, so the rest of the pipeline does not care
//! where the diff came from.

use anyhow::{Context, Result};
use git2::{Commit, Diff, DiffFormat, DiffOptions, Repository, Tree};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DiffMode {
    /// Everything since the merge base with main (committed, staged and unstaged)
    #[default]
    VsMain,
    /// Working tree changes not yet staged
    Unstaged,
    /// Changes staged in the index
    Staged,
    /// One commit, or the range between two refs
    Commits,
}

impl DiffMode {
    pub fn label(&self) -> &'static str {
        match self {
            DiffMode::VsMain => "vs-main",
            DiffMode::Unstaged => "unstaged",
            DiffMode::Staged => "staged",
            DiffMode::Commits => "commits",
        }
    }
}

/// Name of the current branch, or "detached".
pub fn current_branch(repo_path: &Path) -> Result<String> {
    let repo = Repository::discover(repo_path).context("Failed to open repository")?;
    let head = repo.head().context("Failed to get HEAD")?;
    Ok(head.shorthand().unwrap_or("detached").to_string())
}

/// Unified diff text for `mode`.
///
/// `refs` only applies to [`DiffMode::Commits`]: none means `HEAD~1..HEAD`,
/// one ref means that commit against its parent, two refs are a range.
pub fn local_diff(repo_path: &Path, mode: DiffMode, refs: &[String]) -> Result<String> {
    let repo = Repository::discover(repo_path).context("Failed to open repository")?;
    let mut opts = DiffOptions::new();

    let diff = match mode {
        DiffMode::VsMain => {
            let base = main_merge_base(&repo)?;
            let tree = base.tree()?;
            include_untracked(&mut opts);
            repo.diff_tree_to_workdir_with_index(Some(&tree), Some(&mut opts))
                .context("Failed to diff against main")?
        }
        DiffMode::Unstaged => {
            include_untracked(&mut opts);
            repo.diff_index_to_workdir(None, Some(&mut opts))
                .context("Failed to diff working tree")?
        }
        DiffMode::Staged => {
            let head_tree = head_tree(&repo)?;
            repo.diff_tree_to_index(head_tree.as_ref(), None, Some(&mut opts))
                .context("Failed to diff index")?
        }
        DiffMode::Commits => {
            let (old, new) = commit_range(&repo, refs)?;
            let old_tree = old.map(|c| c.tree()).transpose()?;
            let new_tree = new.tree()?;
            repo.diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), Some(&mut opts))
                .context("Failed to diff commits")?
        }
    };

    patch_text(&diff)
}

fn include_untracked(opts: &mut DiffOptions) {
    opts.include_untracked(true)
        .recurse_untracked_dirs(true)
        .show_untracked_content(true);
}

fn head_tree(repo: &Repository) -> Result<Option<Tree<'_>>> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_tree().context("Failed to read HEAD tree")?)),
        // Unborn branch: everything in the index is new
        Err(e) if e.code() == git2::ErrorCode::UnbornBranch => Ok(None),
        Err(e) => Err(e).context("Failed to get HEAD"),
    }
}

fn main_merge_base(repo: &Repository) -> Result<Commit<'_>> {
    let main = ["main", "master", "origin/main", "origin/master"]
        .iter()
        .find_map(|name| repo.revparse_single(name).ok()?.peel_to_commit().ok())
        .context("Could not find 'main' or 'master' branch")?;
    let head = repo
        .head()
        .context("Failed to get HEAD")?
        .peel_to_commit()
        .context("HEAD is not a commit")?;
    let base = repo
        .merge_base(main.id(), head.id())
        .context("No common ancestor with main")?;
    repo.find_commit(base).context("Failed to load merge base")
}

fn resolve_commit<'r>(repo: &'r Repository, spec: &str) -> Result<Commit<'r>> {
    repo.revparse_single(spec)
        .and_then(|obj| obj.peel_to_commit())
        .with_context(|| format!("Unknown revision '{}'", spec))
}

/// `(old, new)` commits for the `commits` mode; `old` is `None` for a root commit.
fn commit_range<'r>(repo: &'r Repository, refs: &[String]) -> Result<(Option<Commit<'r>>, Commit<'r>)> {
    match refs {
        [] => {
            let head = resolve_commit(repo, "HEAD")?;
            let parent = head.parent(0).ok();
            Ok((parent, head))
        }
        [single] => {
            if let Some((from, to)) = single.split_once("..") {
                return Ok((Some(resolve_commit(repo, from)?), resolve_commit(repo, to)?));
            }
            let commit = resolve_commit(repo, single)?;
            let parent = commit.parent(0).ok();
            Ok((parent, commit))
        }
        [from, to] => Ok((Some(resolve_commit(repo, from)?), resolve_commit(repo, to)?)),
        _ => Err(anyhow::anyhow!(
            "Expected at most two refs for commits mode, got {}",
            refs.len()
        )),
    }
}

/// Render a diff as patch text with `+`/`-`/` ` line prefixes.
fn patch_text(diff: &Diff<'_>) -> Result<String> {
    let mut out = String::new();
    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        if let origin @ ('+' | '-' | ' ') = line.origin() {
            out.push(origin);
        }
        out.push_str(&String::from_utf8_lossy(line.content()));
        true
    })
    .context("Failed to render diff")?;
    Ok(out)
}

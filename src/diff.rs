//! Unified diff parsing and anchor validation
//!
//! Parses a (possibly multi-file) unified diff into per-file hunks, then folds
//! the hunks into the two line sets a review comment can legally anchor to:
//! new-file numbers for added/context lines and old-file numbers for
//! deleted/context lines.

use crate::review::types::{Comment, Side};
use std::borrow::BorrowMut;
use std::collections::BTreeSet;

/// A single line in a diff hunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Context(String),
    Add(String),
    Remove(String),
}

/// A hunk in a unified diff
#[derive(Debug, Clone, PartialEq)]
pub struct DiffHunk {
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
    pub lines: Vec<DiffLine>,
}

impl DiffHunk {
    /// (additions, deletions) in this hunk
    pub fn summary(&self) -> (usize, usize) {
        let adds = self.lines.iter().filter(|l| matches!(l, DiffLine::Add(_))).count();
        let removes = self.lines.iter().filter(|l| matches!(l, DiffLine::Remove(_))).count();
        (adds, removes)
    }
}

/// One file section of a unified diff
#[derive(Debug, Clone, PartialEq)]
pub struct FileDiff {
    /// Old path with the `a/` prefix removed; `None` for added files.
    pub old_path: Option<String>,
    /// New path with the `b/` prefix removed; `None` for deleted files.
    pub new_path: Option<String>,
    pub hunks: Vec<DiffHunk>,
}

impl FileDiff {
    /// The path reviewers should use when talking about this file.
    pub fn display_path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or("")
    }

    pub fn stats(&self) -> (usize, usize) {
        self.hunks.iter().fold((0, 0), |acc, h| {
            let (a, r) = h.summary();
            (acc.0 + a, acc.1 + r)
        })
    }
}

/// Strip the `a/` / `b/` prefixes git puts on diff paths, plus any `./`.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    let trimmed = trimmed
        .strip_prefix("a/")
        .or_else(|| trimmed.strip_prefix("b/"))
        .unwrap_or(trimmed);
    trimmed.trim_start_matches("./").to_string()
}

fn header_path(raw: &str) -> Option<String> {
    // Handle timestamp suffix
    let raw = raw.split('\t').next().unwrap_or(raw).trim();
    if raw == "/dev/null" {
        return None;
    }
    let raw = raw.trim_matches('"');
    Some(normalize_path(raw))
}

/// Paths from a `diff --git a/x b/y` line; used when `---`/`+++` are absent
/// (pure renames, mode changes, binary files).
fn git_header_paths(rest: &str) -> (Option<String>, Option<String>) {
    match rest.find(" b/") {
        Some(split) => (
            Some(normalize_path(&rest[..split])),
            Some(normalize_path(&rest[split + 1..])),
        ),
        None => (None, None),
    }
}

/// Parse a unified diff string into per-file sections.
///
/// Never fails: anything that is not a recognizable header or hunk line is
/// skipped.
pub fn parse_files(diff: &str) -> Vec<FileDiff> {
    let lines: Vec<&str> = diff.lines().collect();
    let mut files: Vec<FileDiff> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if let Some(rest) = line.strip_prefix("diff --git ") {
            let (old_path, new_path) = git_header_paths(rest);
            files.push(FileDiff {
                old_path,
                new_path,
                hunks: Vec::new(),
            });
            i += 1;
        } else if let Some(rest) = line.strip_prefix("--- ") {
            // A bare `---` pair without `diff --git` starts a new file too
            let needs_new = files.last().is_none_or(|f| !f.hunks.is_empty());
            if needs_new {
                files.push(FileDiff {
                    old_path: None,
                    new_path: None,
                    hunks: Vec::new(),
                });
            }
            if let Some(file) = files.last_mut() {
                file.old_path = header_path(rest);
            }
            i += 1;
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            if let Some(file) = files.last_mut() {
                file.new_path = header_path(rest);
            }
            i += 1;
        } else if let Some(rest) = line.strip_prefix("rename from ") {
            if let Some(file) = files.last_mut() {
                file.old_path = Some(normalize_path(rest));
            }
            i += 1;
        } else if let Some(rest) = line.strip_prefix("rename to ") {
            if let Some(file) = files.last_mut() {
                file.new_path = Some(normalize_path(rest));
            }
            i += 1;
        } else if line.starts_with("new file mode") {
            if let Some(file) = files.last_mut() {
                file.old_path = None;
            }
            i += 1;
        } else if line.starts_with("deleted file mode") {
            if let Some(file) = files.last_mut() {
                file.new_path = None;
            }
            i += 1;
        } else if line.starts_with("@@") {
            match parse_hunk(&lines, &mut i) {
                Some(hunk) => {
                    if files.is_empty() {
                        files.push(FileDiff {
                            old_path: None,
                            new_path: None,
                            hunks: Vec::new(),
                        });
                    }
                    if let Some(file) = files.last_mut() {
                        file.hunks.push(hunk);
                    }
                }
                None => i += 1,
            }
        } else {
            i += 1;
        }
    }

    files
}

/// Parse a single hunk starting at `lines[*idx]`.
///
/// Consumes exactly as many body lines as the header's counts promise, so text
/// after the hunk (another file header, trailing prose) is never misread.
fn parse_hunk(lines: &[&str], idx: &mut usize) -> Option<DiffHunk> {
    let header = lines[*idx];

    // Parse @@ -old_start,old_count +new_start,new_count @@
    let parts: Vec<&str> = header.split_whitespace().collect();
    if parts.len() < 3 || parts[0] != "@@" {
        return None;
    }

    let (old_start, old_count) = parse_range(parts[1].strip_prefix('-')?)?;
    let (new_start, new_count) = parse_range(parts[2].strip_prefix('+')?)?;

    *idx += 1;
    let mut diff_lines = Vec::new();
    let mut old_left = old_count;
    let mut new_left = new_count;

    while *idx < lines.len() && (old_left > 0 || new_left > 0) {
        let line = lines[*idx];

        if line.starts_with("@@") || line.starts_with("diff ") {
            break;
        }

        if let Some(content) = line.strip_prefix('+') {
            diff_lines.push(DiffLine::Add(content.to_string()));
            new_left = new_left.saturating_sub(1);
        } else if let Some(content) = line.strip_prefix('-') {
            diff_lines.push(DiffLine::Remove(content.to_string()));
            old_left = old_left.saturating_sub(1);
        } else if let Some(content) = line.strip_prefix(' ') {
            diff_lines.push(DiffLine::Context(content.to_string()));
            old_left = old_left.saturating_sub(1);
            new_left = new_left.saturating_sub(1);
        } else if line.is_empty() {
            // Some tools strip the single space off blank context lines
            diff_lines.push(DiffLine::Context(String::new()));
            old_left = old_left.saturating_sub(1);
            new_left = new_left.saturating_sub(1);
        }
        // Skip other lines (like "\ No newline at end of file")

        *idx += 1;
    }

    // Trailing "\ No newline" marker belongs to this hunk
    while *idx < lines.len() && lines[*idx].starts_with('\\') {
        *idx += 1;
    }

    Some(DiffHunk {
        old_start,
        old_count,
        new_start,
        new_count,
        lines: diff_lines,
    })
}

/// Parse a range like "10,5" or "10" into (start, count)
fn parse_range(s: &str) -> Option<(u32, u32)> {
    match s.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((s.parse().ok()?, 1)),
    }
}

/// Valid anchor lines for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileLines {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    /// New-file line numbers of added and context lines.
    pub right_lines: BTreeSet<u32>,
    /// Old-file line numbers of deleted and context lines.
    pub left_lines: BTreeSet<u32>,
}

impl FileLines {
    pub fn lines(&self, side: Side) -> &BTreeSet<u32> {
        match side {
            Side::Left => &self.left_lines,
            Side::Right => &self.right_lines,
        }
    }

    fn matches(&self, path: &str) -> bool {
        self.new_path.as_deref() == Some(path) || self.old_path.as_deref() == Some(path)
    }

    /// Path GitHub anchors comments on: the new name, or the old one for deletions.
    pub fn canonical_path(&self) -> Option<&str> {
        self.new_path.as_deref().or(self.old_path.as_deref())
    }
}

/// Parsed diff, immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffDocument {
    files: Vec<FileLines>,
}

/// Outcome of validating one anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub valid: bool,
    pub reason: Option<String>,
    /// Diff path the anchor resolved to, set when valid.
    pub path: Option<String>,
}

impl Validation {
    fn ok(path: Option<&str>) -> Self {
        Self {
            valid: true,
            reason: None,
            path: path.map(str::to_string),
        }
    }

    fn rejected(reason: String) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
            path: None,
        }
    }
}

/// A comment that could not be anchored, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unmapped<T> {
    pub item: T,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition<T> {
    pub mapped: Vec<T>,
    pub unmapped: Vec<Unmapped<T>>,
}

/// Build the line index for a unified diff.
pub fn build_index(diff: &str) -> DiffDocument {
    let files = parse_files(diff)
        .into_iter()
        .map(|file| {
            let mut lines = FileLines {
                old_path: file.old_path.clone(),
                new_path: file.new_path.clone(),
                ..Default::default()
            };
            for hunk in &file.hunks {
                let mut old_line = hunk.old_start;
                let mut new_line = hunk.new_start;
                for diff_line in &hunk.lines {
                    match diff_line {
                        DiffLine::Context(_) => {
                            lines.left_lines.insert(old_line);
                            lines.right_lines.insert(new_line);
                            old_line = old_line.saturating_add(1);
                            new_line = new_line.saturating_add(1);
                        }
                        DiffLine::Add(_) => {
                            lines.right_lines.insert(new_line);
                            new_line = new_line.saturating_add(1);
                        }
                        DiffLine::Remove(_) => {
                            lines.left_lines.insert(old_line);
                            old_line = old_line.saturating_add(1);
                        }
                    }
                }
            }
            lines
        })
        .collect();

    DiffDocument { files }
}

impl DiffDocument {
    pub fn files(&self) -> &[FileLines] {
        &self.files
    }

    /// Look a file up by either side's path, tolerating `a/`/`b/` prefixes.
    pub fn file(&self, path: &str) -> Option<&FileLines> {
        let normalized = normalize_path(path);
        // Prefer the new-side match so renamed files resolve to their new name
        self.files
            .iter()
            .find(|f| f.new_path.as_deref() == Some(normalized.as_str()))
            .or_else(|| self.files.iter().find(|f| f.matches(&normalized)))
    }

    /// Rewrite `comment.path` to the diff's own path for that file.
    ///
    /// Leaves paths that match no file untouched. Returns whether a file matched.
    pub fn canonicalize(&self, comment: &mut Comment) -> bool {
        match self.file(&comment.path).and_then(FileLines::canonical_path) {
            Some(path) => {
                if comment.path != path {
                    comment.path = path.to_string();
                }
                true
            }
            None => false,
        }
    }

    /// Check that an anchor exists in the diff.
    pub fn validate(
        &self,
        path: &str,
        line: u32,
        side: Side,
        start_line: Option<u32>,
        start_side: Option<Side>,
    ) -> Validation {
        let Some(file) = self.file(path) else {
            return Validation::rejected(format!("file {} not found in diff", path));
        };

        if !file.lines(side).contains(&line) {
            return Validation::rejected(format!(
                "line {} not found in diff ({} side of {})",
                line,
                side.as_str(),
                path
            ));
        }

        if let Some(start) = start_line {
            let start_side = start_side.unwrap_or(side);
            if start_side == side && start > line {
                return Validation::rejected(format!(
                    "start_line {} is after line {} in {}",
                    start, line, path
                ));
            }
            if !file.lines(start_side).contains(&start) {
                return Validation::rejected(format!(
                    "start_line {} not found in diff ({} side of {})",
                    start,
                    start_side.as_str(),
                    path
                ));
            }
        }

        Validation::ok(file.canonical_path())
    }

    pub fn validate_comment(&self, comment: &Comment) -> Validation {
        self.validate(
            &comment.path,
            comment.line,
            comment.side,
            comment.start_line,
            comment.start_side,
        )
    }

    /// Split comments into those that can be posted inline and those that
    /// must be demoted to the narrative. Nothing is dropped, and mapped
    /// comments carry the diff's path for their file.
    pub fn partition<T: BorrowMut<Comment>>(&self, comments: Vec<T>) -> Partition<T> {
        let mut mapped = Vec::new();
        let mut unmapped = Vec::new();
        for mut item in comments {
            let verdict = self.validate_comment(item.borrow_mut());
            if verdict.valid {
                if let Some(path) = verdict.path {
                    item.borrow_mut().path = path;
                }
                mapped.push(item);
            } else {
                unmapped.push(Unmapped {
                    item,
                    reason: verdict.reason.unwrap_or_else(|| "not found in diff".to_string()),
                });
            }
        }
        Partition { mapped, unmapped }
    }
}

/// Files touched by a diff, with (additions, deletions), in diff order.
pub fn changed_files(diff: &str) -> Vec<(String, usize, usize)> {
    parse_files(diff)
        .iter()
        .filter(|f| !f.display_path().is_empty())
        .map(|f| {
            let (adds, removes) = f.stats();
            (f.display_path().to_string(), adds, removes)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::types::Severity;

    const AUTH_DIFF: &str = r#"diff --git a/src/auth.ts b/src/auth.ts
index 1111111..2222222 100644
--- a/src/auth.ts
+++ b/src/auth.ts
@@ -8,6 +8,9 @@ export function login(user) {
   const token = issue(user);
   if (!token) {
     return null;
+  }
+  if (token.expired) {
+    refresh(token);
   }
   return token;
 }
"#;

    const MIXED_DIFF: &str = r#"diff --git a/lib/math.rs b/lib/math.rs
--- a/lib/math.rs
+++ b/lib/math.rs
@@ -1,5 +1,4 @@
 fn add(a: i32, b: i32) -> i32 {
-    // old comment
-    a + b
+    a.wrapping_add(b)
 }

diff --git a/README.md b/README.md
new file mode 100644
--- /dev/null
+++ b/README.md
@@ -0,0 +1,2 @@
+# Title
+Body
"#;

    fn comment(path: &str, line: u32, side: Side) -> Comment {
        Comment {
            path: path.to_string(),
            line,
            start_line: None,
            side,
            start_side: None,
            body: "finding".to_string(),
            severity: Severity::Warning,
        }
    }

    #[test]
    fn test_added_lines_are_right_side_only() {
        let doc = build_index(AUTH_DIFF);
        let file = doc.file("src/auth.ts").unwrap();
        for line in 11..=13 {
            assert!(file.right_lines.contains(&line), "line {line} missing");
        }
        // Context lines exist on both sides
        assert!(file.right_lines.contains(&8));
        assert!(file.left_lines.contains(&8));
        // New line 14 is context; old numbering stops at 13
        assert!(file.right_lines.contains(&16));
        assert!(!file.left_lines.contains(&14));
    }

    #[test]
    fn test_validate_added_lines() {
        let doc = build_index(AUTH_DIFF);
        assert!(doc.validate("src/auth.ts", 12, Side::Right, None, None).valid);

        let miss = doc.validate("src/auth.ts", 100, Side::Right, None, None);
        assert!(!miss.valid);
        assert!(miss.reason.unwrap().contains("not found in diff"));
    }

    #[test]
    fn test_deleted_lines_are_left_side_only() {
        let doc = build_index(MIXED_DIFF);
        let file = doc.file("lib/math.rs").unwrap();
        assert!(file.left_lines.contains(&2));
        assert!(file.left_lines.contains(&3));
        assert_eq!(file.left_lines.len(), 5);
        assert_eq!(file.right_lines.len(), 4);
        assert!(doc.validate("lib/math.rs", 2, Side::Left, None, None).valid);
        // New line 2 is the added replacement
        assert!(doc.validate("lib/math.rs", 2, Side::Right, None, None).valid);
        // The new file is one line shorter
        assert!(!doc.validate("lib/math.rs", 5, Side::Right, None, None).valid);
        assert!(doc.validate("lib/math.rs", 5, Side::Left, None, None).valid);
    }

    #[test]
    fn test_path_prefixes_are_normalized() {
        let doc = build_index(MIXED_DIFF);
        assert!(doc.file("b/README.md").is_some());
        assert!(doc.file("a/lib/math.rs").is_some());
        assert!(doc.file("./README.md").is_some());
        let readme = doc.file("README.md").unwrap();
        assert_eq!(readme.old_path, None);
        assert!(readme.right_lines.contains(&1));
        assert!(readme.left_lines.is_empty());
    }

    #[test]
    fn test_multi_line_validates_start_side() {
        let doc = build_index(MIXED_DIFF);
        // Range from deleted line 2 (LEFT) to added line 2 (RIGHT)
        let ok = doc.validate("lib/math.rs", 2, Side::Right, Some(2), Some(Side::Left));
        assert!(ok.valid);
        // start_side defaults to side; new line 1..2 is valid
        assert!(doc.validate("lib/math.rs", 2, Side::Right, Some(1), None).valid);
        let bad = doc.validate("README.md", 2, Side::Right, Some(9), None);
        assert!(!bad.valid);
        let inverted = doc.validate("README.md", 1, Side::Right, Some(2), None);
        assert!(!inverted.valid);
    }

    #[test]
    fn test_partition_never_drops() {
        let doc = build_index(AUTH_DIFF);
        let comments = vec![
            comment("src/auth.ts", 12, Side::Right),
            comment("src/auth.ts", 100, Side::Right),
            comment("src/other.ts", 1, Side::Right),
        ];
        let part = doc.partition(comments);
        assert_eq!(part.mapped.len(), 1);
        assert_eq!(part.unmapped.len(), 2);
        assert!(part.unmapped[0].reason.contains("not found in diff"));
        assert!(part.unmapped[1].reason.contains("file src/other.ts"));

        for c in &part.mapped {
            assert!(doc.validate_comment(c).valid);
        }
        for u in &part.unmapped {
            assert!(!doc.validate_comment(&u.item).valid);
        }
    }

    #[test]
    fn test_validation_is_pure() {
        let doc = build_index(MIXED_DIFF);
        let c = comment("lib/math.rs", 3, Side::Left);
        assert_eq!(doc.validate_comment(&c), doc.validate_comment(&c));
        assert_eq!(build_index(MIXED_DIFF), doc);
    }

    #[test]
    fn test_hunk_stops_at_declared_counts() {
        let diff = "--- a/x.rs\n+++ b/x.rs\n@@ -1,1 +1,1 @@\n-a\n+b\nthis is trailing prose\n";
        let files = parse_files(diff);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].hunks[0].lines.len(), 2);
        assert_eq!(files[0].stats(), (1, 1));
    }

    #[test]
    fn test_rename_accepts_either_path() {
        let diff = "diff --git a/old.rs b/new.rs\nsimilarity index 90%\nrename from old.rs\nrename to new.rs\n--- a/old.rs\n+++ b/new.rs\n@@ -4,2 +4,2 @@\n ctx\n-x\n+y\n";
        let doc = build_index(diff);
        assert!(doc.validate("old.rs", 5, Side::Left, None, None).valid);
        assert!(doc.validate("new.rs", 5, Side::Right, None, None).valid);
        assert_eq!(changed_files(diff), vec![("new.rs".to_string(), 1, 1)]);
    }

    #[test]
    fn test_partition_rewrites_to_diff_path() {
        let diff = "diff --git a/old.rs b/new.rs\nsimilarity index 90%\nrename from old.rs\nrename to new.rs\n--- a/old.rs\n+++ b/new.rs\n@@ -4,2 +4,2 @@\n ctx\n-x\n+y\n";
        let doc = build_index(diff);
        let part = doc.partition(vec![
            comment("b/new.rs", 5, Side::Right),
            comment("old.rs", 5, Side::Left),
            comment("./new.rs", 4, Side::Right),
        ]);
        assert!(part.unmapped.is_empty());
        let paths: Vec<&str> = part.mapped.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, ["new.rs", "new.rs", "new.rs"]);
    }

    #[test]
    fn test_deleted_file_resolves_to_old_path() {
        let diff = "diff --git a/gone.rs b/gone.rs\ndeleted file mode 100644\n--- a/gone.rs\n+++ /dev/null\n@@ -1,2 +0,0 @@\n-a\n-b\n";
        let doc = build_index(diff);
        let mut c = comment("a/gone.rs", 2, Side::Left);
        assert!(doc.canonicalize(&mut c));
        assert_eq!(c.path, "gone.rs");
        assert_eq!(doc.validate_comment(&c).path.as_deref(), Some("gone.rs"));

        let mut unknown = comment("b/elsewhere.rs", 1, Side::Right);
        assert!(!doc.canonicalize(&mut unknown));
        assert_eq!(unknown.path, "b/elsewhere.rs");
    }

    #[test]
    fn test_line_counters_saturate_at_max() {
        let diff = "--- a/big.txt\n+++ b/big.txt\n@@ -4294967295,2 +4294967295,3 @@\n ctx\n-old\n+new\n+more\n";
        let doc = build_index(diff);
        let f = doc.file("big.txt").unwrap();
        assert_eq!(f.right_lines.iter().copied().collect::<Vec<_>>(), [u32::MAX]);
        assert_eq!(f.left_lines.iter().copied().collect::<Vec<_>>(), [u32::MAX]);
    }

    #[test]
    fn test_empty_context_line_counts_on_both_sides() {
        let diff = "--- a/y.txt\n+++ b/y.txt\n@@ -1,3 +1,3 @@\n one\n\n-three\n+3\n";
        let doc = build_index(diff);
        let f = doc.file("y.txt").unwrap();
        assert!(f.left_lines.contains(&2));
        assert!(f.right_lines.contains(&2));
        assert!(f.right_lines.contains(&3));
    }
}

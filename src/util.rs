/// Truncate with a trailing `...` (Unicode-safe).
pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

/// Truncate a string for display without allocating (Unicode-safe)
pub fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

/// Keep the beginning and end of oversized prompt content.
pub fn truncate_middle(content: &str, max_chars: usize) -> String {
    let total = content.chars().count();
    if total <= max_chars {
        return content.to_string();
    }
    let keep = max_chars / 2;
    let tail_start = content
        .char_indices()
        .nth(total - keep)
        .map_or(content.len(), |(idx, _)| idx);
    format!(
        "{}\n\n... [{} chars truncated] ...\n\n{}",
        truncate_str(content, keep),
        total - 2 * keep,
        &content[tail_start..]
    )
}

/// Numbered window of `radius` lines either side of `line_number` (1-based).
///
/// Returns `None` when the line is past the end of the content.
pub fn window_around_line(content: &str, line_number: u32, radius: usize) -> Option<String> {
    let lines: Vec<&str> = content.lines().collect();
    let target = (line_number as usize).saturating_sub(1);
    if lines.is_empty() || target >= lines.len() {
        return None;
    }

    let start = target.saturating_sub(radius);
    let end = (target + radius).min(lines.len() - 1);
    Some(
        lines[start..=end]
            .iter()
            .enumerate()
            .map(|(i, line)| {
                let number = start + i + 1;
                let marker = if number == target + 1 { ">" } else { " " };
                format!("{}{:5}| {}", marker, number, line)
            })
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_adds_ellipsis() {
        assert_eq!(truncate("hello world", 8), "hello...");
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abc", 0), "");
    }

    #[test]
    fn test_truncate_str_is_char_safe() {
        assert_eq!(truncate_str("héllo", 2), "hé");
        assert_eq!(truncate_str("hi", 5), "hi");
    }

    #[test]
    fn test_truncate_middle_keeps_both_ends() {
        let content = "line1\nline2\nline3\nline4\nline5";
        let truncated = truncate_middle(content, 10);
        assert!(truncated.starts_with("line1"));
        assert!(truncated.ends_with("line5"));
        assert!(truncated.contains("truncated"));
    }

    #[test]
    fn test_window_marks_target_line() {
        let content = "a\nb\nc\nd\ne";
        let window = window_around_line(content, 3, 1).unwrap();
        assert_eq!(window.lines().count(), 3);
        assert!(window.contains(">    3| c"));
        assert!(window_around_line(content, 9, 1).is_none());
        assert!(window_around_line("", 1, 1).is_none());
    }
}

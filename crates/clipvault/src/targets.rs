//! The targets file protocol.
//!
//! One target per line; `#` marks comments. A fixed marker line
//! partitions the file: priority targets above, completed targets
//! below. All rewrites go through [`clipvault_fs::atomic_write`] so
//! the daemon's watcher never reads a torn file.

use std::io;
use std::path::Path;

pub const MARKER: &str =
    "# Completed targets are moved below this line. New targets should be added above.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    User,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTarget {
    pub kind: TargetKind,
    pub raw: String,
}

/// Post targets are URLs pointing at a single video; everything else
/// names a user.
pub fn parse_target(target: &str) -> ParsedTarget {
    let raw = target.trim().to_string();
    let kind = if raw.contains("/video/") {
        TargetKind::Post
    } else {
        TargetKind::User
    };
    ParsedTarget { kind, raw }
}

/// Pull the username out of a target: either a profile URL's `@name`
/// segment or a bare (possibly `@`-prefixed) name.
pub fn extract_username(target: &str) -> String {
    let target = target.trim();
    if let Some(rest) = target
        .strip_prefix("https://")
        .or_else(|| target.strip_prefix("http://"))
    {
        if let Some((_host, path)) = rest.split_once('/') {
            for segment in path.split('/') {
                if let Some(name) = segment.strip_prefix('@') {
                    return name.to_string();
                }
            }
        }
    }
    target.trim_start_matches('@').to_string()
}

pub fn read_lines(path: &Path) -> io::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content.lines().map(str::to_string).collect())
}

/// Targets above the marker: non-empty, non-comment, in order.
pub fn priority_targets(lines: &[String]) -> Vec<String> {
    let mut targets = Vec::new();
    for line in lines {
        let trimmed = line.trim();
        if trimmed == MARKER {
            break;
        }
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            targets.push(trimmed.to_string());
        }
    }
    targets
}

/// Every non-comment line, used when static mode reads the whole file.
pub fn all_targets(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn collapse_blank_runs(lines: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    for line in lines {
        if line.trim().is_empty()
            && out.last().map_or(true, |prev: &String| prev.trim().is_empty())
        {
            continue;
        }
        out.push(line);
    }
    while out.last().is_some_and(|l| l.trim().is_empty()) {
        out.pop();
    }
    out
}

fn render(lines: Vec<String>) -> String {
    let mut content = lines.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    content
}

/// File content with the marker as the final non-empty line.
pub fn with_marker_last(lines: Vec<String>) -> String {
    let mut kept: Vec<String> = lines
        .into_iter()
        .filter(|l| l.trim() != MARKER)
        .collect();
    kept = collapse_blank_runs(kept);
    kept.push(MARKER.to_string());
    render(kept)
}

/// Ensure the targets file exists and ends with the marker.
pub fn initialize_file(path: &Path) -> io::Result<()> {
    let lines = match read_lines(path) {
        Ok(lines) => lines,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e),
    };
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    clipvault_fs::atomic_write(path, with_marker_last(lines).as_bytes())
        .map_err(|e| io::Error::other(e.to_string()))
}

/// Content with `target`'s line moved below the marker, or `None` when
/// the line is gone (the file changed under us).
pub fn move_below_marker(lines: Vec<String>, target: &str) -> Option<String> {
    let mut kept = Vec::new();
    let mut completed = Vec::new();
    let mut found = false;
    for line in lines {
        let trimmed = line.trim();
        if trimmed == target.trim() {
            completed.push(line);
            found = true;
        } else if trimmed != MARKER {
            kept.push(line);
        }
    }
    if !found {
        return None;
    }
    let mut out = collapse_blank_runs(kept);
    out.push(MARKER.to_string());
    out.extend(completed);
    Some(render(out))
}

/// The static-mode update rule: a finished post line is commented out
/// in place, a finished user line moves to the end of the file, and
/// blank-line runs are collapsed either way.
pub fn legacy_update(lines: Vec<String>, target: &str, kind: TargetKind) -> Option<String> {
    let index = lines.iter().position(|l| l.trim() == target.trim())?;
    let mut lines = lines;
    match kind {
        TargetKind::Post => {
            lines[index] = format!("# {}", lines[index]);
        }
        TargetKind::User => {
            let line = lines.remove(index);
            while lines.last().is_some_and(|l| l.trim().is_empty()) {
                lines.pop();
            }
            lines.push(line);
        }
    }
    Some(render(collapse_blank_runs(lines)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_distinguishes_posts_from_users() {
        assert_eq!(
            parse_target("https://example.com/@carol/video/123").kind,
            TargetKind::Post
        );
        assert_eq!(parse_target("carol").kind, TargetKind::User);
        assert_eq!(
            parse_target("https://example.com/@carol").kind,
            TargetKind::User
        );
    }

    #[test]
    fn username_extraction() {
        assert_eq!(extract_username("carol"), "carol");
        assert_eq!(extract_username("@carol"), "carol");
        assert_eq!(extract_username("https://example.com/@carol/video/1"), "carol");
        assert_eq!(extract_username(" carol \n"), "carol");
    }

    #[test]
    fn priority_stops_at_marker() {
        let input = lines(&["u1", "# note", "", "u2", MARKER, "u3"]);
        assert_eq!(priority_targets(&input), vec!["u1", "u2"]);
    }

    #[test]
    fn marker_moves_to_end_on_initialize() {
        let input = lines(&["u1", MARKER, "u2", ""]);
        assert_eq!(with_marker_last(input), format!("u1\nu2\n{MARKER}\n"));
    }

    #[test]
    fn empty_file_initializes_to_bare_marker() {
        assert_eq!(with_marker_last(Vec::new()), format!("{MARKER}\n"));
    }

    #[test]
    fn completed_target_moves_below_marker() {
        let input = lines(&["u1", "u2", MARKER, "u0"]);
        let out = move_below_marker(input, "u1").unwrap();
        assert_eq!(out, format!("u2\n{MARKER}\nu1\n"));
    }

    #[test]
    fn move_below_marker_reports_missing_target() {
        let input = lines(&["u2", MARKER]);
        assert!(move_below_marker(input, "u1").is_none());
    }

    #[test]
    fn legacy_update_comments_posts_in_place() {
        let input = lines(&["u1", "https://example.com/@c/video/5", "u2"]);
        let out = legacy_update(input, "https://example.com/@c/video/5", TargetKind::Post).unwrap();
        assert_eq!(out, "u1\n# https://example.com/@c/video/5\nu2\n");
    }

    #[test]
    fn legacy_update_moves_users_to_end() {
        let input = lines(&["u1", "u2", "", "", "u3"]);
        let out = legacy_update(input, "u1", TargetKind::User).unwrap();
        assert_eq!(out, "u2\n\nu3\nu1\n");
    }

    #[test]
    fn blank_runs_collapse() {
        let input = lines(&["u1", "", "", "", "u2", "", ""]);
        assert_eq!(collapse_blank_runs(input), lines(&["u1", "", "u2"]));
    }
}

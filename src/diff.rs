//! Line-level diff between a stored version and the working file
//!
//! Implements a plain LCS-based line diff rendered in unified format
//! for the CLI `diff` command. Binary content is detected up front
//! and reported instead of dumped.

use colored::Colorize;

/// Number of unchanged lines shown around each hunk
const CONTEXT_LINES: usize = 3;

/// A change operation over the two line sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeOp {
    /// (old_line_idx, new_line_idx)
    Keep(usize, usize),
    /// old_line_idx
    Delete(usize),
    /// new_line_idx
    Insert(usize),
}

/// Whether content looks binary (NUL byte in the first 8 KB)
pub fn is_binary(content: &[u8]) -> bool {
    content.iter().take(8192).any(|&b| b == 0)
}

/// Render a unified diff between two text contents
///
/// `old_label` and `new_label` name the two sides in the header
/// (e.g. `a.txt (v3)` and `a.txt (working)`). Returns `None` when the
/// contents are identical. Colors are applied only when `color` is
/// set.
pub fn unified_diff(
    old_content: &[u8],
    new_content: &[u8],
    old_label: &str,
    new_label: &str,
    color: bool,
) -> Option<String> {
    if old_content == new_content {
        return None;
    }
    if is_binary(old_content) || is_binary(new_content) {
        return Some(format!(
            "Binary files {} and {} differ\n",
            old_label, new_label
        ));
    }

    let old_text = String::from_utf8_lossy(old_content);
    let new_text = String::from_utf8_lossy(new_content);
    let old_lines: Vec<&str> = old_text.lines().collect();
    let new_lines: Vec<&str> = new_text.lines().collect();

    let ops = compute_changes(&old_lines, &new_lines);
    if ops.iter().all(|op| matches!(op, ChangeOp::Keep(_, _))) {
        // Content differed only in trailing bytes that don't form a
        // line (e.g. a final newline); show the header alone.
        return None;
    }

    let mut out = String::new();
    let header = format!("--- {}\n+++ {}\n", old_label, new_label);
    if color {
        out.push_str(&header.bold().to_string());
    } else {
        out.push_str(&header);
    }

    for (start, end) in group_hunks(&ops) {
        render_hunk(&mut out, &ops[start..end], &old_lines, &new_lines, color);
    }

    Some(out)
}

/// Compute change operations via longest common subsequence
fn compute_changes(old_lines: &[&str], new_lines: &[&str]) -> Vec<ChangeOp> {
    if old_lines.is_empty() {
        return (0..new_lines.len()).map(ChangeOp::Insert).collect();
    }
    if new_lines.is_empty() {
        return (0..old_lines.len()).map(ChangeOp::Delete).collect();
    }

    let m = old_lines.len();
    let n = new_lines.len();

    let mut dp = vec![vec![0usize; n + 1]; m + 1];
    for i in 1..=m {
        for j in 1..=n {
            if old_lines[i - 1] == new_lines[j - 1] {
                dp[i][j] = dp[i - 1][j - 1] + 1;
            } else {
                dp[i][j] = dp[i - 1][j].max(dp[i][j - 1]);
            }
        }
    }

    // Backtrack into operations, then reverse into document order.
    let mut ops = Vec::new();
    let (mut i, mut j) = (m, n);
    while i > 0 || j > 0 {
        if i > 0 && j > 0 && old_lines[i - 1] == new_lines[j - 1] {
            ops.push(ChangeOp::Keep(i - 1, j - 1));
            i -= 1;
            j -= 1;
        } else if j > 0 && (i == 0 || dp[i][j - 1] >= dp[i - 1][j]) {
            ops.push(ChangeOp::Insert(j - 1));
            j -= 1;
        } else {
            ops.push(ChangeOp::Delete(i - 1));
            i -= 1;
        }
    }
    ops.reverse();
    ops
}

/// Group change runs into op-index ranges with surrounding context,
/// merging ranges whose context would overlap
fn group_hunks(ops: &[ChangeOp]) -> Vec<(usize, usize)> {
    let change_indices: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| !matches!(op, ChangeOp::Keep(_, _)))
        .map(|(idx, _)| idx)
        .collect();

    let mut hunks: Vec<(usize, usize)> = Vec::new();
    for idx in change_indices {
        let start = idx.saturating_sub(CONTEXT_LINES);
        let end = (idx + CONTEXT_LINES + 1).min(ops.len());
        match hunks.last_mut() {
            Some((_, last_end)) if start <= *last_end => *last_end = end,
            _ => hunks.push((start, end)),
        }
    }
    hunks
}

fn render_hunk(
    out: &mut String,
    ops: &[ChangeOp],
    old_lines: &[&str],
    new_lines: &[&str],
    color: bool,
) {
    // Unified header: 1-based start line and line count on each side.
    let old_start = ops
        .iter()
        .find_map(|op| match op {
            ChangeOp::Keep(i, _) | ChangeOp::Delete(i) => Some(i + 1),
            ChangeOp::Insert(_) => None,
        })
        .unwrap_or(1);
    let new_start = ops
        .iter()
        .find_map(|op| match op {
            ChangeOp::Keep(_, j) | ChangeOp::Insert(j) => Some(j + 1),
            ChangeOp::Delete(_) => None,
        })
        .unwrap_or(1);
    let old_count = ops
        .iter()
        .filter(|op| matches!(op, ChangeOp::Keep(_, _) | ChangeOp::Delete(_)))
        .count();
    let new_count = ops
        .iter()
        .filter(|op| matches!(op, ChangeOp::Keep(_, _) | ChangeOp::Insert(_)))
        .count();

    let header = format!(
        "@@ -{},{} +{},{} @@\n",
        old_start, old_count, new_start, new_count
    );
    if color {
        out.push_str(&header.cyan().to_string());
    } else {
        out.push_str(&header);
    }

    for op in ops {
        match op {
            ChangeOp::Keep(i, _) => {
                out.push_str(&format!(" {}\n", old_lines[*i]));
            }
            ChangeOp::Delete(i) => {
                let line = format!("-{}", old_lines[*i]);
                if color {
                    out.push_str(&format!("{}\n", line.red()));
                } else {
                    out.push_str(&line);
                    out.push('\n');
                }
            }
            ChangeOp::Insert(j) => {
                let line = format!("+{}", new_lines[*j]);
                if color {
                    out.push_str(&format!("{}\n", line.green()));
                } else {
                    out.push_str(&line);
                    out.push('\n');
                }
            }
        }
    }
}

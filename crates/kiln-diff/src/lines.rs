//! Line-level diffing.
//!
//! The edit script comes from a longest-common-subsequence table over the
//! lines left after stripping the common prefix and suffix. Edits are then
//! grouped into hunks with a fixed amount of surrounding context.

use crate::types::{DiffLine, Hunk, LineKind};
use serde::{Deserialize, Serialize};

/// Lines of context around each change.
pub const DEFAULT_CONTEXT: usize = 3;

/// Largest LCS table (old lines x new lines) computed before falling back
/// to a whole replacement.
pub const DEFAULT_MAX_CELLS: usize = 4_000_000;

/// Bytes inspected when sniffing for binary content.
const BINARY_SNIFF_LEN: usize = 8000;

/// Tuning knobs for line diffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffOptions {
    /// Lines of context around each change.
    pub context: usize,
    /// LCS table size limit.
    pub max_cells: usize,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            context: DEFAULT_CONTEXT,
            max_cells: DEFAULT_MAX_CELLS,
        }
    }
}

/// Returns true if `data` contains a NUL byte within the first 8000 bytes.
pub fn is_binary(data: &[u8]) -> bool {
    data.iter().take(BINARY_SNIFF_LEN).any(|&b| b == 0)
}

/// Splits text into lines without their terminators.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.lines().collect()
}

/// A single step of an edit script. Indices are 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edit {
    /// Line present on both sides.
    Equal {
        /// Index in the old lines.
        old: usize,
        /// Index in the new lines.
        new: usize,
    },
    /// Line removed from the old side.
    Delete {
        /// Index in the old lines.
        old: usize,
    },
    /// Line added on the new side.
    Insert {
        /// Index in the new lines.
        new: usize,
    },
}

impl Edit {
    fn is_change(&self) -> bool {
        !matches!(self, Edit::Equal { .. })
    }
}

/// Computes an edit script turning `old` into `new`.
///
/// Within a changed region deletions come before insertions. When the
/// region between the common prefix and suffix exceeds `max_cells`, it is
/// emitted as a whole replacement.
pub fn edit_script(old: &[&str], new: &[&str], max_cells: usize) -> Vec<Edit> {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let mut edits = Vec::with_capacity(old.len() + new.len());
    edits.extend((0..prefix).map(|i| Edit::Equal { old: i, new: i }));

    if old_mid.len().saturating_mul(new_mid.len()) > max_cells {
        tracing::debug!(
            old_lines = old_mid.len(),
            new_lines = new_mid.len(),
            max_cells,
            "Diff region too large for LCS, emitting replacement"
        );
        edits.extend((0..old_mid.len()).map(|i| Edit::Delete { old: prefix + i }));
        edits.extend((0..new_mid.len()).map(|j| Edit::Insert { new: prefix + j }));
    } else {
        lcs_edits(old_mid, new_mid, prefix, &mut edits);
    }

    let old_tail = old.len() - suffix;
    let new_tail = new.len() - suffix;
    edits.extend((0..suffix).map(|k| Edit::Equal {
        old: old_tail + k,
        new: new_tail + k,
    }));
    edits
}

fn lcs_edits(old: &[&str], new: &[&str], offset: usize, edits: &mut Vec<Edit>) {
    let (m, n) = (old.len(), new.len());
    let width = n + 1;
    // table[i * width + j] = LCS length of old[i..] and new[j..]
    let mut table = vec![0u32; (m + 1) * width];
    for i in (0..m).rev() {
        for j in (0..n).rev() {
            table[i * width + j] = if old[i] == new[j] {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < m && j < n {
        if old[i] == new[j] {
            edits.push(Edit::Equal {
                old: offset + i,
                new: offset + j,
            });
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            edits.push(Edit::Delete { old: offset + i });
            i += 1;
        } else {
            edits.push(Edit::Insert { new: offset + j });
            j += 1;
        }
    }
    edits.extend((i..m).map(|i| Edit::Delete { old: offset + i }));
    edits.extend((j..n).map(|j| Edit::Insert { new: offset + j }));
}

/// Groups an edit script into hunks.
///
/// Changes separated by at most `2 * context` unchanged lines share a hunk;
/// a gap of `2 * context + 1` lines starts a new one.
pub fn build_hunks(old: &[&str], new: &[&str], edits: &[Edit], context: usize) -> Vec<Hunk> {
    let changes: Vec<usize> = edits
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_change())
        .map(|(i, _)| i)
        .collect();
    let Some((&first, rest)) = changes.split_first() else {
        return Vec::new();
    };

    let mut hunks = Vec::new();
    let (mut group_start, mut group_end) = (first, first);
    for &idx in rest {
        if idx - group_end - 1 <= 2 * context {
            group_end = idx;
        } else {
            hunks.push(make_hunk(old, new, edits, group_start, group_end, context));
            group_start = idx;
            group_end = idx;
        }
    }
    hunks.push(make_hunk(old, new, edits, group_start, group_end, context));
    hunks
}

fn make_hunk(
    old: &[&str],
    new: &[&str],
    edits: &[Edit],
    first_change: usize,
    last_change: usize,
    context: usize,
) -> Hunk {
    let start = first_change.saturating_sub(context);
    let end = (last_change + context + 1).min(edits.len());

    let old_before = edits[..start]
        .iter()
        .filter(|e| !matches!(e, Edit::Insert { .. }))
        .count();
    let new_before = edits[..start]
        .iter()
        .filter(|e| !matches!(e, Edit::Delete { .. }))
        .count();

    let lines: Vec<DiffLine> = edits[start..end]
        .iter()
        .map(|edit| match *edit {
            Edit::Equal { old: o, new: n } => DiffLine {
                kind: LineKind::Context,
                content: old[o].to_string(),
                old_line_no: Some(o + 1),
                new_line_no: Some(n + 1),
            },
            Edit::Delete { old: o } => DiffLine {
                kind: LineKind::Delete,
                content: old[o].to_string(),
                old_line_no: Some(o + 1),
                new_line_no: None,
            },
            Edit::Insert { new: n } => DiffLine {
                kind: LineKind::Add,
                content: new[n].to_string(),
                old_line_no: None,
                new_line_no: Some(n + 1),
            },
        })
        .collect();

    let old_count = lines.iter().filter(|l| l.old_line_no.is_some()).count();
    let new_count = lines.iter().filter(|l| l.new_line_no.is_some()).count();
    Hunk {
        old_start: if old_count == 0 { old_before } else { old_before + 1 },
        old_count,
        new_start: if new_count == 0 { new_before } else { new_before + 1 },
        new_count,
        lines,
    }
}

/// Diffs two texts into hunks.
pub fn diff_text(old: &str, new: &str, options: &DiffOptions) -> Vec<Hunk> {
    let old_lines = split_lines(old);
    let new_lines = split_lines(new);
    let edits = edit_script(&old_lines, &new_lines, options.max_cells);
    build_hunks(&old_lines, &new_lines, &edits, options.context)
}

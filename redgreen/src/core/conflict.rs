//! Three-way conflict detection over concurrently produced revisions.
//!
//! Given a common ancestor and two divergent versions of a file, each branch
//! is diffed against the ancestor independently (line-level LCS alignment).
//! Edits are anchored at the ancestor position they replace; wherever both
//! branches inserted differing content at the same anchor, a content
//! conflict is emitted. Identical insertions at the same anchor are clean.
//!
//! Detection is derived data: regions are recomputed on demand and never
//! persisted. Merging resolved replacements back into a buffer is the
//! caller's responsibility (see [`crate::merge`]).

use serde::Serialize;

/// A region where both branches inserted differing content at the same
/// ancestor position. `start..end` is the replaced ancestor line range
/// (half-open, 0-based); a pure insertion has `start == end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictRegion {
    pub start: usize,
    pub end: usize,
    /// Lines inserted by the first branch.
    pub ours: Vec<String>,
    /// Lines inserted by the second branch.
    pub theirs: Vec<String>,
}

/// One edit of a branch relative to the ancestor: ancestor lines
/// `start..end` were replaced by `inserted`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Edit {
    start: usize,
    end: usize,
    inserted: Vec<String>,
}

/// Detect content conflicts between two revisions of a common ancestor.
pub fn detect(ancestor: &str, ours: &str, theirs: &str) -> Vec<ConflictRegion> {
    let base: Vec<&str> = ancestor.lines().collect();
    let ours_edits = edits_against(&base, &ours.lines().collect::<Vec<_>>());
    let theirs_edits = edits_against(&base, &theirs.lines().collect::<Vec<_>>());

    let mut regions = Vec::new();
    for edit in &ours_edits {
        if edit.inserted.is_empty() {
            continue;
        }
        let Some(other) = theirs_edits
            .iter()
            .find(|e| e.start == edit.start && !e.inserted.is_empty())
        else {
            continue;
        };
        if edit.inserted == other.inserted {
            continue;
        }
        regions.push(ConflictRegion {
            start: edit.start,
            end: edit.end.max(other.end),
            ours: edit.inserted.clone(),
            theirs: other.inserted.clone(),
        });
    }
    regions
}

/// Compute the edits of `branch` relative to `ancestor`, anchored at
/// ancestor positions.
fn edits_against(ancestor: &[&str], branch: &[&str]) -> Vec<Edit> {
    let matches = lcs_pairs(ancestor, branch);

    let mut edits = Vec::new();
    let mut ai = 0usize;
    let mut bi = 0usize;
    for &(a, b) in &matches {
        if a > ai || b > bi {
            edits.push(Edit {
                start: ai,
                end: a,
                inserted: branch[bi..b].iter().map(|s| s.to_string()).collect(),
            });
        }
        ai = a + 1;
        bi = b + 1;
    }
    if ai < ancestor.len() || bi < branch.len() {
        edits.push(Edit {
            start: ai,
            end: ancestor.len(),
            inserted: branch[bi..].iter().map(|s| s.to_string()).collect(),
        });
    }
    edits
}

/// Longest common subsequence of two line slices, returned as matched
/// index pairs in ascending order.
fn lcs_pairs(a: &[&str], b: &[&str]) -> Vec<(usize, usize)> {
    let (n, m) = (a.len(), b.len());
    let mut table = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if a[i] == b[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut pairs = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    while i < n && j < m {
        if a[i] == b[j] {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}

//! Merge base discovery.

use crate::Result;
use kiln_storage::{ObjectId, Repository};
use std::collections::HashSet;

/// Default cap on commits visited while searching for a merge base.
pub const DEFAULT_MAX_VISITED: usize = 10_000;

/// Finds a common ancestor of `a` and `b` by breadth-first search from both
/// sides, one generation at a time.
///
/// Returns `None` when the histories are disjoint or the search visits more
/// than `max_visited` commits.
pub fn find_merge_base(
    repo: &Repository,
    a: &ObjectId,
    b: &ObjectId,
    max_visited: usize,
) -> Result<Option<ObjectId>> {
    if a == b {
        return Ok(Some(*a));
    }

    let mut seen_a = HashSet::from([*a]);
    let mut seen_b = HashSet::from([*b]);
    let mut frontier_a = vec![*a];
    let mut frontier_b = vec![*b];
    let mut from_a = true;

    while !frontier_a.is_empty() || !frontier_b.is_empty() {
        let (frontier, seen, other) = if from_a {
            (&mut frontier_a, &mut seen_a, &seen_b)
        } else {
            (&mut frontier_b, &mut seen_b, &seen_a)
        };
        from_a = !from_a;

        let mut next = Vec::new();
        for id in frontier.drain(..) {
            let Some(commit) = repo.read_commit(&id)? else {
                continue;
            };
            for parent in commit.parents {
                if other.contains(&parent) {
                    return Ok(Some(parent));
                }
                if seen.insert(parent) {
                    next.push(parent);
                }
            }
        }
        *frontier = next;

        if seen_a.len() + seen_b.len() > max_visited {
            tracing::warn!(a = %a, b = %b, max_visited, "Merge base search exceeded limit");
            return Ok(None);
        }
    }

    Ok(None)
}

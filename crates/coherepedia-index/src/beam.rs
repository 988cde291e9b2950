//! Greedy best-first beam search shared by construction and queries.

use coherepedia_vector::{NodeId, NodeScore};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

/// Best-first search from `entry`, keeping the `width` best nodes seen.
///
/// Expands the best unexpanded candidate until it can no longer beat the
/// worst kept result, or until `max_expansions` nodes have been expanded.
/// Returns the kept results best first.
pub(crate) fn beam_search(
    entry: NodeId,
    width: usize,
    max_expansions: Option<usize>,
    mut score: impl FnMut(NodeId) -> f32,
    mut neighbors: impl FnMut(NodeId, &mut Vec<NodeId>),
) -> Vec<NodeScore> {
    let width = width.max(1);

    // Best on top
    let mut candidates: BinaryHeap<Reverse<NodeScore>> = BinaryHeap::new();
    // Worst on top
    let mut results: BinaryHeap<NodeScore> = BinaryHeap::with_capacity(width + 1);
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut buf = Vec::new();
    let mut expansions = 0usize;

    let start = NodeScore::new(entry, score(entry));
    visited.insert(entry);
    candidates.push(Reverse(start));
    results.push(start);

    while let Some(Reverse(current)) = candidates.pop() {
        if results.len() >= width {
            if let Some(worst) = results.peek() {
                if current.score < worst.score {
                    break;
                }
            }
        }

        if let Some(limit) = max_expansions {
            if expansions >= limit {
                break;
            }
        }
        expansions += 1;

        neighbors(current.node, &mut buf);
        for &neighbor in &buf {
            if !visited.insert(neighbor) {
                continue;
            }

            let s = score(neighbor);
            let admit = results.len() < width
                || results.peek().map(|w| s > w.score).unwrap_or(true);

            if admit {
                let candidate = NodeScore::new(neighbor, s);
                candidates.push(Reverse(candidate));
                results.push(candidate);
                if results.len() > width {
                    results.pop();
                }
            }
        }
    }

    results.into_sorted_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Path graph 0 - 1 - 2 - ... - 9, query closest to node 7.
    fn path_neighbors(id: NodeId, out: &mut Vec<NodeId>) {
        out.clear();
        if id > 0 {
            out.push(id - 1);
        }
        if id < 9 {
            out.push(id + 1);
        }
    }

    fn score_near_seven(id: NodeId) -> f32 {
        1.0 / (1.0 + (id as f32 - 7.0).abs())
    }

    #[test]
    fn test_finds_best_node() {
        let results = beam_search(0, 3, None, score_near_seven, path_neighbors);

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].node, 7);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_expansion_budget() {
        let results = beam_search(0, 3, Some(2), score_near_seven, path_neighbors);

        // Expanded 0 and 1 only, so 2 is the furthest node reached.
        assert_eq!(results[0].node, 2);
    }

    #[test]
    fn test_single_node() {
        let results = beam_search(4, 10, None, |_| 0.5, |_, out| out.clear());
        assert_eq!(results, vec![NodeScore::new(4, 0.5)]);
    }
}

//! Scored search results.

/// Node ID type (u32 supports ~4 billion vectors).
pub type NodeId = u32;

/// A node paired with its similarity to a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeScore {
    /// The node ID.
    pub node: NodeId,
    /// Similarity score (higher = more similar).
    pub score: f32,
}

impl NodeScore {
    /// Create a new scored node.
    pub fn new(node: NodeId, score: f32) -> Self {
        Self { node, score }
    }
}

impl Eq for NodeScore {}

impl PartialOrd for NodeScore {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeScore {
    /// Result order: best first, meaning descending score, then ascending
    /// node ID so that exact ties come out deterministically.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.node.cmp(&other.node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_score_ordering() {
        let a = NodeScore::new(1, 0.5);
        let b = NodeScore::new(2, 0.9);
        let c = NodeScore::new(3, 0.1);

        let mut scores = vec![a, b, c];
        scores.sort();

        assert_eq!(scores[0].node, 2);
        assert_eq!(scores[1].node, 1);
        assert_eq!(scores[2].node, 3);
    }

    #[test]
    fn test_ties_break_by_ascending_id() {
        let mut scores = vec![
            NodeScore::new(9, 0.7),
            NodeScore::new(4, 0.7),
            NodeScore::new(6, 0.7),
        ];
        scores.sort();

        let ids: Vec<_> = scores.iter().map(|s| s.node).collect();
        assert_eq!(ids, vec![4, 6, 9]);
    }
}

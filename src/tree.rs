use serde::Serialize;
use std::fmt::Write;

/// A node of a cluster tree
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TreeNode {
    Leaf {
        id: String,
        /// Position of the record in the input collection
        index: usize,
    },
    Internal {
        left: Box<TreeNode>,
        right: Box<TreeNode>,
        height: f64,
    },
}

impl TreeNode {
    pub fn leaf(id: impl Into<String>, index: usize) -> Self {
        Self::Leaf {
            id: id.into(),
            index,
        }
    }

    pub fn internal(left: TreeNode, right: TreeNode, height: f64) -> Self {
        Self::Internal {
            left: Box::new(left),
            right: Box::new(right),
            height,
        }
    }

    /// Merge height; leaves sit at 0
    pub fn height(&self) -> f64 {
        match self {
            Self::Leaf { .. } => 0.0,
            Self::Internal { height, .. } => *height,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf { .. })
    }

    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Leaf { .. } => 1,
            Self::Internal { left, right, .. } => left.leaf_count() + right.leaf_count(),
        }
    }

    pub fn internal_count(&self) -> usize {
        match self {
            Self::Leaf { .. } => 0,
            Self::Internal { left, right, .. } => 1 + left.internal_count() + right.internal_count(),
        }
    }

    /// Leaves from left to right
    pub fn leaves(&self) -> Vec<(&str, usize)> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<(&'a str, usize)>) {
        match self {
            Self::Leaf { id, index } => out.push((id.as_str(), *index)),
            Self::Internal { left, right, .. } => {
                left.collect_leaves(out);
                right.collect_leaves(out);
            }
        }
    }

    fn write_newick(&self, out: &mut String, parent_height: f64) {
        match self {
            Self::Leaf { id, .. } => out.push_str(&newick_label(id)),
            Self::Internal { left, right, .. } => {
                out.push('(');
                left.write_newick(out, self.height());
                out.push(',');
                right.write_newick(out, self.height());
                out.push(')');
            }
        }
        if parent_height.is_finite() {
            let _ = write!(out, ":{}", parent_height - self.height());
        }
    }
}

/// Rooted binary tree built by agglomerative clustering
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterTree {
    pub root: TreeNode,
}

impl ClusterTree {
    pub fn new(root: TreeNode) -> Self {
        Self { root }
    }

    pub fn leaf_count(&self) -> usize {
        self.root.leaf_count()
    }

    pub fn internal_count(&self) -> usize {
        self.root.internal_count()
    }

    pub fn leaf_ids(&self) -> Vec<&str> {
        self.root.leaves().into_iter().map(|(id, _)| id).collect()
    }

    pub fn height(&self) -> f64 {
        self.root.height()
    }

    /// Newick string; branch lengths are height differences between a node
    /// and its parent
    pub fn to_newick(&self) -> String {
        let mut out = String::new();
        self.root.write_newick(&mut out, f64::NAN);
        out.push(';');
        out
    }
}

// Quote labels that would break Newick parsing
fn newick_label(id: &str) -> String {
    if id
        .chars()
        .any(|c| c.is_whitespace() || "()[]':;,".contains(c))
    {
        format!("'{}'", id.replace('\'', "''"))
    } else {
        id.to_string()
    }
}

//! Endpoint tree nodes as reported by the controller's menu

use serde::{Deserialize, Serialize};

/// One entry of the controller's menu tree.
///
/// The URI is the identity of a node within a discovery pass. Labels are
/// neither unique nor stable across firmware upgrades.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointNode {
    /// Absolute variable URI, e.g. `/120/10101/0/0/12197`
    pub uri: String,
    /// Label of this node as reported by the device
    pub label: String,
    /// Labels from the functional block down to this node, inclusive
    pub label_path: Vec<String>,
    /// URI of the enclosing node, `None` for functional blocks
    pub parent: Option<String>,
    /// Whether the node has no children
    pub is_leaf: bool,
}

impl EndpointNode {
    /// Label of the functional block ("fub") this node belongs to
    pub fn fub(&self) -> &str {
        self.label_path
            .first()
            .map(|s| s.as_str())
            .unwrap_or(self.label.as_str())
    }

    /// Human readable position in the tree, e.g. `Kessel > Eingänge > Kesselfühler`
    pub fn display_path(&self) -> String {
        if self.label_path.is_empty() {
            return self.label.clone();
        }
        self.label_path.join(" > ")
    }

    /// Grouping key for nodes that share the same label path
    pub fn path_key(&self) -> String {
        let mut key = String::new();
        for label in &self.label_path {
            key.push('_');
            key.push_str(label);
        }
        key
    }

    /// Depth below the functional block (functional blocks are depth 0)
    pub fn depth(&self) -> usize {
        self.label_path.len().saturating_sub(1)
    }
}

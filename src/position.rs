use serde::{Deserialize, Serialize};

/// Coordinates of the question a session is waiting on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub current_asset_index: usize,
    pub current_tree_index: usize,
    pub current_node_id: String,
}

impl Position {
    pub fn new(asset_index: usize, tree_index: usize, node_id: impl Into<String>) -> Self {
        Self {
            current_asset_index: asset_index,
            current_tree_index: tree_index,
            current_node_id: node_id.into(),
        }
    }

    /// Move to the root of another tree on the same asset.
    pub fn enter_tree(&mut self, tree_index: usize, root: &str) {
        self.current_tree_index = tree_index;
        self.current_node_id = root.to_string();
    }

    /// Move to the first tree of another asset.
    pub fn enter_asset(&mut self, asset_index: usize, first_root: &str) {
        self.current_asset_index = asset_index;
        self.enter_tree(0, first_root);
    }
}

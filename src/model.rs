//! Layout request/response model
//!
//! The shapes exchanged with external collaborators: blocks and links in,
//! positioned blocks and statistics out.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Stable node identifier (Arc<str> for zero-cost cloning)
pub type NodeId = Arc<str>;

/// A content block as supplied by the annotation layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockInput {
    pub id: String,
    #[serde(default)]
    pub is_pinned: bool,
    /// Explicit pinned level (ignored for unpinned blocks)
    #[serde(default, alias = "pinned_level")]
    pub level: Option<u32>,
}

impl BlockInput {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_pinned: false,
            level: None,
        }
    }

    pub fn pinned(id: impl Into<String>, level: Option<u32>) -> Self {
        Self {
            id: id.into(),
            is_pinned: true,
            level,
        }
    }
}

/// A directed link between two blocks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct LinkInput {
    pub source_id: String,
    pub target_id: String,
}

impl LinkInput {
    pub fn new(source_id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
        }
    }
}

/// Per-request layout options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LayoutOptions {
    /// Vertical distance between virtual rows inside one level
    pub sublevel_spacing: f64,
    /// Vertical distance between consecutive levels
    pub layer_spacing: f64,
    /// Horizontal distance per unit of order
    pub horizontal_spacing: f64,
    /// Apply the two-pass median layer optimization
    pub optimize_layout: bool,
    /// Density threshold T for a sublevel
    pub blocks_per_sublevel: usize,
    /// Fail on conflicting explicit pin levels instead of reassigning
    pub strict_pins: bool,
}

/// Block 200x80 with gaps 40 (horizontal) and 50 (vertical)
const BLOCK_WIDTH: f64 = 200.0;
const BLOCK_HEIGHT: f64 = 80.0;
const HORIZONTAL_GAP: f64 = 40.0;
const VERTICAL_GAP: f64 = 50.0;

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            sublevel_spacing: 40.0,
            layer_spacing: BLOCK_HEIGHT + VERTICAL_GAP,
            horizontal_spacing: BLOCK_WIDTH + HORIZONTAL_GAP,
            optimize_layout: true,
            blocks_per_sublevel: 10,
            strict_pins: false,
        }
    }
}

/// Full relayout request
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LayoutRequest {
    pub nodes: Vec<BlockInput>,
    #[serde(default)]
    pub edges: Vec<LinkInput>,
    #[serde(default)]
    pub options: Option<LayoutOptions>,
}

/// Engine-computed layout properties of one node (what gets persisted)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct NodeLayout {
    pub layer: u32,
    pub order: f64,
    pub level: u32,
    pub sublevel_id: u32,
    pub x: f64,
    pub y: f64,
}

/// A positioned block in the response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockLayout {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub layer: u32,
    pub level: u32,
    pub sublevel_id: u32,
    pub order: f64,
}

/// A pin conflict and how it was resolved
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PinConflict {
    /// Later-declared node that lost the level
    pub node_id: String,
    /// Node that keeps the requested level
    pub holder: String,
    pub requested: u32,
    pub assigned: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LayoutStatistics {
    pub total_blocks: usize,
    pub total_links: usize,
    pub total_levels: usize,
    pub total_sublevels: usize,
    pub max_layer: u32,
    pub is_acyclic: bool,
    pub isolated_blocks: usize,
    pub pinned_blocks: usize,
    pub unpinned_blocks: usize,
    pub total_width: f64,
    pub total_height: f64,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LayoutResponse {
    pub blocks: Vec<BlockLayout>,
    pub statistics: LayoutStatistics,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pin_conflicts: Vec<PinConflict>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl LayoutResponse {
    /// Failed response; statistics carry what is known about the input
    pub fn failure(error: impl Into<String>, statistics: LayoutStatistics) -> Self {
        Self {
            blocks: Vec::new(),
            statistics,
            pin_conflicts: Vec::new(),
            success: false,
            error_message: Some(error.into()),
        }
    }

    /// Look up a block by id
    pub fn block(&self, id: &str) -> Option<&BlockLayout> {
        self.blocks.iter().find(|b| b.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses_from_yaml_with_defaults() {
        let yaml = r#"
nodes:
  - id: a
  - id: b
    is_pinned: true
    level: 2
edges:
  - source_id: a
    target_id: b
"#;
        let request: LayoutRequest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(request.nodes.len(), 2);
        assert!(!request.nodes[0].is_pinned);
        assert_eq!(request.nodes[1].level, Some(2));
        assert!(request.options.is_none());
    }

    #[test]
    fn pinned_level_alias_is_accepted() {
        let json = r#"{"id": "x", "is_pinned": true, "pinned_level": 4}"#;
        let block: BlockInput = serde_json::from_str(json).unwrap();
        assert_eq!(block.level, Some(4));
    }

    #[test]
    fn partial_options_keep_defaults() {
        let json = r#"{"blocks_per_sublevel": 3}"#;
        let options: LayoutOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.blocks_per_sublevel, 3);
        assert_eq!(options.layer_spacing, 130.0);
        assert_eq!(options.horizontal_spacing, 240.0);
    }

    #[test]
    fn failure_response_omits_blocks() {
        let response = LayoutResponse::failure("boom", LayoutStatistics::default());
        assert!(!response.success);
        assert_eq!(response.error_message.as_deref(), Some("boom"));
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("pin_conflicts").is_none());
    }
}

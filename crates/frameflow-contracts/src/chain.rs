use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FlowError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorationNode {
    pub id: String,
    pub prompt: String,
    pub source_frame_image: String,
    pub video_url: String,
}

impl ExplorationNode {
    pub fn new(
        prompt: impl Into<String>,
        source_frame_image: impl Into<String>,
        video_url: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            source_frame_image: source_frame_image.into(),
            video_url: video_url.into(),
        }
    }
}

/// Linear path of explorations. Branching is truncate-then-append: going
/// back to an earlier node drops everything after it for good.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExplorationChain {
    nodes: Vec<ExplorationNode>,
}

impl ExplorationChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, node: ExplorationNode) {
        self.nodes.push(node);
    }

    /// Keeps `[0..=index]`; the node at `index` becomes current.
    pub fn navigate_to(&mut self, index: usize) -> Result<&ExplorationNode, FlowError> {
        if index >= self.nodes.len() {
            return Err(FlowError::invalid_input(format!(
                "No exploration at index {index} (chain depth {}).",
                self.nodes.len()
            )));
        }
        self.nodes.truncate(index + 1);
        Ok(&self.nodes[index])
    }

    pub fn reset(&mut self) {
        self.nodes.clear();
    }

    pub fn current(&self) -> Option<&ExplorationNode> {
        self.nodes.last()
    }

    pub fn nodes(&self) -> &[ExplorationNode] {
        self.nodes.as_slice()
    }

    pub fn depth(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_root(&self) -> bool {
        self.nodes.is_empty()
    }

    /// `Start > prompt 1 > prompt 2`, prompts shortened to `max_chars`.
    pub fn breadcrumbs(&self, max_chars: usize) -> String {
        let mut parts = vec!["Start".to_string()];
        for node in &self.nodes {
            let label = node.prompt.trim();
            if label.chars().count() > max_chars {
                parts.push(label.chars().take(max_chars).collect::<String>() + "…");
            } else {
                parts.push(label.to_string());
            }
        }
        parts.join(" > ")
    }
}

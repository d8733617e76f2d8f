mod registry;
mod selectors;

pub use registry::{ModelRegistry, VideoModelSpec, DEFAULT_VIDEO_MODEL};
pub use selectors::{ModelSelection, ModelSelector, VideoTaskShape};

use serde::{Deserialize, Serialize};

/// Sampling progress reported over ComfyUI's WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub current_step: u32,
    pub total_steps: u32,
}

/// Reference to an image stored in ComfyUI's output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_img_type")]
    pub img_type: String,
}

fn default_img_type() -> String {
    "output".to_string()
}

/// Parsed history entry for a queued prompt.
#[derive(Debug, Clone)]
pub struct PromptHistory {
    pub status: String,
    pub completed: bool,
    pub images: Vec<ImageRef>,
}

/// Outcome of waiting for a generation to finish.
#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    /// Generation completed successfully with output images.
    Completed { images: Vec<ImageRef> },
    /// ComfyUI reported an execution-level failure.
    Failed { error: String },
    /// Timed out before completion.
    TimedOut,
}

//! # comfyui-workflow
//!
//! Run a workflow exported from [ComfyUI](https://github.com/comfyanonymous/ComfyUI)
//! ("Save (API format)") with a handful of overrides applied, straight from
//! the command line.
//!
//! The crate is split the same way the binary works:
//!
//! - [`workflow`] merges an options document into the exported node graph.
//! - [`client`] and [`submit`] queue the result on a ComfyUI server, follow
//!   progress over the WebSocket, and save the output images.
//! - [`driver`] validates the command line and ties the two together behind
//!   the [`WorkflowModifier`] and [`WorkflowSubmitter`] traits.
//!
//! ## Library use
//!
//! ```no_run
//! use comfyui_workflow::{invoke_comfyui, modify_workflow, ConnectionConfig};
//! use serde_json::json;
//!
//! # async fn example() -> comfyui_workflow::Result<()> {
//! let exported: serde_json::Value =
//!     serde_json::from_str(&std::fs::read_to_string("flow-api.json").unwrap())?;
//! let workflow = modify_workflow(&exported, &json!({"prompt": "a red fox", "seed": -1}))?;
//! let saved = invoke_comfyui(&workflow, &ConnectionConfig::from_env()).await?;
//! println!("wrote {} image(s)", saved.len());
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod logging;
pub mod submit;
pub mod types;
pub mod validate;
pub mod workflow;

pub use cli::Cli;
pub use client::ComfyClient;
pub use config::ConnectionConfig;
pub use driver::{execute, Status, WorkflowModifier, WorkflowSubmitter};
pub use error::{ComfyError, Result};
pub use submit::{invoke_comfyui, ComfyUiSubmitter};
pub use types::{GenerationOutcome, ImageRef, ProgressUpdate, PromptHistory};
pub use workflow::{modify_workflow, OptionsModifier, Seed, WorkflowOptions};

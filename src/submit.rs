use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::ComfyClient;
use crate::config::ConnectionConfig;
use crate::driver::WorkflowSubmitter;
use crate::error::{ComfyError, Result};
use crate::types::{GenerationOutcome, ImageRef};

/// Upper bound on waiting for one generation.
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(600);

/// Build a client for `connection`, with a fresh client id and basic auth
/// when a username is configured.
pub fn client_for(connection: &ConnectionConfig) -> ComfyClient {
    let client =
        ComfyClient::new(connection.url.clone()).with_client_id(Uuid::new_v4().to_string());
    match &connection.username {
        Some(username) => client.with_basic_auth(username.clone(), connection.password.clone()),
        None => client,
    }
}

/// Queue `workflow`, wait for it, and save its images in the current directory.
///
/// Returns the paths written.
pub async fn invoke_comfyui(
    workflow: &Value,
    connection: &ConnectionConfig,
) -> Result<Vec<PathBuf>> {
    ComfyUiSubmitter::default().run(workflow, connection).await
}

/// [`WorkflowSubmitter`] that runs the workflow on a real ComfyUI server.
#[derive(Debug, Clone)]
pub struct ComfyUiSubmitter {
    output_dir: PathBuf,
    timeout: Duration,
}

impl Default for ComfyUiSubmitter {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            timeout: GENERATION_TIMEOUT,
        }
    }
}

impl ComfyUiSubmitter {
    /// Directory the downloaded images are written to.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// How long to wait for the generation before giving up.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Queue, wait, download. Returns the paths of the saved images.
    pub async fn run(&self, workflow: &Value, connection: &ConnectionConfig) -> Result<Vec<PathBuf>> {
        let client = client_for(connection);
        let prompt_id = client.queue_prompt(workflow).await?;
        info!("Queued prompt {}", prompt_id);

        let outcome = client
            .wait_for_completion_ws(&prompt_id, self.timeout, |p| {
                info!("Step {}/{}", p.current_step, p.total_steps)
            })
            .await?;

        let images = match outcome {
            GenerationOutcome::Completed { images } => images,
            GenerationOutcome::Failed { error } => {
                return Err(ComfyError::GenerationFailed(error))
            }
            GenerationOutcome::TimedOut => return Err(ComfyError::Timeout),
        };
        debug!("Prompt {} produced {} image(s)", prompt_id, images.len());

        let mut saved = Vec::with_capacity(images.len());
        for img in &images {
            let bytes = client.image(img).await?;
            let path = self.output_path(img)?;
            tokio::fs::write(&path, &bytes)
                .await
                .map_err(|e| ComfyError::Io {
                    context: format!("Failed to write {}", path.display()),
                    source: e,
                })?;
            info!("Saved {} ({} bytes)", path.display(), bytes.len());
            saved.push(path);
        }
        Ok(saved)
    }

    /// Local path for an output image: its bare file name inside the output
    /// directory, whatever subfolder it had on the server.
    fn output_path(&self, img: &ImageRef) -> Result<PathBuf> {
        Path::new(&img.filename)
            .file_name()
            .map(|name| self.output_dir.join(name))
            .ok_or_else(|| {
                ComfyError::InvalidResponse(format!("Unusable image filename {:?}", img.filename))
            })
    }
}

impl WorkflowSubmitter for ComfyUiSubmitter {
    async fn submit(&self, workflow: &Value, connection: &ConnectionConfig) -> Result<()> {
        self.run(workflow, connection).await.map(|_| ())
    }
}

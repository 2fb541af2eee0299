use base64::Engine;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, warn};

use crate::error::{ComfyError, Result};
use crate::types::*;

const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Longest the WebSocket may stay silent before switching to polling.
const WS_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

fn normalize(endpoint: String) -> String {
    endpoint.trim_end_matches('/').to_string()
}

fn connect_context(endpoint: &str) -> String {
    format!(
        "Cannot connect to ComfyUI at {} (is the service running?)",
        endpoint
    )
}

#[derive(Debug, Clone)]
struct BasicAuth {
    username: String,
    password: Option<String>,
}

impl BasicAuth {
    fn header_value(&self) -> String {
        let credentials = format!(
            "{}:{}",
            self.username,
            self.password.as_deref().unwrap_or_default()
        );
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(credentials)
        )
    }
}

/// Async client for a ComfyUI server instance.
///
/// Covers what a single generation needs: queueing a prompt, following it
/// over the WebSocket (or by polling `/history`), and downloading the
/// resulting images. Every request carries basic auth when configured.
///
/// # Example
/// ```no_run
/// use comfyui_workflow::ComfyClient;
///
/// # async fn example(workflow: serde_json::Value) -> comfyui_workflow::Result<()> {
/// let client = ComfyClient::new("http://127.0.0.1:8188")
///     .with_basic_auth("artist", Some("secret".to_string()));
/// let prompt_id = client.queue_prompt(&workflow).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ComfyClient {
    http: Client,
    endpoint: String,
    client_id: String,
    auth: Option<BasicAuth>,
}

impl ComfyClient {
    /// Create a new client pointing at the given ComfyUI endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: normalize(endpoint.into()),
            client_id: "comfyui-workflow".to_string(),
            auth: None,
        }
    }

    /// Set the client ID used for WebSocket filtering and prompt association.
    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    /// Authenticate every request with HTTP basic auth.
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.auth = Some(BasicAuth {
            username: username.into(),
            password,
        });
        self
    }

    /// Returns the configured endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the configured client ID.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Value of the `Authorization` header, if credentials are set.
    pub fn authorization(&self) -> Option<String> {
        self.auth.as_ref().map(BasicAuth::header_value)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some(auth) => request.basic_auth(&auth.username, auth.password.as_ref()),
            None => request,
        }
    }

    // ── Prompt ──────────────────────────────────────────────────────

    /// Queue a workflow for execution. Returns the `prompt_id`.
    pub async fn queue_prompt(&self, workflow: &Value) -> Result<String> {
        let url = format!("{}/prompt", self.endpoint);
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": self.client_id,
        });

        let resp = self
            .authorize(self.http.post(&url))
            .timeout(Duration::from_secs(30))
            .json(&body)
            .send()
            .await
            .map_err(|e| ComfyError::Network {
                context: connect_context(&self.endpoint),
                source: e,
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body_text = resp.text().await.unwrap_or_default();
            return Err(ComfyError::Http {
                status,
                body: body_text,
            });
        }

        let json: Value = resp.json().await.map_err(|e| ComfyError::Network {
            context: "Failed to parse ComfyUI /prompt response".into(),
            source: e,
        })?;

        parse_prompt_response(&json)
    }

    // ── History ─────────────────────────────────────────────────────

    /// Fetch the history entry for a prompt. Returns `None` if not yet available.
    pub async fn history(&self, prompt_id: &str) -> Result<Option<PromptHistory>> {
        let url = format!("{}/history/{}", self.endpoint, prompt_id);
        let resp = self
            .authorize(self.http.get(&url))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| ComfyError::Network {
                context: "Failed to fetch ComfyUI history".into(),
                source: e,
            })?;

        if !resp.status().is_success() {
            return Ok(None);
        }

        let json: Value = resp.json().await.map_err(|e| ComfyError::Network {
            context: "Failed to parse ComfyUI history response".into(),
            source: e,
        })?;

        Ok(parse_history_entry(&json, prompt_id))
    }

    // ── Image download ──────────────────────────────────────────────

    /// Download an output image by its reference. Returns raw bytes.
    pub async fn image(&self, img: &ImageRef) -> Result<Vec<u8>> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/view", self.endpoint),
            &[
                ("filename", img.filename.as_str()),
                ("subfolder", img.subfolder.as_str()),
                ("type", img.img_type.as_str()),
            ],
        )
        .map_err(|e| ComfyError::InvalidResponse(format!("Bad image URL: {}", e)))?;

        let resp = self
            .authorize(self.http.get(url))
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| ComfyError::Network {
                context: format!("Failed to fetch image {} from ComfyUI", img.filename),
                source: e,
            })?;

        if !resp.status().is_success() {
            return Err(ComfyError::Http {
                status: resp.status().as_u16(),
                body: format!("Failed to fetch image {}", img.filename),
            });
        }

        let bytes = resp.bytes().await.map_err(|e| ComfyError::Network {
            context: "Failed to read image bytes".into(),
            source: e,
        })?;
        Ok(bytes.to_vec())
    }

    // ── Completion waiting ──────────────────────────────────────────

    /// Wait for completion using ComfyUI's WebSocket for real-time step
    /// progress. Calls `on_progress` for each sampling step. Falls back
    /// to polling `/history` if the WebSocket cannot be opened, closes, or
    /// goes quiet.
    ///
    /// `timeout` bounds the whole wait, fallback included.
    pub async fn wait_for_completion_ws<F>(
        &self,
        prompt_id: &str,
        timeout: Duration,
        mut on_progress: F,
    ) -> Result<GenerationOutcome>
    where
        F: FnMut(ProgressUpdate),
    {
        let deadline = Instant::now() + timeout;

        let mut request = match self.ws_url().into_client_request() {
            Ok(r) => r,
            Err(e) => {
                warn!("Bad WebSocket URL: {}, falling back to polling", e);
                return self.poll_until(prompt_id, deadline).await;
            }
        };
        if let Some(value) = self
            .authorization()
            .and_then(|v| HeaderValue::from_str(&v).ok())
        {
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let connect = tokio::time::timeout(
            remaining(deadline),
            tokio_tungstenite::connect_async(request),
        );
        let mut ws = match connect.await {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => {
                warn!("WebSocket failed: {}, falling back to polling", e);
                return self.poll_until(prompt_id, deadline).await;
            }
            Err(_) => return Ok(GenerationOutcome::TimedOut),
        };

        let mut our_msg_count: usize = 0;
        let mut total_msg_count: usize = 0;
        const MAX_OUR_MESSAGES: usize = 10_000;
        const MAX_TOTAL_MESSAGES: usize = 50_000;

        loop {
            let left = remaining(deadline);
            if left.is_zero() {
                return Ok(GenerationOutcome::TimedOut);
            }
            let msg = match tokio::time::timeout(left.min(WS_IDLE_TIMEOUT), ws.next()).await {
                Ok(Some(msg)) => msg,
                Ok(None) | Err(_) => break,
            };

            total_msg_count += 1;
            if total_msg_count > MAX_TOTAL_MESSAGES {
                warn!(
                    "WebSocket exceeded {} total messages, falling back to polling",
                    MAX_TOTAL_MESSAGES
                );
                break;
            }

            let text = match msg {
                Ok(m) if m.is_text() => m.into_text().unwrap_or_default(),
                Ok(_) => continue,
                Err(_) => break,
            };

            let json: Value = match serde_json::from_str(&text) {
                Ok(j) => j,
                Err(_) => continue,
            };

            let msg_type = json.get("type").and_then(|v| v.as_str()).unwrap_or("");
            let data = json.get("data");
            let pid = data
                .and_then(|d| d.get("prompt_id"))
                .and_then(|v| v.as_str());

            // Skip messages for other prompts
            if pid.is_some() && pid != Some(prompt_id) {
                continue;
            }

            if pid == Some(prompt_id) {
                our_msg_count += 1;
                if our_msg_count > MAX_OUR_MESSAGES {
                    warn!(
                        "Prompt {} exceeded {} messages, falling back to polling",
                        prompt_id, MAX_OUR_MESSAGES
                    );
                    break;
                }
            }

            match msg_type {
                "progress" => {
                    if let Some(d) = data {
                        on_progress(parse_progress(d));
                    }
                }
                "executing"
                    if data
                        .and_then(|d| d.get("node"))
                        .map(|v| v.is_null())
                        .unwrap_or(false) =>
                {
                    // node: null marks the end of the prompt
                    return self.fetch_outcome(prompt_id).await;
                }
                "executing" => {
                    if let Some(node) = data.and_then(|d| d.get("node")).and_then(|v| v.as_str()) {
                        debug!("Executing node {}", node);
                    }
                }
                "execution_error" => {
                    let err = data
                        .and_then(|d| d.get("exception_message"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("Unknown error");
                    return Ok(GenerationOutcome::Failed {
                        error: format!("ComfyUI error: {}", err),
                    });
                }
                _ => {}
            }
        }

        // Socket closed or went quiet
        self.poll_until(prompt_id, deadline).await
    }

    /// Poll `/history` until the prompt completes, fails, or `deadline` passes.
    async fn poll_until(&self, prompt_id: &str, deadline: Instant) -> Result<GenerationOutcome> {
        loop {
            let left = remaining(deadline);
            if left.is_zero() {
                return Ok(GenerationOutcome::TimedOut);
            }
            let history = match tokio::time::timeout(left, self.history(prompt_id)).await {
                Ok(history) => history?,
                Err(_) => return Ok(GenerationOutcome::TimedOut),
            };
            if let Some(history) = history {
                if history.completed {
                    return Ok(GenerationOutcome::Completed {
                        images: history.images,
                    });
                } else if history.status == "error" {
                    return Ok(GenerationOutcome::Failed {
                        error: "ComfyUI generation failed".into(),
                    });
                }
            }
            tokio::time::sleep(POLL_INTERVAL.min(remaining(deadline))).await;
        }
    }

    fn ws_url(&self) -> String {
        format!(
            "{}/ws?clientId={}",
            self.endpoint
                .replace("http://", "ws://")
                .replace("https://", "wss://"),
            self.client_id
        )
    }

    async fn fetch_outcome(&self, prompt_id: &str) -> Result<GenerationOutcome> {
        match self.history(prompt_id).await? {
            Some(history) if history.completed => Ok(GenerationOutcome::Completed {
                images: history.images,
            }),
            Some(_) => Ok(GenerationOutcome::Failed {
                error: "Generation failed".into(),
            }),
            None => Ok(GenerationOutcome::Failed {
                error: "No history found after generation".into(),
            }),
        }
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Step counters from a `progress` message, saturating at `u32::MAX`.
fn parse_progress(data: &Value) -> ProgressUpdate {
    let counter = |key: &str, default: u64| {
        let raw = data.get(key).and_then(|v| v.as_u64()).unwrap_or(default);
        u32::try_from(raw).unwrap_or(u32::MAX)
    };
    ProgressUpdate {
        current_step: counter("value", 0),
        total_steps: counter("max", 1),
    }
}

fn parse_prompt_response(json: &Value) -> Result<String> {
    if let Some(errors) = json.get("node_errors") {
        if let Some(obj) = errors.as_object() {
            if !obj.is_empty() {
                return Err(ComfyError::NodeErrors(
                    serde_json::to_string_pretty(errors).unwrap_or_default(),
                ));
            }
        }
    }

    json.get("prompt_id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ComfyError::InvalidResponse("Response missing prompt_id".into()))
}

fn parse_history_entry(json: &Value, prompt_id: &str) -> Option<PromptHistory> {
    let entry = json.get(prompt_id)?;

    let status = entry
        .pointer("/status/status_str")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");

    let completed = entry
        .pointer("/status/completed")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let images = entry
        .get("outputs")
        .and_then(|o| o.as_object())
        .into_iter()
        .flat_map(|outputs| outputs.values())
        .filter_map(|node_output| node_output.get("images").and_then(|i| i.as_array()))
        .flatten()
        .filter_map(|img| serde_json::from_value::<ImageRef>(img.clone()).ok())
        .collect();

    Some(PromptHistory {
        status: status.to_string(),
        completed,
        images,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize("http://localhost:8188/".into()), "http://localhost:8188");
        assert_eq!(normalize("http://localhost:8188".into()), "http://localhost:8188");
        assert_eq!(normalize("http://host:8188///".into()), "http://host:8188");
    }

    #[test]
    fn test_client_builder() {
        let client = ComfyClient::new("http://127.0.0.1:8188/").with_client_id("run-1");
        assert_eq!(client.endpoint(), "http://127.0.0.1:8188");
        assert_eq!(client.client_id(), "run-1");
        assert!(client.authorization().is_none());
    }

    #[test]
    fn test_ws_url() {
        let client = ComfyClient::new("https://comfy.example.com").with_client_id("abc");
        assert_eq!(client.ws_url(), "wss://comfy.example.com/ws?clientId=abc");

        let client = ComfyClient::new("http://localhost:8188").with_client_id("abc");
        assert_eq!(client.ws_url(), "ws://localhost:8188/ws?clientId=abc");
    }

    #[test]
    fn test_basic_auth_header() {
        let client = ComfyClient::new("http://localhost:8188")
            .with_basic_auth("aladdin", Some("opensesame".into()));
        assert_eq!(
            client.authorization().as_deref(),
            Some("Basic YWxhZGRpbjpvcGVuc2VzYW1l")
        );
    }

    #[test]
    fn test_basic_auth_without_password() {
        let client = ComfyClient::new("http://localhost:8188").with_basic_auth("user", None);
        // base64("user:")
        assert_eq!(client.authorization().as_deref(), Some("Basic dXNlcjo="));
    }

    #[test]
    fn test_parse_history_response() {
        let json: Value = serde_json::from_str(
            r#"{
            "abc123": {
                "status": {"status_str": "success", "completed": true},
                "outputs": {
                    "9": {
                        "images": [
                            {"filename": "ComfyUI_00001_.png", "subfolder": "", "type": "output"},
                            {"filename": "ComfyUI_00002_.png", "subfolder": "run"}
                        ]
                    },
                    "10": {"text": ["not an image"]}
                }
            }
        }"#,
        )
        .unwrap();

        let history = parse_history_entry(&json, "abc123").unwrap();
        assert_eq!(history.status, "success");
        assert!(history.completed);
        assert_eq!(history.images.len(), 2);
        assert_eq!(history.images[0].filename, "ComfyUI_00001_.png");
        assert_eq!(history.images[1].subfolder, "run");
        assert_eq!(history.images[1].img_type, "output");
    }

    #[test]
    fn test_parse_history_missing_prompt() {
        let json: Value = serde_json::from_str(r#"{"other": {}}"#).unwrap();
        assert!(parse_history_entry(&json, "abc123").is_none());
    }

    #[test]
    fn test_parse_history_in_progress() {
        let json: Value = serde_json::from_str(r#"{"abc": {"outputs": {}}}"#).unwrap();
        let history = parse_history_entry(&json, "abc").unwrap();
        assert_eq!(history.status, "unknown");
        assert!(!history.completed);
        assert!(history.images.is_empty());
    }

    #[test]
    fn test_parse_prompt_response() {
        let json: Value = serde_json::from_str(
            r#"{
            "prompt_id": "abc-123-def",
            "number": 1,
            "node_errors": {}
        }"#,
        )
        .unwrap();
        assert_eq!(parse_prompt_response(&json).unwrap(), "abc-123-def");
    }

    #[test]
    fn test_parse_prompt_response_node_errors() {
        let json: Value = serde_json::from_str(
            r#"{
            "prompt_id": "abc",
            "node_errors": {"5": {"errors": [{"message": "Value not in list"}]}}
        }"#,
        )
        .unwrap();
        let err = parse_prompt_response(&json).unwrap_err();
        assert!(matches!(err, ComfyError::NodeErrors(ref s) if s.contains("Value not in list")));
    }

    #[test]
    fn test_parse_prompt_response_missing_id() {
        let json: Value = serde_json::from_str(r#"{"number": 3}"#).unwrap();
        let err = parse_prompt_response(&json).unwrap_err();
        assert!(matches!(err, ComfyError::InvalidResponse(_)));
    }

    #[test]
    fn test_parse_progress() {
        let update = parse_progress(&serde_json::json!({"value": 3, "max": 20}));
        assert_eq!(update, ProgressUpdate { current_step: 3, total_steps: 20 });

        let update = parse_progress(&serde_json::json!({"prompt_id": "abc"}));
        assert_eq!(update, ProgressUpdate { current_step: 0, total_steps: 1 });
    }

    #[test]
    fn test_parse_progress_saturates() {
        let update = parse_progress(&serde_json::json!({"value": 1u64 << 32, "max": u64::MAX}));
        assert_eq!(update.current_step, u32::MAX);
        assert_eq!(update.total_steps, u32::MAX);
    }

    #[tokio::test]
    async fn test_expired_deadline_skips_polling() {
        // Nothing listens on port 1: the socket fails, and the poll fallback
        // must not reach /history once the deadline has passed.
        let client = ComfyClient::new("http://127.0.0.1:1");
        let outcome = client
            .wait_for_completion_ws("abc", Duration::ZERO, |_| {})
            .await
            .unwrap();
        assert!(matches!(outcome, GenerationOutcome::TimedOut));
    }

    #[test]
    fn test_image_ref_serialization() {
        let img = ImageRef {
            filename: "test.png".to_string(),
            subfolder: "".to_string(),
            img_type: "output".to_string(),
        };
        let json = serde_json::to_string(&img).unwrap();
        assert!(json.contains("\"filename\":\"test.png\""));
        assert!(json.contains("\"type\":\"output\""));
    }
}

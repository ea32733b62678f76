//! Blocking workflow execution against a ComfyUI instance.
//!
//! [`ComfyUIEngine`] submits a workflow over the REST API, waits on
//! the WebSocket for the completion signal, then collects the
//! designated output node's audio artifacts from the execution
//! history. The whole run is one suspension point for the caller;
//! queueing and progress are ComfyUI's concern.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::client::{ClientError, ComfyUIClient, WsStream};
use crate::messages::{parse_message, ComfyUIMessage};

/// Reference to one rendered artifact inside ComfyUI's output
/// namespace. Identifies the bytes; does not contain them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutputDescriptor {
    /// Output filename as written by ComfyUI.
    pub filename: String,
    /// Subfolder within the output namespace, often empty.
    #[serde(default)]
    pub subfolder: String,
    /// Output type tag (`output`, `temp`, ...).
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Errors from driving a workflow to completion.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Api(#[from] ComfyUIApiError),

    /// ComfyUI reported a node failure during execution.
    #[error("Execution failed at node {node_id}: {message}")]
    NodeFailed { node_id: String, message: String },

    /// The WebSocket closed before the completion signal arrived.
    #[error("Connection closed before execution completed")]
    ConnectionClosed,

    /// No completion signal within the configured window.
    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),
}

/// Seam between the job pipeline and the execution engine.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Run `workflow` to completion and return the audio artifacts
    /// collected from `output_node_id`. An empty list means the
    /// engine finished without producing any audio there.
    async fn run(
        &self,
        workflow: &Value,
        output_node_id: &str,
    ) -> Result<Vec<OutputDescriptor>, ExecutionError>;

    /// Read the raw bytes of one rendered artifact.
    async fn fetch_output(&self, descriptor: &OutputDescriptor)
        -> Result<Vec<u8>, ExecutionError>;
}

/// [`WorkflowEngine`] backed by a live ComfyUI instance.
///
/// Constructed once at process startup; the shared client identity
/// means ComfyUI correlates every job this worker submits to the same
/// WebSocket session.
pub struct ComfyUIEngine {
    client: ComfyUIClient,
    api: ComfyUIApi,
    timeout: Duration,
}

impl ComfyUIEngine {
    /// Create an engine over an existing client and API handle.
    ///
    /// * `timeout` - maximum wall-clock time to wait for the
    ///   completion signal after submission.
    pub fn new(client: ComfyUIClient, api: ComfyUIApi, timeout: Duration) -> Self {
        Self {
            client,
            api,
            timeout,
        }
    }
}

#[async_trait]
impl WorkflowEngine for ComfyUIEngine {
    async fn run(
        &self,
        workflow: &Value,
        output_node_id: &str,
    ) -> Result<Vec<OutputDescriptor>, ExecutionError> {
        // Connect before submitting so no execution message is missed.
        let mut conn = self.client.connect().await?;

        let submitted = self
            .api
            .submit_workflow(workflow, self.client.client_id())
            .await?;

        tracing::info!(
            prompt_id = %submitted.prompt_id,
            queue_position = submitted.number,
            output_node_id,
            "Workflow submitted to ComfyUI",
        );

        match tokio::time::timeout(
            self.timeout,
            await_completion(&mut conn.ws_stream, &submitted.prompt_id),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(ExecutionError::Timeout(self.timeout)),
        }

        let history = self.api.get_history(&submitted.prompt_id).await?;
        let outputs = extract_outputs(&history, &submitted.prompt_id, output_node_id);

        tracing::info!(
            prompt_id = %submitted.prompt_id,
            output_count = outputs.len(),
            "Workflow execution completed",
        );

        Ok(outputs)
    }

    async fn fetch_output(
        &self,
        descriptor: &OutputDescriptor,
    ) -> Result<Vec<u8>, ExecutionError> {
        Ok(self
            .api
            .fetch_output(&descriptor.filename, &descriptor.subfolder, &descriptor.kind)
            .await?)
    }
}

/// Wait for the prompt's terminal WebSocket message.
///
/// Completion is signaled by `executing` with `node: null` for our
/// prompt ID; failure by `execution_error`. Messages for other
/// prompts sharing the client session are ignored.
async fn await_completion(ws_stream: &mut WsStream, prompt_id: &str) -> Result<(), ExecutionError> {
    while let Some(frame) = ws_stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(_)) => {
                // Preview data. Not relevant to audio jobs.
                continue;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
            Ok(Message::Close(frame)) => {
                tracing::warn!(?frame, "ComfyUI WebSocket closed during execution");
                return Err(ExecutionError::ConnectionClosed);
            }
            Err(e) => {
                return Err(ExecutionError::Client(ClientError::Protocol(e.to_string())));
            }
        };

        let msg = match parse_message(&text) {
            Ok(msg) => msg,
            Err(e) => {
                // Custom nodes emit message types we do not model.
                tracing::debug!(error = %e, raw_message = %text, "Skipping unparsed message");
                continue;
            }
        };

        match msg {
            ComfyUIMessage::Executing(data) if data.prompt_id == prompt_id => {
                if data.node.is_none() {
                    // All nodes done for this prompt.
                    return Ok(());
                }
                tracing::debug!(node = ?data.node, "Executing node");
            }
            ComfyUIMessage::ExecutionError(data) if data.prompt_id == prompt_id => {
                return Err(ExecutionError::NodeFailed {
                    node_id: data.node_id,
                    message: data.exception_message,
                });
            }
            ComfyUIMessage::Progress(data) => {
                tracing::debug!(value = data.value, max = data.max, "Generation progress");
            }
            ComfyUIMessage::Status(data) => {
                tracing::debug!(
                    queue_remaining = data.status.exec_info.queue_remaining,
                    "ComfyUI queue status",
                );
            }
            _ => {}
        }
    }

    Err(ExecutionError::ConnectionClosed)
}

/// Pull the audio descriptors for `output_node_id` out of a
/// `/history/{prompt_id}` response.
///
/// History shape: `{ "<prompt_id>": { "outputs": { "<node_id>":
/// { "audio": [ {filename, subfolder, type}, ... ] } } } }`. Missing
/// levels or non-audio outputs yield an empty list.
fn extract_outputs(history: &Value, prompt_id: &str, output_node_id: &str) -> Vec<OutputDescriptor> {
    let Some(items) = history
        .get(prompt_id)
        .and_then(|entry| entry.get("outputs"))
        .and_then(|outputs| outputs.get(output_node_id))
        .and_then(|node| node.get("audio"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect()
}

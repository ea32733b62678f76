//! Job handler: the composition root of the worker.
//!
//! Validates the job payload, stages the optional audio input into
//! the workflow's `LoadAudio` node, runs the workflow against the
//! execution engine, and publishes the rendered artifacts. Every
//! failure mode is folded into the `{"error": ...}` response shape;
//! nothing escapes to the hosting runtime.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use wavegen_comfyui::runner::{ExecutionError, WorkflowEngine};
use wavegen_core::workflow::{self, LOAD_AUDIO_CLASS, SAVE_AUDIO_CLASS};
use wavegen_storage::publisher::ArtifactPublisher;

use crate::fetch::AssetFetcher;

/// A job as dispatched by the hosting runtime.
#[derive(Debug, Deserialize)]
pub struct JobRequest {
    #[serde(default)]
    pub input: JobInput,
}

/// Caller-controlled job payload.
#[derive(Debug, Default, Deserialize)]
pub struct JobInput {
    /// The workflow graph to execute. Required.
    pub workflow: Option<Value>,
    /// Remote audio asset to stage into the graph's `LoadAudio` node.
    pub audio_url: Option<String>,
}

/// Terminal response returned to the hosting runtime: either the
/// published audio URLs, in engine output order, or a single
/// human-readable error.
#[derive(Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobResponse {
    Audio { audio: Vec<String> },
    Error { error: String },
}

/// Everything that can terminate a job before a successful response.
#[derive(Debug, thiserror::Error)]
enum JobError {
    #[error("Input error: the 'workflow' key is required and its value must be a valid JSON object.")]
    InvalidWorkflow,

    #[error("Could not download audio from the given URL: {0}")]
    DownloadFailed(String),

    #[error("'audio_url' was provided but no 'LoadAudio' node was found in the workflow.")]
    MissingLoadAudioNode,

    #[error("The workflow must contain a 'SaveAudioMP3' node as its output.")]
    MissingOutputNode,

    #[error("Execution timed out or the workflow produced no audio output.")]
    NoOutput,

    #[error("An unexpected error occurred while processing the job: {0}")]
    Internal(String),
}

/// Long-lived collaborators injected into the handler at startup.
///
/// One instance per process; the engine carries the process-wide
/// ComfyUI client identity shared by every job.
pub struct WorkerContext {
    pub engine: Arc<dyn WorkflowEngine>,
    pub publisher: Arc<dyn ArtifactPublisher>,
    pub fetcher: Arc<dyn AssetFetcher>,
    /// Staging directory shared by all jobs in this process. Staged
    /// files are uniquely named and never cleaned up.
    pub input_dir: PathBuf,
}

/// Run one job through the full pipeline.
pub async fn handle_job(ctx: &WorkerContext, job: JobRequest) -> JobResponse {
    match run_pipeline(ctx, job).await {
        Ok(audio) => JobResponse::Audio { audio },
        Err(e) => {
            tracing::warn!(error = %e, "Job failed");
            JobResponse::Error {
                error: e.to_string(),
            }
        }
    }
}

/// The sequential pipeline: validate, stage asset, mutate graph,
/// execute, publish.
async fn run_pipeline(ctx: &WorkerContext, job: JobRequest) -> Result<Vec<String>, JobError> {
    let mut workflow_value = job.input.workflow.ok_or(JobError::InvalidWorkflow)?;
    workflow::as_graph(&workflow_value).map_err(|_| JobError::InvalidWorkflow)?;

    // Stage the optional audio input and point the LoadAudio node at
    // the staged filename.
    if let Some(audio_url) = &job.input.audio_url {
        let staged_name = format!("input_{}.mp3", uuid::Uuid::new_v4());
        let destination = ctx.input_dir.join(&staged_name);

        if !ctx.fetcher.fetch(audio_url, &destination).await {
            return Err(JobError::DownloadFailed(audio_url.clone()));
        }

        let graph =
            workflow::as_graph_mut(&mut workflow_value).map_err(|_| JobError::InvalidWorkflow)?;
        if !workflow::inject_input(graph, LOAD_AUDIO_CLASS, "audio", Value::String(staged_name)) {
            return Err(JobError::MissingLoadAudioNode);
        }
    }

    // The SaveAudioMP3 node is the sentinel output ComfyUI collects
    // artifacts from. Its absence makes the job unrunnable.
    let graph = workflow::as_graph(&workflow_value).map_err(|_| JobError::InvalidWorkflow)?;
    let output_node_id = workflow::find_node(graph, SAVE_AUDIO_CLASS)
        .ok_or(JobError::MissingOutputNode)?
        .to_owned();

    let outputs = match ctx.engine.run(&workflow_value, &output_node_id).await {
        Ok(outputs) => outputs,
        Err(ExecutionError::Timeout(_)) => return Err(JobError::NoOutput),
        Err(e) => return Err(JobError::Internal(e.to_string())),
    };
    if outputs.is_empty() {
        return Err(JobError::NoOutput);
    }

    // Publish in engine output order. The first failure aborts the
    // job; there is no partial-success reporting.
    let mut audio_urls = Vec::with_capacity(outputs.len());
    for descriptor in &outputs {
        let bytes = ctx
            .engine
            .fetch_output(descriptor)
            .await
            .map_err(|e| JobError::Internal(e.to_string()))?;

        let url = ctx
            .publisher
            .publish(&descriptor.filename, bytes)
            .await
            .map_err(|e| JobError::Internal(e.to_string()))?;

        audio_urls.push(url);
    }

    Ok(audio_urls)
}

//! Integration tests for the job handler pipeline.
//!
//! Drives [`handle_job`] end to end with mock engine, publisher, and
//! fetcher implementations; no network or ComfyUI instance involved.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use serde_json::{json, Value};

use wavegen_comfyui::runner::{ExecutionError, OutputDescriptor, WorkflowEngine};
use wavegen_storage::publisher::{ArtifactPublisher, StorageError};
use wavegen_worker::fetch::AssetFetcher;
use wavegen_worker::handler::{handle_job, JobRequest, JobResponse, WorkerContext};

// ---------------------------------------------------------------------------
// Mock collaborators
// ---------------------------------------------------------------------------

/// Records every run and serves canned output descriptors.
struct MockEngine {
    outputs: Vec<OutputDescriptor>,
    time_out: bool,
    runs: Mutex<Vec<(Value, String)>>,
}

impl MockEngine {
    fn returning(outputs: Vec<OutputDescriptor>) -> Arc<Self> {
        Arc::new(Self {
            outputs,
            time_out: false,
            runs: Mutex::new(Vec::new()),
        })
    }

    fn timing_out() -> Arc<Self> {
        Arc::new(Self {
            outputs: Vec::new(),
            time_out: true,
            runs: Mutex::new(Vec::new()),
        })
    }

    fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    fn recorded_runs(&self) -> Vec<(Value, String)> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkflowEngine for MockEngine {
    async fn run(
        &self,
        workflow: &Value,
        output_node_id: &str,
    ) -> Result<Vec<OutputDescriptor>, ExecutionError> {
        self.runs
            .lock()
            .unwrap()
            .push((workflow.clone(), output_node_id.to_string()));
        if self.time_out {
            return Err(ExecutionError::Timeout(Duration::from_secs(1)));
        }
        Ok(self.outputs.clone())
    }

    async fn fetch_output(
        &self,
        descriptor: &OutputDescriptor,
    ) -> Result<Vec<u8>, ExecutionError> {
        Ok(descriptor.filename.clone().into_bytes())
    }
}

/// Publishes to a fake CDN with the same uuid-prefix scheme as the
/// real publisher, so URL uniqueness is observable.
struct MockPublisher {
    published: Mutex<Vec<String>>,
}

impl MockPublisher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            published: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ArtifactPublisher for MockPublisher {
    async fn publish(&self, filename: &str, _bytes: Vec<u8>) -> Result<String, StorageError> {
        let url = format!("https://cdn.test/{}_{}", uuid::Uuid::new_v4(), filename);
        self.published.lock().unwrap().push(url.clone());
        Ok(url)
    }
}

/// Always fails, as if the bucket credentials were wrong.
struct FailingPublisher;

#[async_trait]
impl ArtifactPublisher for FailingPublisher {
    async fn publish(&self, filename: &str, _bytes: Vec<u8>) -> Result<String, StorageError> {
        Err(StorageError::Upload {
            key: filename.to_string(),
            message: "access denied".to_string(),
        })
    }
}

/// Records fetch requests without touching the network or disk.
struct MockFetcher {
    succeed: bool,
    requests: Mutex<Vec<(String, PathBuf)>>,
}

impl MockFetcher {
    fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            succeed: true,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            succeed: false,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn recorded_requests(&self) -> Vec<(String, PathBuf)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssetFetcher for MockFetcher {
    async fn fetch(&self, url: &str, destination: &Path) -> bool {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), destination.to_path_buf()));
        self.succeed
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn context(
    engine: Arc<MockEngine>,
    publisher: Arc<dyn ArtifactPublisher>,
    fetcher: Arc<MockFetcher>,
) -> WorkerContext {
    WorkerContext {
        engine,
        publisher,
        fetcher,
        input_dir: PathBuf::from("/tmp/wavegen-test-input"),
    }
}

fn job(payload: Value) -> JobRequest {
    serde_json::from_value(payload).expect("job payload should deserialize")
}

fn descriptor(filename: &str) -> OutputDescriptor {
    OutputDescriptor {
        filename: filename.to_string(),
        subfolder: String::new(),
        kind: "output".to_string(),
    }
}

fn save_audio_workflow() -> Value {
    json!({"1": {"class_type": "SaveAudioMP3", "inputs": {}}})
}

fn full_workflow() -> Value {
    json!({
        "2": {"class_type": "LoadAudio", "inputs": {"audio": "placeholder.mp3"}},
        "9": {"class_type": "SaveAudioMP3", "inputs": {}},
    })
}

// ---------------------------------------------------------------------------
// Input validation
// ---------------------------------------------------------------------------

/// A job without a `workflow` key is rejected before the engine is
/// ever invoked.
#[tokio::test]
async fn missing_workflow_is_rejected_without_execution() {
    let engine = MockEngine::returning(vec![descriptor("a.mp3")]);
    let ctx = context(engine.clone(), MockPublisher::new(), MockFetcher::succeeding());

    let response = handle_job(&ctx, job(json!({"input": {}}))).await;

    assert_matches!(response, JobResponse::Error { error } if error.contains("workflow"));
    assert_eq!(engine.run_count(), 0);
}

/// A `workflow` that is not a JSON object (or is empty) is rejected.
#[tokio::test]
async fn non_graph_workflow_is_rejected() {
    let engine = MockEngine::returning(vec![descriptor("a.mp3")]);
    let ctx = context(engine.clone(), MockPublisher::new(), MockFetcher::succeeding());

    for bad in [json!("a string"), json!(17), json!([]), json!({})] {
        let response = handle_job(&ctx, job(json!({"input": {"workflow": bad}}))).await;
        assert_matches!(response, JobResponse::Error { .. });
    }
    assert_eq!(engine.run_count(), 0);
}

/// A graph without a `SaveAudioMP3` node cannot run, with or without
/// an `audio_url`.
#[tokio::test]
async fn missing_output_node_is_rejected() {
    let engine = MockEngine::returning(vec![descriptor("a.mp3")]);
    let ctx = context(engine.clone(), MockPublisher::new(), MockFetcher::succeeding());

    let no_output = json!({"2": {"class_type": "LoadAudio", "inputs": {}}});

    let response = handle_job(&ctx, job(json!({"input": {"workflow": no_output}}))).await;
    assert_matches!(response, JobResponse::Error { error } if error.contains("SaveAudioMP3"));

    let response = handle_job(
        &ctx,
        job(json!({"input": {
            "workflow": {"2": {"class_type": "LoadAudio", "inputs": {}}},
            "audio_url": "https://assets.test/in.mp3",
        }})),
    )
    .await;
    assert_matches!(response, JobResponse::Error { error } if error.contains("SaveAudioMP3"));

    assert_eq!(engine.run_count(), 0);
}

// ---------------------------------------------------------------------------
// Audio staging
// ---------------------------------------------------------------------------

/// A failed download terminates the job before execution.
#[tokio::test]
async fn download_failure_is_terminal() {
    let engine = MockEngine::returning(vec![descriptor("a.mp3")]);
    let fetcher = MockFetcher::failing();
    let ctx = context(engine.clone(), MockPublisher::new(), fetcher.clone());

    let response = handle_job(
        &ctx,
        job(json!({"input": {
            "workflow": full_workflow(),
            "audio_url": "https://unreachable.test/in.mp3",
        }})),
    )
    .await;

    assert_matches!(
        response,
        JobResponse::Error { error } if error.contains("download")
    );
    assert_eq!(fetcher.recorded_requests().len(), 1);
    assert_eq!(engine.run_count(), 0);
}

/// An `audio_url` without a `LoadAudio` node in the graph is a
/// structural error; the engine is never invoked. The download itself
/// happens first (staging precedes graph mutation).
#[tokio::test]
async fn audio_url_without_load_audio_node_is_rejected() {
    let engine = MockEngine::returning(vec![descriptor("a.mp3")]);
    let fetcher = MockFetcher::succeeding();
    let ctx = context(engine.clone(), MockPublisher::new(), fetcher.clone());

    let response = handle_job(
        &ctx,
        job(json!({"input": {
            "workflow": save_audio_workflow(),
            "audio_url": "https://assets.test/in.mp3",
        }})),
    )
    .await;

    assert_matches!(response, JobResponse::Error { error } if error.contains("LoadAudio"));
    assert_eq!(fetcher.recorded_requests().len(), 1);
    assert_eq!(engine.run_count(), 0);
}

/// The filename injected into the `LoadAudio` node is exactly the one
/// handed to the fetcher, and differs across jobs.
#[tokio::test]
async fn staged_filename_is_injected_and_unique_per_job() {
    let engine = MockEngine::returning(vec![descriptor("a.mp3")]);
    let fetcher = MockFetcher::succeeding();
    let ctx = context(engine.clone(), MockPublisher::new(), fetcher.clone());

    let payload = json!({"input": {
        "workflow": full_workflow(),
        "audio_url": "https://assets.test/in.mp3",
    }});

    handle_job(&ctx, job(payload.clone())).await;
    handle_job(&ctx, job(payload)).await;

    let runs = engine.recorded_runs();
    let requests = fetcher.recorded_requests();
    assert_eq!(runs.len(), 2);
    assert_eq!(requests.len(), 2);

    let mut staged_names = Vec::new();
    for ((workflow, _), (_, destination)) in runs.iter().zip(requests.iter()) {
        let injected = workflow["2"]["inputs"]["audio"]
            .as_str()
            .expect("injected audio input should be a string");
        let staged = destination
            .file_name()
            .and_then(|n| n.to_str())
            .expect("destination should have a file name");

        assert_eq!(injected, staged);
        assert!(injected.starts_with("input_"));
        assert!(injected.ends_with(".mp3"));
        staged_names.push(injected.to_string());
    }
    assert_ne!(staged_names[0], staged_names[1]);
}

// ---------------------------------------------------------------------------
// Execution and publishing
// ---------------------------------------------------------------------------

/// The node ID of the first `SaveAudioMP3` node is the output node
/// handed to the engine.
#[tokio::test]
async fn output_node_id_is_passed_to_engine() {
    let engine = MockEngine::returning(vec![descriptor("a.mp3")]);
    let ctx = context(engine.clone(), MockPublisher::new(), MockFetcher::succeeding());

    handle_job(&ctx, job(json!({"input": {"workflow": save_audio_workflow()}}))).await;

    let runs = engine.recorded_runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].1, "1");
}

/// An empty engine result is reported as the timeout/no-output error.
#[tokio::test]
async fn empty_engine_result_is_no_output_error() {
    let engine = MockEngine::returning(Vec::new());
    let ctx = context(engine.clone(), MockPublisher::new(), MockFetcher::succeeding());

    let response = handle_job(&ctx, job(json!({"input": {"workflow": save_audio_workflow()}}))).await;

    assert_eq!(
        response,
        JobResponse::Error {
            error: "Execution timed out or the workflow produced no audio output.".to_string()
        }
    );
}

/// An engine timeout maps to the same user-visible message as an
/// empty result.
#[tokio::test]
async fn engine_timeout_is_no_output_error() {
    let engine = MockEngine::timing_out();
    let ctx = context(engine.clone(), MockPublisher::new(), MockFetcher::succeeding());

    let response = handle_job(&ctx, job(json!({"input": {"workflow": save_audio_workflow()}}))).await;

    assert_matches!(
        response,
        JobResponse::Error { error } if error.contains("timed out")
    );
    assert_eq!(engine.run_count(), 1);
}

/// N descriptors produce N URLs, preserving engine output order.
#[tokio::test]
async fn published_urls_preserve_descriptor_order() {
    let engine = MockEngine::returning(vec![
        descriptor("first.mp3"),
        descriptor("second.mp3"),
        descriptor("third.mp3"),
    ]);
    let ctx = context(engine, MockPublisher::new(), MockFetcher::succeeding());

    let response = handle_job(&ctx, job(json!({"input": {"workflow": save_audio_workflow()}}))).await;

    let JobResponse::Audio { audio } = response else {
        panic!("expected audio response, got {response:?}");
    };
    assert_eq!(audio.len(), 3);
    assert!(audio[0].ends_with("_first.mp3"));
    assert!(audio[1].ends_with("_second.mp3"));
    assert!(audio[2].ends_with("_third.mp3"));
}

/// Re-running an identical job publishes under fresh names, so the
/// URLs differ even though the rendered content may not.
#[tokio::test]
async fn identical_jobs_publish_distinct_urls() {
    let engine = MockEngine::returning(vec![descriptor("a.mp3")]);
    let ctx = context(engine, MockPublisher::new(), MockFetcher::succeeding());

    let payload = json!({"input": {"workflow": save_audio_workflow()}});
    let first = handle_job(&ctx, job(payload.clone())).await;
    let second = handle_job(&ctx, job(payload)).await;

    let (JobResponse::Audio { audio: first }, JobResponse::Audio { audio: second }) =
        (first, second)
    else {
        panic!("expected audio responses");
    };
    assert_ne!(first[0], second[0]);
}

/// A failed upload aborts the whole job; no partial URL list leaks.
#[tokio::test]
async fn upload_failure_aborts_the_job() {
    let engine = MockEngine::returning(vec![descriptor("a.mp3"), descriptor("b.mp3")]);
    let ctx = context(engine, Arc::new(FailingPublisher), MockFetcher::succeeding());

    let response = handle_job(&ctx, job(json!({"input": {"workflow": save_audio_workflow()}}))).await;

    assert_matches!(
        response,
        JobResponse::Error { error } if error.contains("unexpected error")
    );
}

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wavegen_comfyui::api::ComfyUIApi;
use wavegen_comfyui::client::ComfyUIClient;
use wavegen_comfyui::runner::ComfyUIEngine;
use wavegen_storage::publisher::R2Publisher;
use wavegen_worker::config::WorkerConfig;
use wavegen_worker::fetch::HttpAssetFetcher;
use wavegen_worker::handler::{handle_job, JobRequest, JobResponse, WorkerContext};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wavegen_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env();
    tracing::info!(
        comfyui_url = %config.comfyui_url,
        input_dir = %config.input_dir.display(),
        "Audio workflow worker starting",
    );

    // One ComfyUI client identity per process; every job reuses it.
    let client = ComfyUIClient::new(config.ws_url(), config.comfyui_url.clone());
    let api = ComfyUIApi::new(config.comfyui_url.clone());

    let ctx = WorkerContext {
        engine: Arc::new(ComfyUIEngine::new(client, api, config.execution_timeout)),
        publisher: Arc::new(R2Publisher::new()),
        fetcher: Arc::new(HttpAssetFetcher::new()),
        input_dir: config.input_dir,
    };

    serve(&ctx).await;
}

/// Read one JSON job per line from stdin and write one JSON response
/// per line to stdout.
///
/// Job intake, dispatch, and platform-level retries belong to the
/// hosting runtime; this loop is the thinnest possible stand-in. Jobs
/// are handled strictly one at a time.
async fn serve(ctx: &WorkerContext) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read job from stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<JobRequest>(&line) {
            Ok(job) => handle_job(ctx, job).await,
            Err(e) => JobResponse::Error {
                error: format!("Input error: invalid job JSON: {e}"),
            },
        };

        let mut payload = serde_json::to_string(&response)
            .unwrap_or_else(|e| format!(r#"{{"error":"Failed to serialize response: {e}"}}"#));
        payload.push('\n');

        if let Err(e) = stdout.write_all(payload.as_bytes()).await {
            tracing::error!(error = %e, "Failed to write response");
            break;
        }
        let _ = stdout.flush().await;
    }

    tracing::info!("Worker shutting down");
}

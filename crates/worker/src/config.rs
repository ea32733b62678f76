//! Worker configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
///
/// All fields have defaults matching a ComfyUI instance running
/// alongside the worker in the same container.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// ComfyUI HTTP API base URL.
    pub comfyui_url: String,
    /// Local directory where downloaded audio inputs are staged.
    /// Shared by all concurrent jobs; per-job unique filenames avoid
    /// collisions.
    pub input_dir: PathBuf,
    /// Maximum time to wait for a workflow execution to complete.
    pub execution_timeout: Duration,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                     |
    /// |--------------------------|-----------------------------|
    /// | `COMFYUI_URL`            | `http://127.0.0.1:8188`     |
    /// | `COMFY_INPUT_DIR`        | `/root/comfy/ComfyUI/input` |
    /// | `EXECUTION_TIMEOUT_SECS` | `600`                       |
    pub fn from_env() -> Self {
        let comfyui_url =
            std::env::var("COMFYUI_URL").unwrap_or_else(|_| "http://127.0.0.1:8188".into());

        let input_dir = PathBuf::from(
            std::env::var("COMFY_INPUT_DIR")
                .unwrap_or_else(|_| "/root/comfy/ComfyUI/input".into()),
        );

        let execution_timeout_secs: u64 = std::env::var("EXECUTION_TIMEOUT_SECS")
            .unwrap_or_else(|_| "600".into())
            .parse()
            .expect("EXECUTION_TIMEOUT_SECS must be a valid u64");

        Self {
            comfyui_url,
            input_dir,
            execution_timeout: Duration::from_secs(execution_timeout_secs),
        }
    }

    /// WebSocket base URL derived from the HTTP API URL.
    pub fn ws_url(&self) -> String {
        self.comfyui_url.replacen("http", "ws", 1)
    }
}

//! Artifact upload and public URL derivation.

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use tokio::sync::OnceCell;

use crate::config::StorageConfig;

/// Content type for published audio artifacts.
const AUDIO_CONTENT_TYPE: &str = "audio/mpeg";

/// Errors from the artifact publishing layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required environment variable is unset.
    #[error("Missing required environment variable: {0}")]
    MissingConfig(&'static str),

    /// The upload request failed.
    #[error("Upload failed for '{key}': {message}")]
    Upload {
        /// Object key the upload was attempted under.
        key: String,
        /// Underlying S3 error description.
        message: String,
    },
}

/// Seam between the job pipeline and durable object storage.
#[async_trait]
pub trait ArtifactPublisher: Send + Sync {
    /// Upload `bytes` under a fresh collision-resistant key derived
    /// from `filename` and return the public URL.
    async fn publish(&self, filename: &str, bytes: Vec<u8>) -> Result<String, StorageError>;
}

/// [`ArtifactPublisher`] backed by an S3-compatible bucket (R2).
///
/// The S3 client is built from the environment on first publish, so
/// configuration problems surface as upload failures rather than a
/// startup crash.
pub struct R2Publisher {
    state: OnceCell<PublisherState>,
}

struct PublisherState {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_url_base: String,
}

impl R2Publisher {
    pub fn new() -> Self {
        Self {
            state: OnceCell::new(),
        }
    }
}

impl Default for R2Publisher {
    fn default() -> Self {
        Self::new()
    }
}

impl PublisherState {
    /// Build the S3 client from [`StorageConfig`].
    ///
    /// R2 ignores the region but the SDK requires one; `auto` is the
    /// value Cloudflare documents. Path-style addressing keeps the
    /// bucket out of the hostname.
    fn from_env() -> Result<Self, StorageError> {
        let config = StorageConfig::from_env()?;

        let credentials = aws_credential_types::Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "wavegen",
        );

        let s3_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("auto"))
            .endpoint_url(config.endpoint_url)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket,
            public_url_base: config.public_url_base,
        })
    }
}

#[async_trait]
impl ArtifactPublisher for R2Publisher {
    async fn publish(&self, filename: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        let state = self
            .state
            .get_or_try_init(|| async { PublisherState::from_env() })
            .await?;

        // Prefixing with a fresh UUID keeps the original filename for
        // traceability while making key collisions negligible.
        let key = format!("{}_{}", uuid::Uuid::new_v4(), filename);
        let size = bytes.len();

        state
            .client
            .put_object()
            .bucket(&state.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .content_type(AUDIO_CONTENT_TYPE)
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                key: key.clone(),
                message: format!("{}", DisplayErrorContext(e)),
            })?;

        tracing::info!(key = %key, size, "Artifact uploaded");

        Ok(format!("{}/{}", state.public_url_base, key))
    }
}

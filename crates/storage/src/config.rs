//! Object storage configuration loaded from environment variables.

use crate::publisher::StorageError;

/// Endpoint URL of the S3-compatible storage service.
pub const ENV_ENDPOINT_URL: &str = "R2_ENDPOINT_URL";
/// Access key ID for the storage service.
pub const ENV_ACCESS_KEY_ID: &str = "R2_ACCESS_KEY_ID";
/// Secret access key for the storage service.
pub const ENV_SECRET_ACCESS_KEY: &str = "R2_SECRET_ACCESS_KEY";
/// Bucket receiving published artifacts.
pub const ENV_BUCKET_NAME: &str = "R2_BUCKET_NAME";
/// Public base URL artifacts are reachable under.
pub const ENV_PUBLIC_URL: &str = "R2_PUBLIC_URL";

/// Credentials and addressing for the artifact bucket.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub public_url_base: String,
}

impl StorageConfig {
    /// Load configuration from the environment.
    ///
    /// All five variables are required. This is called lazily at
    /// publish time, not at startup, so a misconfigured worker still
    /// answers jobs that never reach the upload stage.
    pub fn from_env() -> Result<Self, StorageError> {
        Ok(Self {
            endpoint_url: require_env(ENV_ENDPOINT_URL)?,
            access_key_id: require_env(ENV_ACCESS_KEY_ID)?,
            secret_access_key: require_env(ENV_SECRET_ACCESS_KEY)?,
            bucket: require_env(ENV_BUCKET_NAME)?,
            public_url_base: require_env(ENV_PUBLIC_URL)?,
        })
    }
}

/// Read a required environment variable.
fn require_env(name: &'static str) -> Result<String, StorageError> {
    std::env::var(name).map_err(|_| StorageError::MissingConfig(name))
}

//! Artifact publishing to S3-compatible object storage.
//!
//! Uploads rendered audio files to a Cloudflare R2 bucket (any
//! S3-compatible endpoint works) and derives the public URLs returned
//! to callers.

pub mod config;
pub mod publisher;

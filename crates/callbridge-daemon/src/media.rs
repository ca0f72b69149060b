//! Recording transcode and archival collaborators
//!
//! A recording job turns a raw WAV capture into a compressed file and ships
//! it to object storage. Both steps overwrite whatever a previous attempt
//! left behind, so a half-processed job can always be redone from scratch.

use crate::config::StorageConfig;
use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use callbridge_common::{BridgeError, Result};
use std::path::Path;
use tracing::{debug, info};

/// Compresses one raw recording file. Must be idempotent: repeating a
/// finished or half-finished transcode overwrites the previous output.
#[async_trait]
pub trait Transcoder: Send + Sync + 'static {
    async fn transcode(&self, dir: &Path, input: &str, output: &str) -> Result<()>;
}

/// Ships one finished file to the archive. Must be idempotent: uploading
/// the same file again replaces the stored object.
#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    async fn upload(&self, dir: &Path, file: &str) -> Result<()>;
}

/// [`Transcoder`] shelling out to the `lame` encoder
#[derive(Debug, Clone, Default)]
pub struct LameTranscoder;

#[async_trait]
impl Transcoder for LameTranscoder {
    async fn transcode(&self, dir: &Path, input: &str, output: &str) -> Result<()> {
        let input_path = dir.join(input);
        let output_path = dir.join(output);

        debug!("Transcoding {} -> {}", input_path.display(), output_path.display());
        let result = tokio::process::Command::new("lame")
            .arg("--silent")
            .arg(&input_path)
            .arg(&output_path)
            .output()
            .await
            .map_err(|e| BridgeError::Transcode(format!("cannot run lame: {e}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(BridgeError::Transcode(format!(
                "lame exited with {}: {}",
                result.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// S3-compatible [`ObjectStorage`]
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(config: &StorageConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "callbridge-storage",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.force_path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn upload(&self, dir: &Path, file: &str) -> Result<()> {
        let path = dir.join(file);
        let data = tokio::fs::read(&path).await?;
        let size = data.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(file)
            .content_type("audio/mpeg")
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| BridgeError::Storage(e.to_string()))?;

        info!("Uploaded {} bytes to s3://{}/{}", size, self.bucket, file);
        Ok(())
    }
}

//! Recording job delivery
//!
//! Transcodes a raw WAV capture to MP3 and uploads the result to object
//! storage. Either step failing leaves the job in the store, and since
//! transcode and upload both overwrite, the retry simply redoes the whole
//! job from scratch.

use crate::media::{ObjectStorage, Transcoder};
use crate::pipeline::{Deliverer, DrainRecord};
use async_trait::async_trait;
use callbridge_common::{RecordKind, RecordingJob, Result};
use std::path::PathBuf;
use std::sync::Arc;

impl DrainRecord for RecordingJob {
    const KIND: RecordKind = RecordKind::Recording;

    fn display_id(&self) -> &str {
        &self.unique_id
    }
}

/// Compressed-output file name for one job
fn mp3_name(wav_file: &str) -> String {
    match wav_file.rsplit_once('.') {
        Some((stem, _)) => format!("{stem}.mp3"),
        None => format!("{wav_file}.mp3"),
    }
}

/// [`Deliverer`] archiving recording jobs: transcode, then upload
pub struct RecordingDeliverer {
    transcoder: Arc<dyn Transcoder>,
    storage: Arc<dyn ObjectStorage>,
    calls_dir: PathBuf,
}

impl RecordingDeliverer {
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        storage: Arc<dyn ObjectStorage>,
        calls_dir: PathBuf,
    ) -> Self {
        Self {
            transcoder,
            storage,
            calls_dir,
        }
    }
}

#[async_trait]
impl Deliverer<RecordingJob> for RecordingDeliverer {
    async fn deliver(&self, job: &RecordingJob) -> Result<()> {
        let mp3 = mp3_name(&job.wav_file);
        self.transcoder
            .transcode(&self.calls_dir, &job.wav_file, &mp3)
            .await?;
        self.storage.upload(&self.calls_dir, &mp3).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callbridge_common::BridgeError;
    use std::path::Path;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakeTranscoder {
        fail: bool,
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        async fn transcode(&self, _dir: &Path, input: &str, output: &str) -> Result<()> {
            self.calls
                .lock()
                .await
                .push((input.to_string(), output.to_string()));
            if self.fail {
                Err(BridgeError::Transcode("encoder blew up".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct FakeStorage {
        fail: bool,
        uploads: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectStorage for FakeStorage {
        async fn upload(&self, _dir: &Path, file: &str) -> Result<()> {
            self.uploads.lock().await.push(file.to_string());
            if self.fail {
                Err(BridgeError::Storage("bucket gone".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn job() -> RecordingJob {
        RecordingJob {
            unique_id: "1700000000.42".to_string(),
            tenant: "ua".to_string(),
            wav_file: "out-1023-1700000000.42.wav".to_string(),
        }
    }

    #[test]
    fn test_mp3_name_replaces_extension() {
        assert_eq!(mp3_name("call.wav"), "call.mp3");
        assert_eq!(mp3_name("dir.name/call.WAV"), "dir.name/call.mp3");
        assert_eq!(mp3_name("no-extension"), "no-extension.mp3");
    }

    #[tokio::test]
    async fn test_deliver_transcodes_then_uploads() {
        let transcoder = Arc::new(FakeTranscoder::default());
        let storage = Arc::new(FakeStorage::default());
        let deliverer = RecordingDeliverer::new(
            transcoder.clone(),
            storage.clone(),
            PathBuf::from("/calls"),
        );

        deliverer.deliver(&job()).await.unwrap();

        let calls = transcoder.calls.lock().await;
        assert_eq!(
            *calls,
            vec![(
                "out-1023-1700000000.42.wav".to_string(),
                "out-1023-1700000000.42.mp3".to_string()
            )]
        );
        let uploads = storage.uploads.lock().await;
        assert_eq!(*uploads, vec!["out-1023-1700000000.42.mp3".to_string()]);
    }

    #[tokio::test]
    async fn test_transcode_failure_skips_upload() {
        let transcoder = Arc::new(FakeTranscoder {
            fail: true,
            ..Default::default()
        });
        let storage = Arc::new(FakeStorage::default());
        let deliverer =
            RecordingDeliverer::new(transcoder, storage.clone(), PathBuf::from("/calls"));

        let err = deliverer.deliver(&job()).await.unwrap_err();
        assert!(matches!(err, BridgeError::Transcode(_)));
        assert!(storage.uploads.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_upload_failure_fails_the_job() {
        let transcoder = Arc::new(FakeTranscoder::default());
        let storage = Arc::new(FakeStorage {
            fail: true,
            ..Default::default()
        });
        let deliverer =
            RecordingDeliverer::new(transcoder, storage, PathBuf::from("/calls"));

        let err = deliverer.deliver(&job()).await.unwrap_err();
        assert!(matches!(err, BridgeError::Storage(_)));
    }
}

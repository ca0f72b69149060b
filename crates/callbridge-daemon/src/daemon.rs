//! Long-lived task assembly
//!
//! Wires the collaborators into the four concurrent engines (two drain
//! pipelines, the registry refresher, the queue reconciler) and owns the
//! shared cancellation token that stops them together. Components interact
//! only through the registry and the injected collaborators.

use crate::alert::Alerter;
use crate::config::Config;
use crate::media::{ObjectStorage, Transcoder};
use crate::pipeline::cdr::CdrDeliverer;
use crate::pipeline::recording::RecordingDeliverer;
use crate::pipeline::Drain;
use crate::reconcile::QueueReconciler;
use crate::registry::InnerNumberRegistry;
use crate::store::RecordStore;
use crate::switch::SwitchClient;
use crate::transport::SignedTransport;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// External collaborators injected into the daemon
pub struct Collaborators {
    pub store: Arc<dyn RecordStore>,
    pub switch: Arc<dyn SwitchClient>,
    pub transcoder: Arc<dyn Transcoder>,
    pub storage: Arc<dyn ObjectStorage>,
    pub transport: SignedTransport,
    pub alerts: Alerter,
}

/// Running bridge daemon
pub struct Daemon {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    registry: Arc<InnerNumberRegistry>,
}

impl Daemon {
    /// Spawn every long-lived task. Tasks run until [`Daemon::shutdown`].
    pub fn start(config: &Config, collaborators: Collaborators) -> Self {
        let token = CancellationToken::new();
        let mut handles = Vec::new();

        let registry = Arc::new(InnerNumberRegistry::new(
            config.tenants.clone(),
            collaborators.transport.clone(),
            collaborators.alerts.clone(),
            config.registry.retry_policy(),
        ));
        handles.push(
            registry
                .clone()
                .start(config.registry.refresh_interval(), token.clone()),
        );

        let cdr_drain = Drain::new(
            collaborators.store.clone(),
            Arc::new(CdrDeliverer::new(
                collaborators.transport.clone(),
                config.tenants.clone(),
            )),
            collaborators.alerts.clone(),
            config.cdr.clone(),
        );
        handles.extend(cdr_drain.start(token.clone()));

        let recording_drain = Drain::new(
            collaborators.store,
            Arc::new(RecordingDeliverer::new(
                collaborators.transcoder,
                collaborators.storage,
                config.media.calls_dir.clone(),
            )),
            collaborators.alerts,
            config.recording.clone(),
        );
        handles.extend(recording_drain.start(token.clone()));

        let reconciler = QueueReconciler::new(
            registry.clone(),
            collaborators.switch,
            collaborators.transport,
            config.tenants.clone(),
        );
        handles.push(reconciler.start(config.reconcile.interval(), token.clone()));

        info!("Daemon started with {} tasks", handles.len());
        Self {
            token,
            handles,
            registry,
        }
    }

    /// Shared inner-number registry, for the switch-event side
    pub fn registry(&self) -> Arc<InnerNumberRegistry> {
        self.registry.clone()
    }

    /// Cancel every task and wait for all of them to exit.
    ///
    /// No graceful drain: a record mid-send is simply retried after the
    /// next start.
    pub async fn shutdown(self) {
        info!("Shutting down daemon...");
        self.token.cancel();
        for handle in self.handles {
            if let Err(err) = handle.await {
                error!("Task ended abnormally: {}", err);
            }
        }
        info!("Daemon stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::switch::QueueMemberEvent;
    use async_trait::async_trait;
    use callbridge_common::{BridgeError, Result};
    use std::path::Path;
    use std::time::Duration;

    struct DeadSwitch;

    #[async_trait]
    impl SwitchClient for DeadSwitch {
        async fn request_queue_status(&self) -> Result<()> {
            Err(BridgeError::Switch("not wired".to_string()))
        }

        async fn queue_events(&self) -> Vec<QueueMemberEvent> {
            Vec::new()
        }

        async fn home_queue(&self, _number: &str) -> Result<String> {
            Err(BridgeError::Switch("not wired".to_string()))
        }
    }

    struct NoopTranscoder;

    #[async_trait]
    impl crate::media::Transcoder for NoopTranscoder {
        async fn transcode(&self, _dir: &Path, _input: &str, _output: &str) -> Result<()> {
            Ok(())
        }
    }

    struct NoopStorage;

    #[async_trait]
    impl crate::media::ObjectStorage for NoopStorage {
        async fn upload(&self, _dir: &Path, _file: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_daemon_starts_and_stops_cleanly() {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let config = Config::default();
        let collaborators = Collaborators {
            store,
            switch: Arc::new(DeadSwitch),
            transcoder: Arc::new(NoopTranscoder),
            storage: Arc::new(NoopStorage),
            transport: SignedTransport::new(Duration::from_secs(2)).unwrap(),
            alerts: Alerter::new(None).unwrap(),
        };

        let daemon = Daemon::start(&config, collaborators);
        // reader + senders per kind, refresher, reconciler
        let expected = 2 + config.cdr.senders + config.recording.senders + 2;
        assert_eq!(daemon.handles.len(), expected);

        tokio::time::timeout(Duration::from_secs(5), daemon.shutdown())
            .await
            .expect("daemon did not stop");
    }
}

//! Record drain pipeline
//!
//! A generic reader/sender pair per record kind. The reader selects the
//! oldest pending records from the store on every tick and hands them to a
//! pool of sender workers over a bounded queue; a worker deletes a record
//! only after its delivery succeeded. Anything still in the store gets
//! re-selected on a later tick, which makes delivery at-least-once: a
//! record in flight while its twin is re-selected may be delivered twice,
//! and a failed delivery needs no explicit backoff because the tick
//! interval already throttles the retry.

pub mod cdr;
pub mod recording;

use crate::alert::Alerter;
use crate::config::DrainConfig;
use crate::store::RecordStore;
use async_trait::async_trait;
use callbridge_common::{RecordKind, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A record kind the pipeline can drain
pub trait DrainRecord: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: RecordKind;

    /// Identifier shown in logs
    fn display_id(&self) -> &str;
}

/// Delivers one record to its destination
#[async_trait]
pub trait Deliverer<R: DrainRecord>: Send + Sync + 'static {
    async fn deliver(&self, record: &R) -> Result<()>;
}

struct QueueItem<R> {
    key: i64,
    record: R,
}

type SharedReceiver<R> = Arc<Mutex<mpsc::Receiver<QueueItem<R>>>>;

/// Reader plus sender pool for one record kind
pub struct Drain<R: DrainRecord> {
    store: Arc<dyn RecordStore>,
    deliverer: Arc<dyn Deliverer<R>>,
    alerts: Alerter,
    config: DrainConfig,
}

impl<R: DrainRecord> Drain<R> {
    pub fn new(
        store: Arc<dyn RecordStore>,
        deliverer: Arc<dyn Deliverer<R>>,
        alerts: Alerter,
        config: DrainConfig,
    ) -> Self {
        Self {
            store,
            deliverer,
            alerts,
            config,
        }
    }

    /// Spawn the reader task and the sender workers.
    ///
    /// All tasks watch `token` and wind down when it is cancelled; the
    /// returned handles complete once every task has exited.
    pub fn start(self, token: CancellationToken) -> Vec<JoinHandle<()>> {
        let (tx, rx) = mpsc::channel(self.config.batch_max.max(1) as usize);
        let rx: SharedReceiver<R> = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(self.config.senders + 1);
        handles.push(spawn_reader(
            self.store.clone(),
            tx,
            self.alerts.clone(),
            self.config.clone(),
            token.clone(),
        ));
        for index in 0..self.config.senders {
            handles.push(spawn_sender(
                index,
                self.store.clone(),
                self.deliverer.clone(),
                rx.clone(),
                token.clone(),
            ));
        }
        handles
    }
}

fn spawn_reader<R: DrainRecord>(
    store: Arc<dyn RecordStore>,
    tx: mpsc::Sender<QueueItem<R>>,
    alerts: Alerter,
    config: DrainConfig,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let kind = R::KIND;
        info!("Initiating {} reader...", kind);
        let mut ticker = tokio::time::interval(config.tick());
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Finishing {} reader...", kind);
                    return;
                }
                _ = ticker.tick() => {
                    if !read_once(&*store, &tx, &alerts, &config, &token).await {
                        info!("Finishing {} reader...", kind);
                        return;
                    }
                }
            }
        }
    })
}

/// One reader tick. Returns false when the pipeline is shutting down.
async fn read_once<R: DrainRecord>(
    store: &dyn RecordStore,
    tx: &mpsc::Sender<QueueItem<R>>,
    alerts: &Alerter,
    config: &DrainConfig,
    token: &CancellationToken,
) -> bool {
    let kind = R::KIND;
    let batch = match store.select_oldest(kind, config.batch_max).await {
        Ok(batch) => batch,
        Err(err) => {
            error!("Cannot read {} batch: {}", kind, err);
            alerts
                .notify(&format!("Cannot read from {} | {}", kind, err))
                .await;
            return true;
        }
    };

    let selected = batch.len();
    for stored in batch {
        let record: R = match serde_json::from_str(&stored.payload) {
            Ok(record) => record,
            Err(err) => {
                // Would never decode on any future tick either
                error!("Dropping undecodable {} record {}: {}", kind, stored.key, err);
                if let Err(err) = store.delete(kind, stored.key).await {
                    error!("Cannot drop {} record {}: {}", kind, stored.key, err);
                }
                continue;
            }
        };
        let item = QueueItem {
            key: stored.key,
            record,
        };
        tokio::select! {
            _ = token.cancelled() => return false,
            sent = tx.send(item) => {
                if sent.is_err() {
                    return false;
                }
            }
        }
    }

    match store.count(kind).await {
        Ok(pending) => {
            info!("<<< READING {} | store: {} | batch: {}", kind, pending, selected);
            if pending >= 2 * i64::from(config.batch_max) {
                alerts
                    .notify(&format!("Overload with {}, {}", kind, pending))
                    .await;
            }
        }
        Err(err) => error!("Cannot count {} records: {}", kind, err),
    }
    true
}

fn spawn_sender<R: DrainRecord>(
    index: usize,
    store: Arc<dyn RecordStore>,
    deliverer: Arc<dyn Deliverer<R>>,
    rx: SharedReceiver<R>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let kind = R::KIND;
        info!("Initiating {} sender {}...", kind, index);
        loop {
            // Take the next item while holding the receiver only briefly;
            // delivery itself runs outside the lock.
            let item = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    _ = token.cancelled() => None,
                    item = rx.recv() => item,
                }
            };
            let Some(item) = item else {
                info!("Finishing {} sender {}...", kind, index);
                return;
            };

            match deliverer.deliver(&item.record).await {
                Ok(()) => {
                    info!("<<< {} SENT | {}", kind, item.record.display_id());
                    match store.delete(kind, item.key).await {
                        Ok(1) => {}
                        Ok(affected) => error!(
                            "{} record {} was not deleted (affected {})",
                            kind,
                            item.record.display_id(),
                            affected
                        ),
                        Err(err) => error!(
                            "Error while deleting {} record {}: {}",
                            kind,
                            item.record.display_id(),
                            err
                        ),
                    }
                }
                Err(err) => {
                    error!(
                        "<<< ERROR WHILE SENDING {} | {} | {}",
                        kind,
                        item.record.display_id(),
                        err
                    );
                }
            }
        }
    })
}

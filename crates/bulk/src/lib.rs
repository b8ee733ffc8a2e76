//! Bulk image generation over a chat-bot transport.
//!
//! [`BulkSession`] owns the pieces shared by every run on one
//! underlying connection: the correlator actor reading the inbound
//! message feed, the album registry, and the album store. Each
//! [`BulkSession::start_bulk`] call wires a dispatcher run into its
//! album's container channel; the album's aggregator (spawned by the
//! creating call) folds events into album state and materializes
//! artifacts. Per-task and per-artifact failures never fail the run:
//! callers inspect the final [`Album`] status instead.

pub mod aggregator;
pub mod config;
pub mod store;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use easel_bot::correlator::{Correlator, CorrelatorHandle, ProgressUpdate};
use easel_bot::message::ChannelMessage;
use easel_bot::parse::StatusParser;
use easel_bot::transport::{BotTransport, Downloader};
use easel_core::error::CoreError;
use easel_core::progress;
use easel_events::Broker;
use easel_media::{MaterializeOptions, Materializer};
use easel_pipeline::{Dispatcher, RunOptions};

use aggregator::Aggregator;

pub use aggregator::{Observer, StatusUpdate};
pub use config::{default_album_id, validate_album_id, BulkRequest};
pub use easel_core::album::{Album, AlbumStatus, Image};
pub use store::AlbumStore;

/// Shared context for bulk runs multiplexed over one bot connection.
pub struct BulkSession {
    transport: Arc<dyn BotTransport>,
    downloader: Arc<dyn Downloader>,
    correlator: CorrelatorHandle,
    broker: Broker,
    store: AlbumStore,
}

impl BulkSession {
    /// Wire up a session: spawns the correlator over `inbound` and the
    /// album registry. `output_root` is where album directories land.
    pub fn new(
        transport: Arc<dyn BotTransport>,
        downloader: Arc<dyn Downloader>,
        inbound: mpsc::Receiver<ChannelMessage>,
        parser: Arc<dyn StatusParser>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            transport,
            downloader,
            correlator: Correlator::spawn(inbound, parser),
            broker: Broker::new(),
            store: AlbumStore::new(output_root),
        }
    }

    pub fn store(&self) -> &AlbumStore {
        &self.store
    }

    /// Raw per-task progress updates (strictly increasing per task).
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.correlator.subscribe_progress()
    }

    /// Start (or resume) a bulk run.
    ///
    /// Creates the album on first use of the id; on resume, the stored
    /// prompt list is authoritative and previously finished indices are
    /// skipped. The observer is attached to the album's aggregator, so
    /// it is honored only for the call that creates the album container;
    /// concurrent joining calls share the creator's observer.
    pub async fn start_bulk(
        &self,
        request: BulkRequest,
        observer: Option<Observer>,
    ) -> Result<BulkHandle, CoreError> {
        request.validate()?;
        let album_id = match &request.album_id {
            Some(id) => id.clone(),
            None => default_album_id(),
        };
        let prompts = request.build_prompts();

        let album = match self.store.load(&album_id).await? {
            Some(stored) => {
                if stored.prompts.is_empty() {
                    Album {
                        prompts: prompts.clone(),
                        ..stored
                    }
                } else {
                    if stored.prompts != prompts {
                        tracing::warn!(
                            album_id = %album_id,
                            "Request prompts differ from the stored album; resuming with the stored list",
                        );
                    }
                    stored
                }
            }
            None => {
                tracing::info!(album_id = %album_id, prompts = prompts.len(), "Album created");
                Album::new(album_id.clone(), prompts)
            }
        };

        let container = self
            .broker
            .get_or_create(album)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        let (run_prompts, finished, total) = {
            let album = container.album.lock().await;
            (
                album.prompts.clone(),
                album.finished_set(),
                progress::total_images(album.prompts.len(), request.variation),
            )
        };

        let cancel = CancellationToken::new();

        // The creating call owns the album's single consumer.
        let aggregator_handle = container.receiver.map(|events| {
            let materializer = Materializer::new(
                Arc::clone(&self.downloader),
                self.store.album_dir(&album_id),
                MaterializeOptions {
                    download: request.download,
                    thumbnail: request.thumbnail,
                },
            );
            let aggregator = Aggregator::new(
                Arc::clone(&container.album),
                total,
                materializer,
                self.store.clone(),
                observer,
            );
            tokio::spawn(aggregator.run(events, cancel.child_token()))
        });

        let dispatcher = Dispatcher::new(Arc::clone(&self.transport), self.correlator.clone());
        let options = RunOptions {
            want_variations: request.variation,
            want_upscale: request.upscale,
            concurrency: request.concurrency,
            min_spacing: request.wait,
            task_timeout: request.task_timeout,
        };
        let mut events = dispatcher.run(run_prompts, finished, options, cancel.child_token());

        // Bridge this run's events into the album container, then
        // release the reference; the container tears down at zero and
        // the aggregator finalizes on channel closure.
        let broker = self.broker.clone();
        let sender = container.sender;
        let album_state = Arc::clone(&container.album);
        let id = album_id.clone();
        let join = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if sender.send(event).await.is_err() {
                    tracing::debug!(album_id = %id, "Album channel closed early");
                    break;
                }
            }
            drop(sender);
            broker.release(&id).await;
            if let Some(handle) = aggregator_handle {
                let _ = handle.await;
            }
            album_state.lock().await.clone()
        });

        Ok(BulkHandle {
            album_id,
            cancel,
            join,
        })
    }
}

/// Handle to one running bulk call.
pub struct BulkHandle {
    album_id: String,
    cancel: CancellationToken,
    join: JoinHandle<Album>,
}

impl BulkHandle {
    pub fn album_id(&self) -> &str {
        &self.album_id
    }

    /// Stop admitting tasks; in-flight tasks get a short grace period.
    /// Materialized images and finished indices survive for resume.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to settle and return the album snapshot.
    pub async fn wait(self) -> Result<Album, CoreError> {
        self.join
            .await
            .map_err(|e| CoreError::Internal(format!("bulk task failed: {e}")))
    }
}

//! Folds one album's event stream into album state.
//!
//! The aggregator is the only writer of album state. Materialization
//! (I/O) happens before the lock is taken; the exclusive section covers
//! just the in-memory mutation, and persistence works from a snapshot
//! taken under the lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use easel_core::album::{Album, AlbumStatus};
use easel_core::event::GenerateEvent;
use easel_core::progress;
use easel_media::Materializer;

use crate::store::AlbumStore;

/// Progress report delivered to the observer callback.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub percentage: f32,
    /// Whole-minute estimate of remaining time; `None` until the first
    /// image lands.
    pub estimated: Option<Duration>,
    /// Per-task error being reported; the run itself continues.
    pub error: Option<String>,
}

/// Callback invoked on every percentage increase and per-task failure.
pub type Observer = Arc<dyn Fn(StatusUpdate) + Send + Sync>;

pub(crate) struct Aggregator {
    album: Arc<Mutex<Album>>,
    /// Expected number of final images for the run.
    total: usize,
    materializer: Materializer,
    store: AlbumStore,
    observer: Option<Observer>,
}

impl Aggregator {
    pub(crate) fn new(
        album: Arc<Mutex<Album>>,
        total: usize,
        materializer: Materializer,
        store: AlbumStore,
        observer: Option<Observer>,
    ) -> Self {
        Self {
            album,
            total,
            materializer,
            store,
            observer,
        }
    }

    /// Consume the album's event stream until it closes or the run is
    /// cancelled, then record the final status.
    pub(crate) async fn run(
        self,
        mut events: mpsc::Receiver<GenerateEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.finalize(AlbumStatus::Cancelled).await;
                    return;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        let percentage = self.album.lock().await.percentage;
                        let status = if percentage >= 100.0 {
                            AlbumStatus::Finished
                        } else {
                            AlbumStatus::PartiallyFinished
                        };
                        self.finalize(status).await;
                        return;
                    }
                },
            }
        }
    }

    async fn handle_event(&self, event: GenerateEvent) {
        let images = self.materializer.materialize(&event).await;
        let now = Utc::now();

        let (snapshot, report) = {
            let mut album = self.album.lock().await;
            album.updated_at = now;
            album.status = AlbumStatus::Running;
            if !images.is_empty() {
                album.images.extend(images);
                if event.is_last {
                    album.mark_finished(event.prompt_index);
                }
            }

            let done = album.images.len();
            let percentage = progress::percentage(done, self.total);
            let report = if percentage > album.percentage {
                album.percentage = percentage;
                let elapsed = (now - album.created_at).to_std().unwrap_or_default();
                Some(StatusUpdate {
                    percentage,
                    estimated: progress::estimated_remaining(elapsed, done, self.total),
                    error: None,
                })
            } else {
                event.error.clone().map(|error| StatusUpdate {
                    percentage: album.percentage,
                    estimated: None,
                    error: Some(error),
                })
            };
            (album.clone(), report)
        };

        if let (Some(observer), Some(update)) = (&self.observer, report) {
            observer(update);
        }
        if let Err(e) = self.store.save(&snapshot).await {
            tracing::warn!(album_id = %snapshot.id, error = %e, "Couldn't persist album");
        }
    }

    async fn finalize(&self, status: AlbumStatus) {
        let snapshot = {
            let mut album = self.album.lock().await;
            album.updated_at = Utc::now();
            album.status = status;
            album.clone()
        };
        tracing::info!(
            album_id = %snapshot.id,
            status = snapshot.status.label(),
            percentage = snapshot.percentage,
            "Album run ended",
        );
        if let Err(e) = self.store.save(&snapshot).await {
            tracing::warn!(album_id = %snapshot.id, error = %e, "Couldn't persist final album");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use easel_bot::transport::{BotError, Downloader};
    use easel_core::task::Stage;
    use easel_media::MaterializeOptions;
    use std::sync::Mutex as StdMutex;

    struct NoDownloader;

    #[async_trait]
    impl Downloader for NoDownloader {
        async fn download(&self, _url: &str) -> Result<Vec<u8>, BotError> {
            Err(BotError::Download("not used".into()))
        }
    }

    fn harness(
        total: usize,
        prompts: Vec<String>,
        dir: &std::path::Path,
        observer: Option<Observer>,
    ) -> (
        Aggregator,
        Arc<Mutex<Album>>,
        mpsc::Sender<GenerateEvent>,
        mpsc::Receiver<GenerateEvent>,
    ) {
        let album = Arc::new(Mutex::new(Album::new("a1".into(), prompts)));
        let store = AlbumStore::new(dir);
        // Downloads disabled: each artifact event yields one URL image.
        let materializer = Materializer::new(
            Arc::new(NoDownloader),
            store.album_dir("a1"),
            MaterializeOptions::default(),
        );
        let (tx, rx) = mpsc::channel(16);
        let aggregator = Aggregator::new(
            Arc::clone(&album),
            total,
            materializer,
            store,
            observer,
        );
        (aggregator, album, tx, rx)
    }

    fn event(index: usize, url: &str, is_last: bool) -> GenerateEvent {
        GenerateEvent::completed(index, "cat", Stage::Draft, Some(url.into()), is_last)
    }

    #[tokio::test]
    async fn stream_closure_at_full_percentage_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let (aggregator, album, tx, rx) =
            harness(2, vec!["cat".into(), "dog".into()], dir.path(), None);

        let run = tokio::spawn(aggregator.run(rx, CancellationToken::new()));
        tx.send(event(0, "https://cdn.test/a.png", true)).await.unwrap();
        tx.send(event(1, "https://cdn.test/b.png", true)).await.unwrap();
        drop(tx);
        run.await.unwrap();

        let album = album.lock().await;
        assert_eq!(album.status, AlbumStatus::Finished);
        assert_eq!(album.percentage, 100.0);
        assert_eq!(album.images.len(), 2);
        assert_eq!(album.finished, vec![0, 1]);
    }

    #[tokio::test]
    async fn early_closure_is_partially_finished() {
        let dir = tempfile::tempdir().unwrap();
        let (aggregator, album, tx, rx) =
            harness(4, vec!["cat".into(), "dog".into()], dir.path(), None);

        let run = tokio::spawn(aggregator.run(rx, CancellationToken::new()));
        tx.send(event(0, "https://cdn.test/a.png", true)).await.unwrap();
        drop(tx);
        run.await.unwrap();

        let album = album.lock().await;
        assert_eq!(album.status, AlbumStatus::PartiallyFinished);
        assert!(album.percentage < 100.0);
        assert_eq!(album.finished, vec![0]);
    }

    #[tokio::test]
    async fn cancellation_preserves_partial_progress() {
        let dir = tempfile::tempdir().unwrap();
        let (aggregator, album, tx, rx) =
            harness(4, vec!["cat".into(), "dog".into()], dir.path(), None);
        let cancel = CancellationToken::new();

        let run = tokio::spawn(aggregator.run(rx, cancel.clone()));
        tx.send(event(0, "https://cdn.test/a.png", true)).await.unwrap();
        // Let the event land before cancelling.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        run.await.unwrap();

        let album = album.lock().await;
        assert_eq!(album.status, AlbumStatus::Cancelled);
        assert_eq!(album.images.len(), 1);
        assert_eq!(album.finished, vec![0]);
    }

    #[tokio::test]
    async fn failed_last_event_does_not_finish_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let (aggregator, album, tx, rx) = harness(4, vec!["cat".into()], dir.path(), None);

        let run = tokio::spawn(aggregator.run(rx, CancellationToken::new()));
        tx.send(GenerateEvent::failed(0, "cat", Stage::Draft, "timeout", true))
            .await
            .unwrap();
        drop(tx);
        run.await.unwrap();

        let album = album.lock().await;
        assert!(album.finished.is_empty());
        assert!(album.images.is_empty());
        assert_eq!(album.status, AlbumStatus::PartiallyFinished);
    }

    #[tokio::test]
    async fn observer_sees_monotonic_percentages_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let seen: Arc<StdMutex<Vec<StatusUpdate>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: Observer = Arc::new(move |update| sink.lock().unwrap().push(update));
        let (aggregator, _, tx, rx) = harness(
            2,
            vec!["cat".into(), "dog".into()],
            dir.path(),
            Some(observer),
        );

        let run = tokio::spawn(aggregator.run(rx, CancellationToken::new()));
        tx.send(event(0, "https://cdn.test/a.png", true)).await.unwrap();
        tx.send(GenerateEvent::failed(1, "dog", Stage::Draft, "timeout", true))
            .await
            .unwrap();
        drop(tx);
        run.await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].percentage, 50.0);
        assert!(seen[0].error.is_none());
        assert_eq!(seen[1].error.as_deref(), Some("timeout"));
        // Percentage never regresses on error reports.
        assert_eq!(seen[1].percentage, 50.0);
    }

    #[tokio::test]
    async fn album_record_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let (aggregator, _, tx, rx) = harness(2, vec!["cat".into()], dir.path(), None);

        let run = tokio::spawn(aggregator.run(rx, CancellationToken::new()));
        tx.send(event(0, "https://cdn.test/a.png", true)).await.unwrap();
        drop(tx);
        run.await.unwrap();

        let store = AlbumStore::new(dir.path());
        let loaded = store.load("a1").await.unwrap().unwrap();
        assert_eq!(loaded.images.len(), 1);
    }
}

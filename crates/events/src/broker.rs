//! Album-to-channel bindings served by a registry actor.
//!
//! A single actor task owns the container map and serializes every
//! get-or-create/release/remove, so callers never share a lock. Each
//! container binds an album id to one `mpsc` event channel: any number
//! of concurrent bulk calls feed the sender, one aggregator consumes
//! the receiver. When the last referencing call releases the album, the
//! container is torn down and the channel closes, which lets the
//! aggregator finalize the album.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};

use easel_core::album::Album;
use easel_core::event::GenerateEvent;
use easel_core::types::AlbumId;

/// Capacity of each container's event channel.
const CONTAINER_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the registry command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// A caller's attachment to an album container.
pub struct ContainerHandle {
    /// Feed for this call's generate events.
    pub sender: mpsc::Sender<GenerateEvent>,
    /// The album's single consumer end; present only for the call that
    /// created the container. That caller owns the aggregator.
    pub receiver: Option<mpsc::Receiver<GenerateEvent>>,
    /// Shared album state, mutated only by the aggregator.
    pub album: Arc<Mutex<Album>>,
}

/// Errors returned by registry operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The registry actor is no longer running.
    #[error("Registry unavailable")]
    Closed,
}

enum Command {
    GetOrCreate {
        album: Album,
        reply: oneshot::Sender<ContainerHandle>,
    },
    Release {
        album_id: AlbumId,
    },
    Remove {
        album_id: AlbumId,
    },
}

/// Cloneable handle to the registry actor.
#[derive(Clone)]
pub struct Broker {
    commands: mpsc::Sender<Command>,
}

impl Broker {
    /// Spawn the registry actor.
    pub fn new() -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        tokio::spawn(run_registry(command_rx));
        Self {
            commands: command_tx,
        }
    }

    /// Attach to the container for `album.id`, creating it on first use.
    ///
    /// The passed album seeds the container's shared state on creation
    /// and is discarded when the container already exists. The returned
    /// handle carries the receiver only for the creating call.
    pub async fn get_or_create(&self, album: Album) -> Result<ContainerHandle, BrokerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::GetOrCreate { album, reply })
            .await
            .map_err(|_| BrokerError::Closed)?;
        response.await.map_err(|_| BrokerError::Closed)
    }

    /// Drop one reference to an album's container. At zero references
    /// the container is removed and its channel closed.
    pub async fn release(&self, album_id: &str) {
        let _ = self
            .commands
            .send(Command::Release {
                album_id: album_id.to_string(),
            })
            .await;
    }

    /// Tear the container down regardless of reference count.
    pub async fn remove(&self, album_id: &str) {
        let _ = self
            .commands
            .send(Command::Remove {
                album_id: album_id.to_string(),
            })
            .await;
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Registry actor
// ---------------------------------------------------------------------------

struct ContainerEntry {
    sender: mpsc::Sender<GenerateEvent>,
    album: Arc<Mutex<Album>>,
    /// Number of bulk calls currently attached.
    active: usize,
}

async fn run_registry(mut commands: mpsc::Receiver<Command>) {
    let mut containers: HashMap<AlbumId, ContainerEntry> = HashMap::new();

    while let Some(command) = commands.recv().await {
        match command {
            Command::GetOrCreate { album, reply } => {
                let album_id = album.id.clone();
                let handle = match containers.get_mut(&album_id) {
                    Some(entry) => {
                        entry.active += 1;
                        tracing::debug!(album_id = %album_id, active = entry.active, "Container joined");
                        ContainerHandle {
                            sender: entry.sender.clone(),
                            receiver: None,
                            album: Arc::clone(&entry.album),
                        }
                    }
                    None => {
                        let (sender, receiver) = mpsc::channel(CONTAINER_CHANNEL_CAPACITY);
                        let album = Arc::new(Mutex::new(album));
                        containers.insert(
                            album_id.clone(),
                            ContainerEntry {
                                sender: sender.clone(),
                                album: Arc::clone(&album),
                                active: 1,
                            },
                        );
                        tracing::debug!(album_id = %album_id, "Container created");
                        ContainerHandle {
                            sender,
                            receiver: Some(receiver),
                            album,
                        }
                    }
                };
                let _ = reply.send(handle);
            }
            Command::Release { album_id } => {
                if let Some(entry) = containers.get_mut(&album_id) {
                    entry.active = entry.active.saturating_sub(1);
                    if entry.active == 0 {
                        containers.remove(&album_id);
                        tracing::debug!(album_id = %album_id, "Container released and removed");
                    }
                }
            }
            Command::Remove { album_id } => {
                if containers.remove(&album_id).is_some() {
                    tracing::debug!(album_id = %album_id, "Container removed");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use easel_core::event::GenerateEvent;
    use easel_core::task::Stage;

    fn album(id: &str) -> Album {
        Album::new(id.to_string(), vec!["cat".into()])
    }

    fn event() -> GenerateEvent {
        GenerateEvent::completed(0, "cat", Stage::Draft, Some("https://cdn.test/a".into()), true)
    }

    #[tokio::test]
    async fn first_attach_gets_the_receiver() {
        let broker = Broker::new();
        let first = broker.get_or_create(album("a")).await.unwrap();
        let second = broker.get_or_create(album("a")).await.unwrap();

        assert!(first.receiver.is_some());
        assert!(second.receiver.is_none());
    }

    #[tokio::test]
    async fn events_funnel_through_one_channel() {
        let broker = Broker::new();
        let mut first = broker.get_or_create(album("a")).await.unwrap();
        let second = broker.get_or_create(album("a")).await.unwrap();

        second.sender.send(event()).await.unwrap();
        first.sender.send(event()).await.unwrap();

        let receiver = first.receiver.as_mut().unwrap();
        assert_eq!(receiver.recv().await.unwrap().prompt_index, 0);
        assert_eq!(receiver.recv().await.unwrap().prompt_index, 0);
    }

    #[tokio::test]
    async fn containers_are_isolated_per_album() {
        let broker = Broker::new();
        let a = broker.get_or_create(album("a")).await.unwrap();
        let b = broker.get_or_create(album("b")).await.unwrap();

        b.sender.send(event()).await.unwrap();
        drop(b);
        broker.release("b").await;

        // Nothing arrives on album a's channel.
        let ContainerHandle {
            sender, receiver, ..
        } = a;
        let mut receiver = receiver.unwrap();
        drop(sender);
        broker.release("a").await;
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn release_at_zero_closes_the_channel() {
        let broker = Broker::new();
        let first = broker.get_or_create(album("a")).await.unwrap();
        let second = broker.get_or_create(album("a")).await.unwrap();

        let ContainerHandle {
            sender, receiver, ..
        } = first;
        let mut receiver = receiver.unwrap();

        drop(second);
        broker.release("a").await;
        drop(sender);
        broker.release("a").await;

        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn remove_tears_down_despite_references() {
        let broker = Broker::new();
        let first = broker.get_or_create(album("a")).await.unwrap();
        let _second = broker.get_or_create(album("a")).await.unwrap();

        let ContainerHandle {
            sender, receiver, ..
        } = first;
        let mut receiver = receiver.unwrap();

        broker.remove("a").await;
        drop(sender);
        drop(_second);

        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn shared_album_state() {
        let broker = Broker::new();
        let first = broker.get_or_create(album("a")).await.unwrap();
        let second = broker.get_or_create(album("a")).await.unwrap();

        first.album.lock().await.mark_finished(0);
        assert_eq!(second.album.lock().await.finished, vec![0]);
    }
}

//! Video store.
//!
//! A single actor task owns every `VideoItem`. All mutations arrive on its
//! command queue and are applied in arrival order, and every applied change
//! is broadcast to subscribers. Readers get snapshots through the same queue,
//! so a snapshot always reflects every update sent before it.

use std::collections::HashMap;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use super::models::{VideoChange, VideoEvent, VideoItem, VideoUpdate};
use crate::core::{CoreError, CoreResult, VideoId};

/// Events buffered per subscriber before it starts lagging
const EVENT_CAPACITY: usize = 1024;

enum StoreCommand {
    Insert(VideoItem),
    Update {
        video_id: VideoId,
        update: VideoUpdate,
    },
    Snapshot {
        video_id: VideoId,
        reply: oneshot::Sender<Option<VideoItem>>,
    },
    List {
        reply: oneshot::Sender<Vec<VideoItem>>,
    },
}

/// Handle to the store actor
#[derive(Clone)]
pub struct VideoStore {
    commands: mpsc::UnboundedSender<StoreCommand>,
    events: broadcast::Sender<VideoEvent>,
}

impl VideoStore {
    /// Spawn the store actor on the current tokio runtime.
    ///
    /// The actor stops once every handle has been dropped.
    pub fn spawn() -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        tokio::spawn(run_store(rx, events.clone()));

        Self { commands, events }
    }

    /// Add an item
    pub fn insert(&self, item: VideoItem) {
        self.send(StoreCommand::Insert(item));
    }

    /// Queue a mutation. Never blocks.
    pub fn update(&self, video_id: VideoId, update: VideoUpdate) {
        self.send(StoreCommand::Update { video_id, update });
    }

    /// Current state of one item
    pub async fn snapshot(&self, video_id: VideoId) -> CoreResult<VideoItem> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::Snapshot { video_id, reply });
        rx.await
            .map_err(|_| CoreError::Internal("video store stopped".to_string()))?
            .ok_or(CoreError::VideoNotFound(video_id))
    }

    /// All items in insertion order
    pub async fn list(&self) -> CoreResult<Vec<VideoItem>> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::List { reply });
        rx.await
            .map_err(|_| CoreError::Internal("video store stopped".to_string()))
    }

    /// Subscribe to change events
    pub fn subscribe(&self) -> broadcast::Receiver<VideoEvent> {
        self.events.subscribe()
    }

    /// Wait until an item satisfies `predicate`, returning that snapshot.
    pub async fn wait_for(
        &self,
        video_id: VideoId,
        mut predicate: impl FnMut(&VideoItem) -> bool,
    ) -> CoreResult<VideoItem> {
        let mut events = self.subscribe();
        loop {
            let item = self.snapshot(video_id).await?;
            if predicate(&item) {
                return Ok(item);
            }
            match events.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(CoreError::Internal("video store stopped".to_string()))
                }
            }
        }
    }

    fn send(&self, command: StoreCommand) {
        if self.commands.send(command).is_err() {
            warn!("Video store is no longer running; dropping command");
        }
    }
}

async fn run_store(
    mut rx: mpsc::UnboundedReceiver<StoreCommand>,
    events: broadcast::Sender<VideoEvent>,
) {
    let mut items: HashMap<VideoId, VideoItem> = HashMap::new();
    let mut order: Vec<VideoId> = Vec::new();

    while let Some(command) = rx.recv().await {
        match command {
            StoreCommand::Insert(item) => {
                let video_id = item.id();
                if items.insert(video_id, item).is_none() {
                    order.push(video_id);
                }
                publish(&events, video_id, VideoChange::Added);
            }
            StoreCommand::Update { video_id, update } => match items.get_mut(&video_id) {
                Some(item) => {
                    if let Some(change) = item.apply(update) {
                        publish(&events, video_id, change);
                    }
                }
                None => debug!("Update for unknown video {} ignored", video_id),
            },
            StoreCommand::Snapshot { video_id, reply } => {
                let _ = reply.send(items.get(&video_id).cloned());
            }
            StoreCommand::List { reply } => {
                let all = order.iter().filter_map(|id| items.get(id).cloned()).collect();
                let _ = reply.send(all);
            }
        }
    }

    debug!("Video store stopped");
}

fn publish(events: &broadcast::Sender<VideoEvent>, video_id: VideoId, change: VideoChange) {
    // No subscribers is fine
    let _ = events.send(VideoEvent { video_id, change });
}

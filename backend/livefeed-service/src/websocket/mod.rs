use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::cache::FeedCache;
use crate::models::FeedSnapshot;

pub mod message_types;

use message_types::WsOutboundEvent;

/// Unique identifier for a push subscriber
///
/// Each WebSocket connection gets its own id when it subscribes, which is
/// what it later unsubscribes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Serialized feed event, shared by every subscriber it is sent to
#[derive(Debug, Clone)]
pub struct FeedFrame {
    pub version: u64,
    pub payload: Arc<str>,
}

impl FeedFrame {
    pub fn from_snapshot(snapshot: &FeedSnapshot) -> Result<Self, serde_json::Error> {
        let payload = WsOutboundEvent::Feed {
            version: snapshot.version,
            posts: &snapshot.posts,
        }
        .to_json()?;

        Ok(Self {
            version: snapshot.version,
            payload: payload.into(),
        })
    }
}

struct Subscriber {
    sender: UnboundedSender<FeedFrame>,
    // Highest version handed to this subscriber so far
    last_version: Mutex<Option<u64>>,
}

impl Subscriber {
    /// Send `frame` unless the subscriber already has the same or a newer one.
    fn deliver(&self, frame: &FeedFrame) -> ConnectionState {
        let mut last = self
            .last_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if matches!(*last, Some(v) if v >= frame.version) {
            return ConnectionState::Connected;
        }

        match self.sender.send(frame.clone()) {
            Ok(()) => {
                *last = Some(frame.version);
                ConnectionState::Connected
            }
            Err(_) => ConnectionState::Disconnected,
        }
    }
}

/// Registry of live push subscribers
///
/// Membership is a concurrent map, so subscribe and unsubscribe never wait
/// on a publish. `publish` works on a copy of the membership taken up front
/// and drops subscribers whose channel has closed once it is done.
#[derive(Clone)]
pub struct FeedHub {
    cache: Arc<FeedCache>,
    subscribers: Arc<DashMap<SubscriberId, Arc<Subscriber>>>,
}

impl FeedHub {
    pub fn new(cache: Arc<FeedCache>) -> Self {
        Self {
            cache,
            subscribers: Arc::new(DashMap::new()),
        }
    }

    /// Register a subscriber and push it the current cached feed.
    ///
    /// Registration happens before the initial push, so a publish racing with
    /// this call is never missed; the version check keeps whichever of the
    /// two snapshots is newer.
    pub fn subscribe(&self) -> (SubscriberId, UnboundedReceiver<FeedFrame>) {
        let (tx, rx) = unbounded_channel();
        let subscriber_id = SubscriberId::new();
        let subscriber = Arc::new(Subscriber {
            sender: tx,
            last_version: Mutex::new(None),
        });

        self.subscribers.insert(subscriber_id, subscriber.clone());

        let snapshot = self.cache.get();
        match FeedFrame::from_snapshot(&snapshot) {
            Ok(frame) => {
                subscriber.deliver(&frame);
            }
            Err(e) => tracing::error!(error = %e, "failed to encode initial feed"),
        }

        tracing::debug!(
            ?subscriber_id,
            version = snapshot.version,
            subscribers = self.subscribers.len(),
            "subscriber added"
        );

        (subscriber_id, rx)
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, subscriber_id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&subscriber_id).is_some();
        if removed {
            tracing::debug!(
                ?subscriber_id,
                remaining = self.subscribers.len(),
                "subscriber removed"
            );
        }
        removed
    }

    /// Push `snapshot` to every subscriber. Returns how many are still connected.
    pub fn publish(&self, snapshot: &FeedSnapshot) -> usize {
        let frame = match FeedFrame::from_snapshot(snapshot) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, version = snapshot.version, "failed to encode feed");
                return 0;
            }
        };

        let members: Vec<(SubscriberId, Arc<Subscriber>)> = self
            .subscribers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut connected = 0;
        let mut dead = Vec::new();
        for (id, subscriber) in members {
            match subscriber.deliver(&frame) {
                ConnectionState::Connected => connected += 1,
                ConnectionState::Disconnected => dead.push(id),
            }
        }

        for id in &dead {
            self.subscribers.remove(id);
        }

        tracing::debug!(
            version = snapshot.version,
            connected,
            dropped = dead.len(),
            "feed published"
        );

        connected
    }

    pub fn state(&self, subscriber_id: SubscriberId) -> ConnectionState {
        match self.subscribers.get(&subscriber_id) {
            Some(entry) if !entry.sender.is_closed() => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

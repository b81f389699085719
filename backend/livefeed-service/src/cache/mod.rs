/// In-memory mirror of the persisted feed
///
/// Readers never block: `get` is a single atomic pointer load. Only the
/// mutation pipeline calls `refresh`, and it does so right after a save
/// succeeded, which keeps versions increasing in save order.
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::models::{FeedSnapshot, Post};

pub struct FeedCache {
    current: ArcSwap<FeedSnapshot>,
}

impl FeedCache {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(FeedSnapshot::default()),
        }
    }

    /// Last snapshot installed by `refresh`.
    pub fn get(&self) -> Arc<FeedSnapshot> {
        self.current.load_full()
    }

    /// Install `posts` as the new snapshot and return it.
    ///
    /// Single writer: callers must not race each other here.
    pub fn refresh(&self, posts: Vec<Post>) -> Arc<FeedSnapshot> {
        let version = self.current.load().version + 1;
        let snapshot = Arc::new(FeedSnapshot { version, posts });
        self.current.store(snapshot.clone());

        tracing::debug!(version, posts = snapshot.posts.len(), "feed cache refreshed");
        snapshot
    }

    pub fn len(&self) -> usize {
        self.current.load().posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FeedCache {
    fn default() -> Self {
        Self::new()
    }
}

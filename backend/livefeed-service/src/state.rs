use std::sync::Arc;

use crate::{
    cache::FeedCache,
    config::Config,
    services::MutationPipeline,
    storage::{AttachmentStore, JsonFileStore},
    websocket::FeedHub,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Arc<MutationPipeline>,
}

impl AppState {
    /// Wire the stores, cache, hub and pipeline described by `config`.
    ///
    /// The cache starts empty; call `MutationPipeline::bootstrap` before
    /// serving traffic.
    pub fn from_config(config: Config) -> Self {
        let records = Arc::new(JsonFileStore::new(
            config.storage.data_file.clone(),
            config.storage.seed,
        ));
        let attachments = AttachmentStore::new(
            config.storage.uploads_dir.clone(),
            &config.storage.uploads_url_prefix,
        );
        let cache = Arc::new(FeedCache::new());
        let hub = FeedHub::new(cache.clone());
        let pipeline = Arc::new(MutationPipeline::new(records, attachments, cache, hub));

        Self {
            config: Arc::new(config),
            pipeline,
        }
    }

    pub fn cache(&self) -> &FeedCache {
        self.pipeline.cache()
    }

    pub fn hub(&self) -> &FeedHub {
        self.pipeline.hub()
    }
}

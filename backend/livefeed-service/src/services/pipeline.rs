/// Mutation pipeline
///
/// The only place the feed is changed. Each mutation takes the write gate,
/// reads the whole feed from the record store, applies its change, saves,
/// refreshes the cache and publishes to the hub, in that order. If the save
/// fails the cache and subscribers keep the last good feed.
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::cache::FeedCache;
use crate::error::{AppError, AppResult};
use crate::models::{FeedSnapshot, NewPost, Post};
use crate::storage::{AttachmentStore, RecordStore};
use crate::websocket::FeedHub;

pub struct MutationPipeline {
    records: Arc<dyn RecordStore>,
    attachments: AttachmentStore,
    cache: Arc<FeedCache>,
    hub: FeedHub,
    write_gate: Mutex<()>,
}

impl MutationPipeline {
    pub fn new(
        records: Arc<dyn RecordStore>,
        attachments: AttachmentStore,
        cache: Arc<FeedCache>,
        hub: FeedHub,
    ) -> Self {
        Self {
            records,
            attachments,
            cache,
            hub,
            write_gate: Mutex::new(()),
        }
    }

    pub fn cache(&self) -> &Arc<FeedCache> {
        &self.cache
    }

    pub fn hub(&self) -> &FeedHub {
        &self.hub
    }

    pub fn attachments(&self) -> &AttachmentStore {
        &self.attachments
    }

    /// Fill the cache from the record store. Called once at startup.
    pub async fn bootstrap(&self) -> AppResult<Arc<FeedSnapshot>> {
        let _guard = self.write_gate.lock().await;
        let posts = self.records.load().await?;
        let snapshot = self.cache.refresh(posts);

        tracing::info!(posts = snapshot.posts.len(), "feed loaded");
        Ok(snapshot)
    }

    /// Create a post, storing its image first when one was sent.
    pub async fn create(&self, submission: NewPost) -> AppResult<Post> {
        let attachment_ref = match &submission.image {
            Some(upload) => Some(
                self.attachments
                    .store(&upload.bytes, &upload.original_name)
                    .await?,
            ),
            None => None,
        };

        let post = Post::new(
            submission.author.unwrap_or_default(),
            submission.message.unwrap_or_default(),
            attachment_ref,
        );

        let result = {
            let _guard = self.write_gate.lock().await;
            self.append(post.clone()).await
        };

        if let Err(e) = result {
            tracing::error!(post_id = %post.id, error = %e, "create failed");
            if let Some(reference) = &post.attachment_ref {
                self.discard_attachment(post.id, reference).await;
            }
            return Err(e);
        }

        tracing::info!(
            post_id = %post.id,
            has_attachment = post.attachment_ref.is_some(),
            "post created"
        );
        Ok(post)
    }

    async fn append(&self, post: Post) -> AppResult<()> {
        let mut posts = self.records.load().await?;
        posts.push(post);
        self.commit(posts).await
    }

    /// Delete a post and, best-effort, its attachment file.
    pub async fn delete(&self, post_id: Uuid) -> AppResult<Post> {
        let _guard = self.write_gate.lock().await;

        let mut posts = self.records.load().await?;
        let position = posts
            .iter()
            .position(|p| p.id == post_id)
            .ok_or_else(|| AppError::NotFound(format!("post {post_id}")))?;

        if let Some(reference) = &posts[position].attachment_ref {
            self.discard_attachment(post_id, reference).await;
        }

        let removed = posts.remove(position);
        self.commit(posts).await?;

        tracing::info!(post_id = %post_id, "post deleted");
        Ok(removed)
    }

    /// Overwrite the whole feed with `posts`.
    pub async fn replace_all(&self, posts: Vec<Post>) -> AppResult<Arc<FeedSnapshot>> {
        let mut seen = std::collections::HashSet::with_capacity(posts.len());
        if let Some(dup) = posts.iter().find(|p| !seen.insert(p.id)) {
            return Err(AppError::Validation(format!("duplicate post id {}", dup.id)));
        }

        let _guard = self.write_gate.lock().await;
        self.records.save(&posts).await?;
        let snapshot = self.cache.refresh(posts);
        self.hub.publish(&snapshot);

        tracing::info!(posts = snapshot.posts.len(), "feed replaced");
        Ok(snapshot)
    }

    /// Save, then refresh the cache, then publish. Caller holds the write gate.
    async fn commit(&self, posts: Vec<Post>) -> AppResult<()> {
        self.records.save(&posts).await?;
        let snapshot = self.cache.refresh(posts);
        self.hub.publish(&snapshot);
        Ok(())
    }

    async fn discard_attachment(&self, post_id: Uuid, reference: &str) {
        match self.attachments.remove(reference).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(post_id = %post_id, reference, "attachment already absent")
            }
            Err(e) => tracing::warn!(
                post_id = %post_id,
                reference,
                error = %e,
                "failed to remove attachment"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Upload;
    use crate::storage::{JsonFileStore, SeedPolicy};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        records: Arc<JsonFileStore>,
        pipeline: Arc<MutationPipeline>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let records = Arc::new(JsonFileStore::new(
            dir.path().join("posts.json"),
            SeedPolicy::Empty,
        ));
        let attachments = AttachmentStore::new(dir.path().join("uploads"), "/uploads");
        let cache = Arc::new(FeedCache::new());
        let hub = FeedHub::new(cache.clone());
        let pipeline = Arc::new(MutationPipeline::new(
            records.clone(),
            attachments,
            cache,
            hub,
        ));

        Fixture {
            _dir: dir,
            records,
            pipeline,
        }
    }

    fn text_post(author: &str, message: &str) -> NewPost {
        NewPost {
            author: Some(author.to_string()),
            message: Some(message.to_string()),
            image: None,
        }
    }

    #[tokio::test]
    async fn creates_are_persisted_in_submission_order() {
        let fx = fixture();
        for i in 0..5 {
            fx.pipeline
                .create(text_post("a", &format!("m{i}")))
                .await
                .unwrap();
        }

        let stored = fx.records.load().await.unwrap();
        let messages: Vec<_> = stored.iter().map(|p| p.message.as_str()).collect();
        assert_eq!(messages, vec!["m0", "m1", "m2", "m3", "m4"]);
        assert_eq!(fx.pipeline.cache().get().posts, stored);
    }

    #[tokio::test]
    async fn missing_author_and_message_are_stored_empty() {
        let fx = fixture();
        let post = fx.pipeline.create(NewPost::default()).await.unwrap();

        assert_eq!(post.author, "");
        assert_eq!(post.message, "");
        assert_eq!(post.attachment_ref, None);
    }

    #[tokio::test]
    async fn concurrent_creates_do_not_lose_updates() {
        let fx = fixture();

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let pipeline = fx.pipeline.clone();
                tokio::spawn(async move { pipeline.create(text_post("a", &i.to_string())).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(fx.records.load().await.unwrap().len(), 20);
        assert_eq!(fx.pipeline.cache().len(), 20);
    }

    #[tokio::test]
    async fn delete_unknown_id_is_not_found_and_changes_nothing() {
        let fx = fixture();
        fx.pipeline.create(text_post("a", "hi")).await.unwrap();
        let before = fx.records.load().await.unwrap();
        let version = fx.pipeline.cache().get().version;

        let err = fx.pipeline.delete(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(fx.records.load().await.unwrap(), before);
        assert_eq!(fx.pipeline.cache().get().version, version);
    }

    #[tokio::test]
    async fn delete_twice_second_is_not_found() {
        let fx = fixture();
        let post = fx.pipeline.create(text_post("a", "hi")).await.unwrap();
        fx.pipeline.create(text_post("b", "there")).await.unwrap();

        fx.pipeline.delete(post.id).await.unwrap();
        assert!(matches!(
            fx.pipeline.delete(post.id).await,
            Err(AppError::NotFound(_))
        ));
        assert_eq!(fx.records.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_attachment_and_tolerates_missing_file() {
        let fx = fixture();
        let with_image = |name: &str| NewPost {
            author: Some("a".into()),
            message: Some("pic".into()),
            image: Some(Upload {
                bytes: b"img".to_vec(),
                original_name: name.to_string(),
            }),
        };

        let first = fx.pipeline.create(with_image("one.png")).await.unwrap();
        let second = fx.pipeline.create(with_image("two.jpg")).await.unwrap();

        let first_path = fx
            .pipeline
            .attachments()
            .resolve(first.attachment_ref.as_deref().unwrap())
            .unwrap();
        assert!(first_path.exists());
        fx.pipeline.delete(first.id).await.unwrap();
        assert!(!first_path.exists());

        let second_path = fx
            .pipeline
            .attachments()
            .resolve(second.attachment_ref.as_deref().unwrap())
            .unwrap();
        tokio::fs::remove_file(&second_path).await.unwrap();
        fx.pipeline.delete(second.id).await.unwrap();

        assert!(fx.records.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn subscribers_see_every_mutation() {
        let fx = fixture();
        fx.pipeline.create(text_post("a", "before")).await.unwrap();

        let (_, mut rx) = fx.pipeline.hub().subscribe();
        let initial = rx.try_recv().unwrap();
        let value: serde_json::Value = serde_json::from_str(&initial.payload).unwrap();
        assert_eq!(value["posts"].as_array().unwrap().len(), 1);

        let post = fx.pipeline.create(text_post("b", "after")).await.unwrap();
        fx.pipeline.delete(post.id).await.unwrap();

        let lengths: Vec<usize> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|f| {
                let value: serde_json::Value = serde_json::from_str(&f.payload).unwrap();
                value["posts"].as_array().unwrap().len()
            })
            .collect();
        assert_eq!(lengths, vec![2, 1]);
    }

    #[tokio::test]
    async fn replace_all_rejects_duplicate_ids() {
        let fx = fixture();
        let post = Post::new("a".into(), "b".into(), None);

        let err = fx
            .pipeline
            .replace_all(vec![post.clone(), post])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(fx.records.load().await.unwrap().is_empty());
    }

    /// Record store whose saves can be switched to fail
    struct FlakyStore {
        inner: JsonFileStore,
        fail_saves: AtomicBool,
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn load(&self) -> AppResult<Vec<Post>> {
            self.inner.load().await
        }

        async fn save(&self, posts: &[Post]) -> AppResult<()> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(AppError::Storage("disk full".into()));
            }
            self.inner.save(posts).await
        }
    }

    #[tokio::test]
    async fn failed_save_leaves_cache_and_subscribers_untouched() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FlakyStore {
            inner: JsonFileStore::new(dir.path().join("posts.json"), SeedPolicy::Empty),
            fail_saves: AtomicBool::new(false),
        });
        let attachments = AttachmentStore::new(dir.path().join("uploads"), "/uploads");
        let cache = Arc::new(FeedCache::new());
        let hub = FeedHub::new(cache.clone());
        let pipeline =
            MutationPipeline::new(store.clone(), attachments, cache.clone(), hub.clone());

        pipeline.create(text_post("a", "kept")).await.unwrap();
        let (_, mut rx) = hub.subscribe();
        rx.try_recv().unwrap();

        store.fail_saves.store(true, Ordering::SeqCst);
        let err = pipeline
            .create(NewPost {
                image: Some(Upload {
                    bytes: b"img".to_vec(),
                    original_name: "x.png".into(),
                }),
                ..text_post("b", "lost")
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Storage(_)));
        assert_eq!(cache.len(), 1);
        assert!(rx.try_recv().is_err());

        // The image written for the failed create was rolled back.
        let mut entries = tokio::fs::read_dir(dir.path().join("uploads")).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }
}

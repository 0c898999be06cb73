//! Comment threads with optimistic mutations.
//!
//! Every write runs the same three phases against the thread's list key:
//!
//! 1. pre-mutate: cancel in-flight fetches of the list, snapshot it and write
//!    the speculative list;
//! 2. commit: call the API;
//! 3. reconcile: on success mark the list stale so it is refetched; on
//!    failure put the snapshot back and publish a failure notification.
//!
//! Blank content is rejected before phase 1, so it never reaches the cache
//! or the network.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mangasync_api_types::Comment;
use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, instrument, warn};

use crate::application::error::ApiError;
use crate::application::notifications::NotificationCenter;
use crate::cache::{QueryCache, QueryKey, RestoreOutcome, Version, mutex_lock};
use crate::domain::comments::{self, CommentDraft, Viewer};
use crate::domain::error::DomainError;

const SOURCE: &str = "application::comments";
const METRIC_MUTATION_ROLLBACK: &str = "mangasync_mutation_rollback_total";

pub const DELETE_CONFIRMATION_PROMPT: &str = "Are you sure you want to delete this comment?";

/// The thread a comment belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CommentTarget {
    Series(String),
    Chapter(String),
}

impl CommentTarget {
    /// Cache key of the thread's comment list.
    pub fn list_key(&self) -> QueryKey {
        match self {
            CommentTarget::Series(id) => QueryKey::from(["comments", "series", id.as_str()]),
            CommentTarget::Chapter(id) => QueryKey::from(["comments", "chapter", id.as_str()]),
        }
    }

    /// Collection path for listing and posting.
    pub fn endpoint(&self) -> String {
        match self {
            CommentTarget::Series(id) => format!("/api/series/{id}/comments"),
            CommentTarget::Chapter(id) => format!("/api/chapters/{id}/comments"),
        }
    }

    pub fn series_id(&self) -> Option<&str> {
        match self {
            CommentTarget::Series(id) => Some(id),
            CommentTarget::Chapter(_) => None,
        }
    }

    pub fn chapter_id(&self) -> Option<&str> {
        match self {
            CommentTarget::Series(_) => None,
            CommentTarget::Chapter(id) => Some(id),
        }
    }
}

impl fmt::Display for CommentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommentTarget::Series(id) => write!(f, "series/{id}"),
            CommentTarget::Chapter(id) => write!(f, "chapter/{id}"),
        }
    }
}

/// REST operations on comments.
#[async_trait]
pub trait CommentsApi: Send + Sync {
    async fn list_comments(&self, target: &CommentTarget) -> Result<Vec<Comment>, ApiError>;
    async fn create_comment(&self, target: &CommentTarget, content: &str) -> Result<(), ApiError>;
    async fn update_comment(&self, comment_id: &str, content: &str) -> Result<(), ApiError>;
    async fn delete_comment(&self, comment_id: &str) -> Result<(), ApiError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommentOp {
    Create,
    Update,
    Delete,
}

impl CommentOp {
    pub fn as_str(self) -> &'static str {
        match self {
            CommentOp::Create => "create",
            CommentOp::Update => "update",
            CommentOp::Delete => "delete",
        }
    }

    fn success(self) -> (&'static str, &'static str) {
        match self {
            CommentOp::Create => (
                "Comment posted",
                "Your comment has been posted successfully.",
            ),
            CommentOp::Update => (
                "Comment updated",
                "Your comment has been updated successfully.",
            ),
            CommentOp::Delete => (
                "Comment deleted",
                "Your comment has been deleted successfully.",
            ),
        }
    }

    fn failure(self) -> (&'static str, &'static str) {
        match self {
            CommentOp::Create => (
                "Failed to post comment",
                "Unable to post your comment. Please try again.",
            ),
            CommentOp::Update => (
                "Failed to update comment",
                "Unable to update your comment. Please try again.",
            ),
            CommentOp::Delete => (
                "Failed to delete comment",
                "Unable to delete your comment. Please try again.",
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum CommentError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("a {} request is already in flight", .0.as_str())]
    Busy(CommentOp),
    #[error("no comment is being edited")]
    NotEditing,
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Default)]
struct EditorState {
    draft: CommentDraft,
    editing: Option<(String, CommentDraft)>,
}

#[derive(Default)]
struct PendingFlags {
    create: AtomicBool,
    update: AtomicBool,
    delete: AtomicBool,
}

impl PendingFlags {
    fn flag(&self, op: CommentOp) -> &AtomicBool {
        match op {
            CommentOp::Create => &self.create,
            CommentOp::Update => &self.update,
            CommentOp::Delete => &self.delete,
        }
    }

    fn claim(&self, op: CommentOp) -> Option<PendingGuard<'_>> {
        let flag = self.flag(op);
        if flag.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(PendingGuard { flag })
    }
}

struct PendingGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// One comment thread bound to a cache handle.
pub struct CommentService {
    api: Arc<dyn CommentsApi>,
    cache: QueryCache,
    notifications: NotificationCenter,
    target: CommentTarget,
    viewer: Option<Viewer>,
    editor: Mutex<EditorState>,
    pending: PendingFlags,
}

impl CommentService {
    pub fn new(
        api: Arc<dyn CommentsApi>,
        cache: QueryCache,
        notifications: NotificationCenter,
        target: CommentTarget,
        viewer: Option<Viewer>,
    ) -> Self {
        Self {
            api,
            cache,
            notifications,
            target,
            viewer,
            editor: Mutex::new(EditorState::default()),
            pending: PendingFlags::default(),
        }
    }

    pub fn target(&self) -> &CommentTarget {
        &self.target
    }

    pub fn viewer(&self) -> Option<&Viewer> {
        self.viewer.as_ref()
    }

    pub fn is_pending(&self, op: CommentOp) -> bool {
        self.pending.flag(op).load(Ordering::SeqCst)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// The thread as currently cached, newest first. Empty when absent.
    pub fn comments(&self) -> Vec<Comment> {
        self.cache
            .get_data(&self.target.list_key())
            .unwrap_or_default()
    }

    /// Return the cached thread, fetching it when absent or stale.
    #[instrument(skip(self), fields(target = %self.target))]
    pub async fn load(&self) -> Result<Vec<Comment>, ApiError> {
        let key = self.target.list_key();
        self.cache
            .fetch_query(&key, || self.api.list_comments(&self.target))
            .await
    }

    /// Fetch the thread regardless of freshness.
    #[instrument(skip(self), fields(target = %self.target))]
    pub async fn refresh(&self) -> Result<Vec<Comment>, ApiError> {
        let key = self.target.list_key();
        self.cache
            .refetch_query(&key, || self.api.list_comments(&self.target))
            .await
    }

    pub fn can_edit(&self, comment: &Comment) -> bool {
        comments::can_edit(self.viewer.as_ref(), comment)
    }

    pub fn can_delete(&self, comment: &Comment) -> bool {
        comments::can_delete(self.viewer.as_ref(), comment)
    }

    // ========================================================================
    // Input state
    // ========================================================================

    pub fn set_draft(&self, input: &str) {
        mutex_lock(&self.editor, SOURCE, "set_draft").draft.set(input);
    }

    pub fn draft(&self) -> String {
        mutex_lock(&self.editor, SOURCE, "draft")
            .draft
            .content()
            .to_string()
    }

    /// Open `comment` for editing, seeded with its current content.
    pub fn start_edit(&self, comment: &Comment) -> Result<(), CommentError> {
        if !self.can_edit(comment) {
            return Err(DomainError::forbidden("edit comment").into());
        }
        let mut draft = CommentDraft::new();
        draft.set(&comment.content);
        mutex_lock(&self.editor, SOURCE, "start_edit").editing = Some((comment.id.clone(), draft));
        Ok(())
    }

    pub fn set_edit_content(&self, input: &str) -> Result<(), CommentError> {
        let mut editor = mutex_lock(&self.editor, SOURCE, "set_edit_content");
        let (_, draft) = editor.editing.as_mut().ok_or(CommentError::NotEditing)?;
        draft.set(input);
        Ok(())
    }

    /// The comment id and content currently being edited.
    pub fn editing(&self) -> Option<(String, String)> {
        mutex_lock(&self.editor, SOURCE, "editing")
            .editing
            .as_ref()
            .map(|(id, draft)| (id.clone(), draft.content().to_string()))
    }

    pub fn cancel_edit(&self) {
        mutex_lock(&self.editor, SOURCE, "cancel_edit").editing = None;
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Post the current draft.
    pub async fn submit_draft(&self) -> Result<(), CommentError> {
        let content = self.draft();
        self.create(&content).await
    }

    /// Save the comment being edited.
    pub async fn save_edit(&self) -> Result<(), CommentError> {
        let (comment_id, content) = self.editing().ok_or(CommentError::NotEditing)?;
        self.edit(&comment_id, &content).await
    }

    /// Post `input` as if typed into the comment box, so the length cap
    /// applies before anything is sent.
    pub async fn post_text(&self, input: &str) -> Result<(), CommentError> {
        self.set_draft(input);
        self.submit_draft().await
    }

    /// Edit a cached comment with `input` as if typed into its edit box.
    pub async fn edit_text(&self, comment_id: &str, input: &str) -> Result<(), CommentError> {
        let comment = self
            .comments()
            .into_iter()
            .find(|comment| comment.id == comment_id)
            .ok_or_else(|| {
                DomainError::validation(format!("comment `{comment_id}` is not in this thread"))
            })?;
        self.start_edit(&comment)?;
        self.set_edit_content(input)?;
        self.save_edit().await
    }

    /// Post a new comment.
    ///
    /// The optimistic entry is only inserted for a signed-in viewer; the
    /// request is sent either way.
    #[instrument(skip(self, content), fields(target = %self.target))]
    pub async fn create(&self, content: &str) -> Result<(), CommentError> {
        let content = comments::validate_content(content)?;
        let _pending = self
            .pending
            .claim(CommentOp::Create)
            .ok_or(CommentError::Busy(CommentOp::Create))?;

        let optimistic = self
            .viewer
            .as_ref()
            .map(|viewer| self.optimistic_comment(viewer, &content));

        self.mutate(
            CommentOp::Create,
            |mut list| {
                let comment = optimistic?;
                list.insert(0, comment);
                Some(list)
            },
            self.api.create_comment(&self.target, &content),
        )
        .await?;

        mutex_lock(&self.editor, SOURCE, "create").draft.clear();
        Ok(())
    }

    /// Replace a comment's content.
    #[instrument(skip(self, content), fields(target = %self.target))]
    pub async fn edit(&self, comment_id: &str, content: &str) -> Result<(), CommentError> {
        let content = comments::validate_content(content)?;
        let _pending = self
            .pending
            .claim(CommentOp::Update)
            .ok_or(CommentError::Busy(CommentOp::Update))?;

        let updated_at = now_rfc3339();
        self.mutate(
            CommentOp::Update,
            |mut list| {
                for comment in list.iter_mut().filter(|comment| comment.id == comment_id) {
                    comment.content = content.clone();
                    comment.updated_at = updated_at.clone();
                }
                Some(list)
            },
            self.api.update_comment(comment_id, &content),
        )
        .await?;

        mutex_lock(&self.editor, SOURCE, "edit").editing = None;
        Ok(())
    }

    /// Delete a comment once `confirm` accepts the prompt.
    ///
    /// Returns `Ok(false)` when the confirmation is declined; nothing is
    /// touched in that case.
    #[instrument(skip(self, confirm), fields(target = %self.target))]
    pub async fn delete<C>(&self, comment_id: &str, confirm: C) -> Result<bool, CommentError>
    where
        C: FnOnce(&str) -> bool,
    {
        if !confirm(DELETE_CONFIRMATION_PROMPT) {
            debug!(comment_id, "Delete declined");
            return Ok(false);
        }
        let _pending = self
            .pending
            .claim(CommentOp::Delete)
            .ok_or(CommentError::Busy(CommentOp::Delete))?;

        self.mutate(
            CommentOp::Delete,
            |mut list| {
                list.retain(|comment| comment.id != comment_id);
                Some(list)
            },
            self.api.delete_comment(comment_id),
        )
        .await?;
        Ok(true)
    }

    async fn mutate<F, Fut>(
        &self,
        op: CommentOp,
        apply: F,
        commit: Fut,
    ) -> Result<(), CommentError>
    where
        F: FnOnce(Vec<Comment>) -> Option<Vec<Comment>>,
        Fut: Future<Output = Result<(), ApiError>>,
    {
        let key = self.target.list_key();

        // Phase 1: pre-mutate.
        self.cache.cancel_fetches(&key);
        let snapshot = self.cache.snapshot(&key);
        let written = self.write_optimistic(&key, snapshot.value(), apply);

        // Phase 2: commit.
        let result = commit.await;

        // Phase 3: reconcile.
        match result {
            Ok(()) => {
                self.cache.invalidate(&key);
                let (title, description) = op.success();
                self.notifications.success(title, description);
                info!(op = op.as_str(), key = %key, "Comment mutation committed");
                Ok(())
            }
            Err(err) => {
                if let Some(version) = written {
                    match self.cache.restore_if_current(snapshot, version) {
                        RestoreOutcome::Restored => {
                            warn!(op = op.as_str(), key = %key, error = %err, "Comment mutation rolled back");
                        }
                        RestoreOutcome::Superseded => {
                            self.cache.invalidate(&key);
                            warn!(
                                op = op.as_str(),
                                key = %key,
                                error = %err,
                                "Comment mutation failed after a newer write; list marked stale"
                            );
                        }
                    }
                    counter!(METRIC_MUTATION_ROLLBACK, "op" => op.as_str()).increment(1);
                }
                let (title, fallback) = op.failure();
                let description = err.server_message().unwrap_or(fallback);
                self.notifications.failure(title, description);
                Err(CommentError::Api(err))
            }
        }
    }

    /// Write the speculative list. Returns the written version, or `None`
    /// when nothing was written.
    fn write_optimistic<F>(
        &self,
        key: &QueryKey,
        current: Option<&serde_json::Value>,
        apply: F,
    ) -> Option<Version>
    where
        F: FnOnce(Vec<Comment>) -> Option<Vec<Comment>>,
    {
        let list = match current {
            None => Vec::new(),
            Some(value) => match serde_json::from_value::<Vec<Comment>>(value.clone()) {
                Ok(list) => list,
                Err(err) => {
                    debug!(key = %key, error = %err, "Cached thread unreadable; skipping optimistic write");
                    return None;
                }
            },
        };

        let next = apply(list)?;
        match self.cache.set_data(key.clone(), &next) {
            Ok(version) => Some(version),
            Err(err) => {
                debug!(key = %key, error = %err, "Optimistic write failed");
                None
            }
        }
    }

    fn optimistic_comment(&self, viewer: &Viewer, content: &str) -> Comment {
        let now = OffsetDateTime::now_utc();
        let timestamp = now.format(&Rfc3339).ok();
        Comment {
            id: format!("temp-{}", now.unix_timestamp_nanos() / 1_000_000),
            user_id: viewer.id.clone(),
            series_id: self.target.series_id().map(str::to_string),
            chapter_id: self.target.chapter_id().map(str::to_string),
            content: content.to_string(),
            created_at: timestamp.clone(),
            updated_at: timestamp,
            user: viewer.as_author(),
        }
    }
}

fn now_rfc3339() -> Option<String> {
    OffsetDateTime::now_utc().format(&Rfc3339).ok()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use mangasync_api_types::CommentAuthor;
    use serde_json::json;

    use super::*;
    use crate::application::notifications::NotificationKind;
    use crate::cache::{CacheConsumer, InvalidationPlan, ServerEvent};
    use crate::domain::comments::Role;

    #[derive(Default)]
    struct RecordingApi {
        fail_with: Option<ApiError>,
        calls: StdMutex<Vec<String>>,
    }

    impl RecordingApi {
        fn failing(err: ApiError) -> Self {
            Self {
                fail_with: Some(err),
                calls: StdMutex::new(Vec::new()),
            }
        }

        fn record(&self, call: String) -> Result<(), ApiError> {
            self.calls.lock().expect("calls lock").push(call);
            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl CommentsApi for RecordingApi {
        async fn list_comments(&self, target: &CommentTarget) -> Result<Vec<Comment>, ApiError> {
            self.record(format!("list {target}"))?;
            Ok(vec![comment("c-server", "u9", "from server")])
        }

        async fn create_comment(
            &self,
            target: &CommentTarget,
            content: &str,
        ) -> Result<(), ApiError> {
            self.record(format!("create {target} {content}"))
        }

        async fn update_comment(&self, comment_id: &str, content: &str) -> Result<(), ApiError> {
            self.record(format!("update {comment_id} {content}"))
        }

        async fn delete_comment(&self, comment_id: &str) -> Result<(), ApiError> {
            self.record(format!("delete {comment_id}"))
        }
    }

    fn comment(id: &str, user_id: &str, content: &str) -> Comment {
        Comment {
            id: id.into(),
            user_id: user_id.into(),
            series_id: Some("s1".into()),
            chapter_id: None,
            content: content.into(),
            created_at: Some("2024-05-01T00:00:00Z".into()),
            updated_at: Some("2024-05-01T00:00:00Z".into()),
            user: CommentAuthor {
                id: user_id.into(),
                username: Some("reader".into()),
                profile_picture: None,
                profile_image_url: None,
            },
        }
    }

    fn service(api: Arc<RecordingApi>, cache: &QueryCache) -> (CommentService, NotificationCenter) {
        let notifications = NotificationCenter::new();
        let service = CommentService::new(
            api,
            cache.clone(),
            notifications.clone(),
            CommentTarget::Series("s1".into()),
            Some(Viewer::new("u1", Some("reader".into()), Role::User)),
        );
        (service, notifications)
    }

    fn list_key() -> QueryKey {
        CommentTarget::Series("s1".into()).list_key()
    }

    #[test]
    fn target_keys_and_endpoints() {
        let chapter = CommentTarget::Chapter("c7".into());
        assert_eq!(chapter.list_key(), QueryKey::from(["comments", "chapter", "c7"]));
        assert_eq!(chapter.endpoint(), "/api/chapters/c7/comments");
        assert_eq!(
            CommentTarget::Series("s1".into()).endpoint(),
            "/api/series/s1/comments"
        );
    }

    #[tokio::test]
    async fn create_success_marks_list_stale() {
        let cache = QueryCache::new();
        cache.set_value(list_key(), json!([]));
        let api = Arc::new(RecordingApi::default());
        let (service, notifications) = service(api.clone(), &cache);
        service.set_draft("hello");

        service.create("  hello  ").await.expect("create");

        let list = service.comments();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].content, "hello");
        assert!(list[0].id.starts_with("temp-"));
        assert!(cache.is_stale(&list_key()));
        assert_eq!(service.draft(), "");
        assert_eq!(api.calls(), vec!["create series/s1 hello"]);

        let toasts = notifications.drain(10);
        assert_eq!(toasts[0].kind, NotificationKind::Success);
        assert_eq!(toasts[0].title, "Comment posted");
    }

    #[tokio::test]
    async fn create_failure_restores_empty_list() {
        let cache = QueryCache::new();
        cache.set_value(list_key(), json!([]));
        let api = Arc::new(RecordingApi::failing(ApiError::status(
            500,
            Some("Comments are disabled".into()),
        )));
        let (service, notifications) = service(api, &cache);

        let err = service.create("hello").await.expect_err("failure");

        assert!(matches!(err, CommentError::Api(_)));
        assert_eq!(cache.get(&list_key()).expect("entry").value, json!([]));
        assert!(!cache.is_stale(&list_key()));

        let toasts = notifications.drain(10);
        assert_eq!(toasts[0].kind, NotificationKind::Failure);
        assert_eq!(toasts[0].title, "Failed to post comment");
        assert_eq!(toasts[0].description, "Comments are disabled");
    }

    #[tokio::test]
    async fn failure_without_server_message_uses_fallback() {
        let cache = QueryCache::new();
        let api = Arc::new(RecordingApi::failing(ApiError::transport("connection reset")));
        let (service, notifications) = service(api, &cache);

        service.create("hello").await.expect_err("failure");

        assert!(!cache.contains(&list_key()));
        assert_eq!(
            notifications.drain(1)[0].description,
            "Unable to post your comment. Please try again."
        );
    }

    #[tokio::test]
    async fn blank_content_never_reaches_network_or_cache() {
        let cache = QueryCache::new();
        cache.set_value(list_key(), json!([]));
        let before = cache.get(&list_key());
        let api = Arc::new(RecordingApi::default());
        let (service, notifications) = service(api.clone(), &cache);

        let err = service.create(" \t\n").await.expect_err("blank");
        assert!(matches!(err, CommentError::Domain(_)));
        let err = service.edit("c1", "").await.expect_err("blank");
        assert!(matches!(err, CommentError::Domain(_)));

        assert!(api.calls().is_empty());
        assert_eq!(cache.get(&list_key()), before);
        assert!(notifications.is_empty());
    }

    #[tokio::test]
    async fn anonymous_create_skips_optimistic_insert() {
        let cache = QueryCache::new();
        cache.set_value(list_key(), json!([]));
        let api = Arc::new(RecordingApi::default());
        let service = CommentService::new(
            api.clone(),
            cache.clone(),
            NotificationCenter::new(),
            CommentTarget::Series("s1".into()),
            None,
        );

        service.create("hello").await.expect("create");

        assert_eq!(cache.get(&list_key()).expect("entry").value, json!([]));
        assert_eq!(api.calls().len(), 1);
    }

    #[tokio::test]
    async fn edit_failure_restores_snapshot() {
        let cache = QueryCache::new();
        let original = vec![comment("c1", "u1", "first"), comment("c2", "u2", "second")];
        cache.set_data(list_key(), &original).expect("seed");
        let snapshot = cache.get(&list_key()).expect("entry").value;
        let api = Arc::new(RecordingApi::failing(ApiError::status(500, None)));
        let (service, _) = service(api, &cache);

        service.edit("c1", "changed").await.expect_err("failure");

        assert_eq!(cache.get(&list_key()).expect("entry").value, snapshot);
    }

    #[tokio::test]
    async fn edit_success_updates_in_place_and_clears_edit_state() {
        let cache = QueryCache::new();
        cache
            .set_data(list_key(), &vec![comment("c1", "u1", "first")])
            .expect("seed");
        let api = Arc::new(RecordingApi::default());
        let (service, _) = service(api.clone(), &cache);

        service
            .start_edit(&comment("c1", "u1", "first"))
            .expect("author may edit");
        service.set_edit_content("changed").expect("editing");
        service.save_edit().await.expect("save");

        let list = service.comments();
        assert_eq!(list[0].content, "changed");
        assert_ne!(list[0].updated_at, list[0].created_at);
        assert!(service.editing().is_none());
        assert_eq!(api.calls(), vec!["update c1 changed"]);
    }

    #[test]
    fn start_edit_requires_authorship() {
        let cache = QueryCache::new();
        let (service, _) = service(Arc::new(RecordingApi::default()), &cache);

        let err = service
            .start_edit(&comment("c2", "u2", "not mine"))
            .expect_err("forbidden");
        assert!(matches!(err, CommentError::Domain(DomainError::Forbidden { .. })));
    }

    #[tokio::test]
    async fn delete_failure_restores_removed_comment() {
        let cache = QueryCache::new();
        cache
            .set_data(list_key(), &vec![comment("c1", "u1", "first")])
            .expect("seed");
        let snapshot = cache.get(&list_key()).expect("entry").value;
        let api = Arc::new(RecordingApi::failing(ApiError::status(404, None)));
        let (service, notifications) = service(api, &cache);

        service.delete("c1", |_| true).await.expect_err("failure");

        assert_eq!(cache.get(&list_key()).expect("entry").value, snapshot);
        assert_eq!(notifications.drain(1)[0].title, "Failed to delete comment");
    }

    #[tokio::test]
    async fn declined_delete_is_a_no_op() {
        let cache = QueryCache::new();
        cache
            .set_data(list_key(), &vec![comment("c1", "u1", "first")])
            .expect("seed");
        let api = Arc::new(RecordingApi::default());
        let (service, _) = service(api.clone(), &cache);

        let mut prompt = String::new();
        let deleted = service
            .delete("c1", |text| {
                prompt = text.to_string();
                false
            })
            .await
            .expect("declined");

        assert!(!deleted);
        assert_eq!(prompt, DELETE_CONFIRMATION_PROMPT);
        assert!(api.calls().is_empty());
        assert_eq!(service.comments().len(), 1);
    }

    #[tokio::test]
    async fn rollback_yields_to_newer_write() {
        let cache = QueryCache::new();
        cache.set_value(list_key(), json!([]));
        let api = Arc::new(RecordingApi::failing(ApiError::status(500, None)));
        let (service, _) = service(api, &cache);

        let key = list_key();
        let racing = cache.clone();
        let result = service
            .mutate(
                CommentOp::Create,
                |mut list| {
                    list.push(comment("temp-1", "u1", "optimistic"));
                    Some(list)
                },
                async move {
                    racing.set_value(key, json!([{"written": "elsewhere"}]));
                    Err(ApiError::status(500, None))
                },
            )
            .await;

        assert!(result.is_err());
        let entry = cache.get(&list_key()).expect("entry");
        assert_eq!(entry.value, json!([{"written": "elsewhere"}]));
        assert!(entry.is_stale());
    }

    #[tokio::test]
    async fn typed_post_is_capped_before_sending() {
        let cache = QueryCache::new();
        let api = Arc::new(RecordingApi::default());
        let (service, _) = service(api.clone(), &cache);

        service.post_text(&"a".repeat(1200)).await.expect("post");

        let expected = format!("create series/s1 {}", "a".repeat(1000));
        assert_eq!(api.calls(), vec![expected]);
        assert!(service.draft().is_empty());
    }

    #[tokio::test]
    async fn typed_edit_is_capped_before_sending() {
        let cache = QueryCache::new();
        cache
            .set_data(list_key(), &vec![comment("c1", "u1", "first")])
            .expect("seed");
        let api = Arc::new(RecordingApi::default());
        let (service, _) = service(api.clone(), &cache);

        service.edit_text("c1", &"b".repeat(1001)).await.expect("edit");

        assert_eq!(api.calls(), vec![format!("update c1 {}", "b".repeat(1000))]);
        assert!(service.editing().is_none());
    }

    #[tokio::test]
    async fn typed_edit_of_unknown_comment_sends_nothing() {
        let cache = QueryCache::new();
        cache.set_data(list_key(), &Vec::<Comment>::new()).expect("seed");
        let api = Arc::new(RecordingApi::default());
        let (service, _) = service(api.clone(), &cache);

        let err = service.edit_text("missing", "text").await.expect_err("unknown");

        assert!(matches!(err, CommentError::Domain(_)));
        assert!(api.calls().is_empty());
    }

    /// Applies a maintenance push while the create request is in flight,
    /// then rejects it.
    struct FlushDuringCommit {
        cache: QueryCache,
    }

    #[async_trait]
    impl CommentsApi for FlushDuringCommit {
        async fn list_comments(&self, _: &CommentTarget) -> Result<Vec<Comment>, ApiError> {
            Ok(Vec::new())
        }

        async fn create_comment(&self, _: &CommentTarget, _: &str) -> Result<(), ApiError> {
            let event = ServerEvent::from_parts("system", json!({"type": "maintenance"}));
            CacheConsumer::new(self.cache.clone()).apply(&InvalidationPlan::for_event(&event));
            Err(ApiError::status(500, None))
        }

        async fn update_comment(&self, _: &str, _: &str) -> Result<(), ApiError> {
            Ok(())
        }

        async fn delete_comment(&self, _: &str) -> Result<(), ApiError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn rollback_survives_maintenance_flush_during_commit() {
        let cache = QueryCache::new();
        cache.set_value(list_key(), json!([]));
        let service = CommentService::new(
            Arc::new(FlushDuringCommit {
                cache: cache.clone(),
            }),
            cache.clone(),
            NotificationCenter::new(),
            CommentTarget::Series("s1".into()),
            Some(Viewer::new("u1", Some("reader".into()), Role::User)),
        );

        service.create("hello").await.expect_err("rejected");

        let entry = cache.get(&list_key()).expect("entry");
        assert_eq!(entry.value, json!([]));
        assert!(entry.is_stale());
    }

    #[tokio::test]
    async fn load_fetches_once_while_fresh() {
        let cache = QueryCache::new();
        let api = Arc::new(RecordingApi::default());
        let (service, _) = service(api.clone(), &cache);

        let first = service.load().await.expect("load");
        let second = service.load().await.expect("load");

        assert_eq!(first, second);
        assert_eq!(api.calls().len(), 1);
    }
}

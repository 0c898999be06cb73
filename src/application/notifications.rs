//! In-process notification channel.
//!
//! Mutation outcomes and `system` pushes land here as toasts. The center
//! keeps a bounded backlog for pull-style consumers and broadcasts each
//! notification to live subscribers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::cache::{SystemNotice, mutex_lock};

const SOURCE: &str = "application::notifications";
const DEFAULT_CAPACITY: usize = 64;
const SYSTEM_TITLE: &str = "System notice";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Failure,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub sequence: u64,
    pub kind: NotificationKind,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

struct Inner {
    backlog: Mutex<VecDeque<Notification>>,
    sequence: AtomicU64,
    capacity: usize,
    live: broadcast::Sender<Notification>,
}

/// Cloneable handle to the session's notification channel.
#[derive(Clone)]
pub struct NotificationCenter {
    inner: Arc<Inner>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A center keeping at most `capacity` undrained notifications; the
    /// oldest is dropped first.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (live, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(Inner {
                backlog: Mutex::new(VecDeque::with_capacity(capacity)),
                sequence: AtomicU64::new(0),
                capacity,
                live,
            }),
        }
    }

    pub fn publish(
        &self,
        kind: NotificationKind,
        title: impl Into<String>,
        description: impl Into<String>,
        payload: Option<Value>,
    ) -> Notification {
        let notification = Notification {
            id: Uuid::new_v4(),
            sequence: self.inner.sequence.fetch_add(1, Ordering::SeqCst),
            kind,
            title: title.into(),
            description: description.into(),
            payload,
            timestamp: OffsetDateTime::now_utc(),
        };

        info!(
            notification_id = %notification.id,
            kind = ?notification.kind,
            title = %notification.title,
            "Notification published"
        );

        {
            let mut backlog = mutex_lock(&self.inner.backlog, SOURCE, "publish");
            if backlog.len() == self.inner.capacity {
                backlog.pop_front();
            }
            backlog.push_back(notification.clone());
        }
        let _ = self.inner.live.send(notification.clone());
        notification
    }

    pub fn success(&self, title: &str, description: &str) -> Notification {
        self.publish(NotificationKind::Success, title, description, None)
    }

    pub fn failure(&self, title: &str, description: &str) -> Notification {
        self.publish(NotificationKind::Failure, title, description, None)
    }

    /// Forward a `system` push, keeping its raw payload.
    pub fn system(&self, notice: &SystemNotice) -> Notification {
        let title = notice.title.as_deref().unwrap_or(SYSTEM_TITLE);
        let description = notice
            .message
            .as_deref()
            .or(notice.kind.as_deref())
            .unwrap_or_default();
        self.publish(
            NotificationKind::System,
            title,
            description,
            Some(notice.payload.clone()),
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.live.subscribe()
    }

    /// Remove up to `limit` notifications, oldest first.
    pub fn drain(&self, limit: usize) -> Vec<Notification> {
        let mut backlog = mutex_lock(&self.inner.backlog, SOURCE, "drain");
        let count = limit.min(backlog.len());
        backlog.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.inner.backlog, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        mutex_lock(&self.inner.backlog, SOURCE, "clear").clear();
    }
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new()
    }
}

//! Message store gateway contract and the in-memory reference store.
//!
//! The remote document store behind the product pushes the *entire current
//! result set* for a group on every change, not deltas. This crate pins that
//! contract down as the [`MessageStore`] trait and ships an in-memory
//! implementation used by tests and the smoke binary.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chat_core::{MAX_MESSAGE_BODY_CHARS, Message, MessageDraft};
use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Channel end the store pushes full snapshots into.
pub type SnapshotSender = mpsc::UnboundedSender<Vec<Message>>;
/// Channel end the engine's snapshot pump reads from.
pub type SnapshotReceiver = mpsc::UnboundedReceiver<Vec<Message>>;

/// Errors returned by message store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store is unreachable or failed transiently.
    #[error("message store unavailable: {0}")]
    Unavailable(String),
    /// The sender is not allowed to write to this group.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The group identifier is missing or malformed.
    #[error("invalid group id: '{0}'")]
    InvalidGroup(String),
    /// The message payload failed store-side validation.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// Live-query registration owned by the subscriber.
///
/// Dropping the subscription unregisters the underlying push callback; any
/// snapshot the store produces afterwards is no longer delivered.
pub struct StoreSubscription {
    unregister: Option<Box<dyn FnOnce() + Send>>,
}

impl StoreSubscription {
    /// Wrap a store-specific unregistration action.
    pub fn new(unregister: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unregister: Some(Box::new(unregister)),
        }
    }
}

impl Drop for StoreSubscription {
    fn drop(&mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }
}

impl fmt::Debug for StoreSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSubscription")
            .field("registered", &self.unregister.is_some())
            .finish()
    }
}

/// Remote document store gateway for group-chat messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist one message, assigning `id` and `created_at_ms` store-side.
    async fn insert_message(&self, draft: MessageDraft) -> Result<Message, StoreError>;

    /// Register a live query for `group_id`.
    ///
    /// The store delivers the full current ordered set once immediately
    /// (possibly empty) and again on every subsequent insert affecting the
    /// group. Registration itself returns without waiting on the remote.
    fn subscribe(
        &self,
        group_id: &str,
        snapshot_tx: SnapshotSender,
    ) -> Result<StoreSubscription, StoreError>;
}

struct Watcher {
    group_id: String,
    snapshot_tx: SnapshotSender,
}

#[derive(Default)]
struct StoreInner {
    messages: HashMap<String, Vec<Message>>,
    watchers: HashMap<u64, Watcher>,
    next_watcher_id: u64,
    last_created_at_ms: i64,
}

/// In-memory reference implementation of [`MessageStore`].
///
/// Timestamps are monotonic non-decreasing per store, matching the remote
/// store's server-assigned ordering key guarantee.
#[derive(Clone, Default)]
pub struct InMemoryMessageStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current ordered messages for a group, mainly for test assertions.
    pub fn messages_for(&self, group_id: &str) -> Result<Vec<Message>, StoreError> {
        let inner = self.lock_inner()?;
        Ok(inner.messages.get(group_id).cloned().unwrap_or_default())
    }

    fn lock_inner(&self) -> Result<std::sync::MutexGuard<'_, StoreInner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("poisoned lock".to_owned()))
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert_message(&self, draft: MessageDraft) -> Result<Message, StoreError> {
        validate_draft(&draft)?;

        let mut inner = self.lock_inner()?;

        let created_at_ms = Utc::now()
            .timestamp_millis()
            .max(inner.last_created_at_ms);
        inner.last_created_at_ms = created_at_ms;

        let message = Message {
            id: Uuid::new_v4().to_string(),
            group_id: draft.group_id.clone(),
            author_id: draft.author_id,
            author_display_name: Some(draft.author_display_name),
            body: draft.body,
            created_at_ms: Some(created_at_ms),
        };

        let group = inner.messages.entry(draft.group_id.clone()).or_default();
        group.push(message.clone());
        group.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        let snapshot = group.clone();

        fan_out(&mut inner, &draft.group_id, snapshot);
        Ok(message)
    }

    fn subscribe(
        &self,
        group_id: &str,
        snapshot_tx: SnapshotSender,
    ) -> Result<StoreSubscription, StoreError> {
        if group_id.trim().is_empty() {
            return Err(StoreError::InvalidGroup(group_id.to_owned()));
        }

        let mut inner = self.lock_inner()?;

        let initial = inner.messages.get(group_id).cloned().unwrap_or_default();
        let _ = snapshot_tx.send(initial);

        let watcher_id = inner.next_watcher_id;
        inner.next_watcher_id += 1;
        inner.watchers.insert(
            watcher_id,
            Watcher {
                group_id: group_id.to_owned(),
                snapshot_tx,
            },
        );

        let shared = Arc::clone(&self.inner);
        Ok(StoreSubscription::new(move || {
            if let Ok(mut inner) = shared.lock() {
                inner.watchers.remove(&watcher_id);
                debug!(watcher_id, "unregistered live query watcher");
            }
        }))
    }
}

fn validate_draft(draft: &MessageDraft) -> Result<(), StoreError> {
    if draft.group_id.trim().is_empty() {
        return Err(StoreError::InvalidGroup(draft.group_id.clone()));
    }
    if draft.author_id.trim().is_empty() {
        return Err(StoreError::InvalidMessage("missing author id".to_owned()));
    }
    if draft.body.trim().is_empty() {
        return Err(StoreError::InvalidMessage("empty body".to_owned()));
    }
    if draft.body.chars().count() > MAX_MESSAGE_BODY_CHARS {
        return Err(StoreError::InvalidMessage(format!(
            "body exceeds {MAX_MESSAGE_BODY_CHARS} characters"
        )));
    }
    Ok(())
}

fn fan_out(inner: &mut StoreInner, group_id: &str, snapshot: Vec<Message>) {
    // Watchers whose receiver is gone are pruned on the next delivery.
    inner.watchers.retain(|watcher_id, watcher| {
        if watcher.group_id != group_id {
            return true;
        }
        let delivered = watcher.snapshot_tx.send(snapshot.clone()).is_ok();
        if !delivered {
            debug!(watcher_id, "dropping closed live query watcher");
        }
        delivered
    });
}

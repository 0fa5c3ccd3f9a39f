//! Real-time group-chat synchronization engine.
//!
//! The engine owns the live-query lifecycle for exactly one group
//! conversation at a time: it registers with the message store, receives
//! full-snapshot pushes, replaces (never merges) its working set, recomputes
//! the day-grouped view, and publishes it over a broadcast event channel.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chat_core::{
    ChatError, ChatErrorCategory, ChatEvent, ConversationView, EngineChannels, EngineConfig,
    EngineLifecycle, EngineStateMachine, EventStream, Message, build_view,
};
use chat_store::{MessageStore, SnapshotReceiver, StoreError, StoreSubscription};
use chrono::Local;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Optimistic message composer.
pub mod composer;

pub use composer::MessageComposer;

struct ActiveSubscription {
    stop: CancellationToken,
    pump: JoinHandle<()>,
    guard: StoreSubscription,
}

struct EngineShared {
    // Bumped on every subscribe/teardown; a snapshot delivered for an older
    // epoch belongs to a superseded handle and is discarded.
    epoch: u64,
    lifecycle: EngineStateMachine,
    group_id: String,
    viewer_id: String,
    view: ConversationView,
    active: Option<ActiveSubscription>,
}

/// One engine instance per active conversation screen.
pub struct ChatSyncEngine {
    store: Arc<dyn MessageStore>,
    channels: EngineChannels,
    shared: Arc<Mutex<EngineShared>>,
}

impl ChatSyncEngine {
    pub fn new(store: Arc<dyn MessageStore>, config: EngineConfig) -> Self {
        Self {
            store,
            channels: EngineChannels::new(config.event_buffer),
            shared: Arc::new(Mutex::new(EngineShared {
                epoch: 0,
                lifecycle: EngineStateMachine::default(),
                group_id: String::new(),
                viewer_id: String::new(),
                view: ConversationView::Loading,
                active: None,
            })),
        }
    }

    /// Subscribe to emitted engine events.
    pub fn events(&self) -> EventStream {
        self.channels.subscribe()
    }

    /// Latest published view-model.
    pub fn current_view(&self) -> ConversationView {
        lock_shared(&self.shared).view.clone()
    }

    /// Current engine lifecycle state.
    pub fn lifecycle(&self) -> EngineLifecycle {
        lock_shared(&self.shared).lifecycle.state()
    }

    /// Group the engine is currently subscribed to, if any.
    pub fn active_group(&self) -> Option<String> {
        let shared = lock_shared(&self.shared);
        match shared.lifecycle.state() {
            EngineLifecycle::Idle => None,
            _ => Some(shared.group_id.clone()),
        }
    }

    /// Establish the live query for `group_id`, viewed as `viewer_id`.
    ///
    /// Any previous handle is torn down first; the engine never holds two
    /// live queries. Publishes `Loading` until the first snapshot arrives. A
    /// registration failure publishes a `Failed` view and returns the error.
    pub async fn subscribe(&self, group_id: &str, viewer_id: &str) -> Result<(), ChatError> {
        if group_id.trim().is_empty() {
            return Err(ChatError::invalid_group(group_id));
        }

        self.teardown().await;

        let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();
        let registration = self.store.subscribe(group_id, snapshot_tx);

        let mut shared = lock_shared(&self.shared);
        shared.epoch += 1;
        let epoch = shared.epoch;
        shared.group_id = group_id.to_owned();
        shared.viewer_id = viewer_id.to_owned();

        let guard = match registration {
            Ok(guard) => guard,
            Err(err) => {
                let mapped = map_store_error(err);
                warn!(
                    group = %group_id,
                    code = %mapped.code,
                    recoverable = mapped.is_recoverable(),
                    "live query registration failed"
                );
                shared.view = ConversationView::Failed {
                    error: mapped.clone(),
                };
                self.channels.emit(ChatEvent::ConversationUpdated {
                    group_id: group_id.to_owned(),
                    view: shared.view.clone(),
                });
                return Err(mapped);
            }
        };

        shared.view = ConversationView::Loading;
        let lifecycle_event = shared.lifecycle.on_subscribed();
        self.channels.emit(lifecycle_event);
        self.channels.emit(ChatEvent::ConversationUpdated {
            group_id: group_id.to_owned(),
            view: ConversationView::Loading,
        });

        let stop = CancellationToken::new();
        let pump = self.spawn_pump(group_id.to_owned(), epoch, stop.child_token(), snapshot_rx);
        shared.active = Some(ActiveSubscription { stop, pump, guard });

        debug!(group = %group_id, "live query established");
        Ok(())
    }

    /// Tear down the active subscription, if any. Idempotent.
    pub async fn teardown(&self) {
        let (active, lifecycle_event) = {
            let mut shared = lock_shared(&self.shared);
            shared.epoch += 1;
            (shared.active.take(), shared.lifecycle.on_teardown())
        };

        if let Some(event) = lifecycle_event {
            self.channels.emit(event);
        }

        let Some(ActiveSubscription { stop, pump, guard }) = active else {
            return;
        };

        stop.cancel();
        // Unregister before waiting out the pump so the store stops pushing.
        drop(guard);
        let _ = pump.await;
        debug!("subscription torn down");
    }

    fn spawn_pump(
        &self,
        group_id: String,
        epoch: u64,
        stop: CancellationToken,
        mut snapshot_rx: SnapshotReceiver,
    ) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let channels = self.channels.clone();

        tokio::spawn(async move {
            loop {
                let snapshot = tokio::select! {
                    _ = stop.cancelled() => break,
                    received = snapshot_rx.recv() => match received {
                        Some(snapshot) => snapshot,
                        None => break,
                    },
                };

                if !apply_snapshot(&shared, &channels, &group_id, epoch, snapshot) {
                    break;
                }
            }

            debug!(group = %group_id, "snapshot pump stopped");
        })
    }
}

/// Apply one snapshot; returns `false` when the pump should stop.
fn apply_snapshot(
    shared: &Mutex<EngineShared>,
    channels: &EngineChannels,
    group_id: &str,
    epoch: u64,
    snapshot: Vec<Message>,
) -> bool {
    let mut shared = lock_shared(shared);

    if shared.epoch != epoch {
        debug!(group = %group_id, "discarding snapshot for superseded subscription");
        return false;
    }

    match shared.lifecycle.on_snapshot() {
        Ok(Some(event)) => channels.emit(event),
        Ok(None) => {}
        Err(err) => {
            warn!(%err, group = %group_id, "snapshot arrived outside an active subscription");
            return false;
        }
    }

    // Full replacement of the working set: the store delivers the complete
    // authoritative result per push, so merging against prior state would
    // only reintroduce stale or duplicate entries.
    let now = Local::now();
    let view = build_view(snapshot, &shared.viewer_id, *now.offset(), now.date_naive());
    shared.view = view.clone();
    channels.emit(ChatEvent::ConversationUpdated {
        group_id: group_id.to_owned(),
        view,
    });

    true
}

fn lock_shared(shared: &Mutex<EngineShared>) -> MutexGuard<'_, EngineShared> {
    // Every mutation under this lock completes without panicking, so state
    // behind a poisoned lock is still consistent.
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Suggested backoff before retrying after a store outage.
const STORE_UNAVAILABLE_RETRY_HINT: Duration = Duration::from_secs(5);

/// Map a store failure to the stable engine error payload.
pub fn map_store_error(err: StoreError) -> ChatError {
    match err {
        StoreError::Unavailable(message) => {
            ChatError::new(ChatErrorCategory::Network, "store_unavailable", message)
                .with_retry_after(STORE_UNAVAILABLE_RETRY_HINT)
        }
        StoreError::PermissionDenied(message) => {
            ChatError::new(ChatErrorCategory::Permission, "permission_denied", message)
        }
        StoreError::InvalidGroup(value) => ChatError::invalid_group(value),
        StoreError::InvalidMessage(message) => {
            ChatError::new(ChatErrorCategory::Validation, "invalid_message", message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use chat_core::{Message, MessageDraft, SendDisposition};
    use chat_store::{InMemoryMessageStore, SnapshotSender};
    use chrono::Utc;
    use tokio::time::timeout;

    fn message(id: &str, created_at_ms: i64) -> Message {
        Message {
            id: id.to_owned(),
            group_id: "g1".to_owned(),
            author_id: "alice".to_owned(),
            author_display_name: Some("Alice".to_owned()),
            body: format!("body of {id}"),
            created_at_ms: Some(created_at_ms),
        }
    }

    async fn next_event(events: &mut EventStream) -> ChatEvent {
        timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event timeout")
            .expect("event stream open")
    }

    async fn next_view(events: &mut EventStream) -> (String, ConversationView) {
        loop {
            if let ChatEvent::ConversationUpdated { group_id, view } = next_event(events).await {
                return (group_id, view);
            }
        }
    }

    fn flattened_ids(view: &ConversationView) -> Vec<String> {
        match view {
            ConversationView::Ready { groups } => groups
                .iter()
                .flat_map(|group| group.messages.iter().map(|m| m.id.clone()))
                .collect(),
            other => panic!("expected ready view, got {other:?}"),
        }
    }

    /// Test double that lets tests push arbitrary snapshots directly and
    /// observe handle unregistration.
    #[derive(Default)]
    struct ScriptedStore {
        taps: Mutex<Vec<SnapshotSender>>,
        dropped_handles: Arc<AtomicUsize>,
    }

    impl ScriptedStore {
        fn push(&self, tap: usize, snapshot: Vec<Message>) -> Result<(), ()> {
            let taps = self.taps.lock().expect("taps lock");
            taps[tap].send(snapshot).map_err(|_| ())
        }

        fn dropped_handles(&self) -> usize {
            self.dropped_handles.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageStore for ScriptedStore {
        async fn insert_message(&self, _draft: MessageDraft) -> Result<Message, StoreError> {
            Err(StoreError::Unavailable(
                "scripted store rejects writes".to_owned(),
            ))
        }

        fn subscribe(
            &self,
            _group_id: &str,
            snapshot_tx: SnapshotSender,
        ) -> Result<chat_store::StoreSubscription, StoreError> {
            self.taps.lock().expect("taps lock").push(snapshot_tx);
            let dropped = Arc::clone(&self.dropped_handles);
            Ok(chat_store::StoreSubscription::new(move || {
                dropped.fetch_add(1, Ordering::SeqCst);
            }))
        }
    }

    struct UnavailableStore;

    #[async_trait]
    impl MessageStore for UnavailableStore {
        async fn insert_message(&self, _draft: MessageDraft) -> Result<Message, StoreError> {
            Err(StoreError::Unavailable("down".to_owned()))
        }

        fn subscribe(
            &self,
            _group_id: &str,
            _snapshot_tx: SnapshotSender,
        ) -> Result<chat_store::StoreSubscription, StoreError> {
            Err(StoreError::Unavailable("down".to_owned()))
        }
    }

    #[tokio::test]
    async fn rejects_blank_group_id() {
        let engine = ChatSyncEngine::new(
            Arc::new(InMemoryMessageStore::new()),
            EngineConfig::default(),
        );

        let err = engine
            .subscribe("  ", "alice")
            .await
            .expect_err("blank group must fail");
        assert_eq!(err.code, "invalid_group_id");
        assert_eq!(engine.lifecycle(), EngineLifecycle::Idle);
    }

    #[tokio::test]
    async fn publishes_loading_then_empty_for_a_fresh_group() {
        let store = Arc::new(ScriptedStore::default());
        let engine = ChatSyncEngine::new(store.clone(), EngineConfig::default());
        let mut events = engine.events();

        engine.subscribe("g1", "alice").await.expect("subscribe");
        assert_eq!(engine.lifecycle(), EngineLifecycle::Loading);

        let (group_id, view) = next_view(&mut events).await;
        assert_eq!(group_id, "g1");
        assert_eq!(view, ConversationView::Loading);
        assert_eq!(engine.current_view(), ConversationView::Loading);

        store.push(0, Vec::new()).expect("push empty snapshot");

        let (_, view) = next_view(&mut events).await;
        assert_eq!(view, ConversationView::Empty);
        assert_eq!(engine.lifecycle(), EngineLifecycle::Ready);
        assert_eq!(engine.current_view(), ConversationView::Empty);
    }

    #[tokio::test]
    async fn snapshot_replaces_instead_of_merging() {
        let store = Arc::new(ScriptedStore::default());
        let engine = ChatSyncEngine::new(store.clone(), EngineConfig::default());
        let mut events = engine.events();

        engine.subscribe("g1", "alice").await.expect("subscribe");
        let _ = next_view(&mut events).await;

        let base = Utc::now().timestamp_millis();
        store
            .push(
                0,
                (0..5).map(|i| message(&format!("m{i}"), base + i)).collect(),
            )
            .expect("push first snapshot");
        let _ = next_view(&mut events).await;

        // The authoritative set shrank: nothing from the first snapshot may
        // survive beyond what the second one contains.
        store
            .push(
                0,
                vec![
                    message("m0", base),
                    message("m2", base + 2),
                    message("m4", base + 4),
                ],
            )
            .expect("push second snapshot");

        let (_, view) = next_view(&mut events).await;
        assert_eq!(flattened_ids(&view), vec!["m0", "m2", "m4"]);
    }

    #[tokio::test]
    async fn published_order_is_deterministic_regardless_of_delivery_order() {
        let store = Arc::new(ScriptedStore::default());
        let engine = ChatSyncEngine::new(store.clone(), EngineConfig::default());
        let mut events = engine.events();

        engine.subscribe("g1", "alice").await.expect("subscribe");
        let _ = next_view(&mut events).await;

        let base = Utc::now().timestamp_millis();
        store
            .push(
                0,
                vec![
                    message("m3", base + 5),
                    // Same millisecond: id tiebreak decides.
                    message("m2", base),
                    message("m1", base),
                ],
            )
            .expect("push shuffled snapshot");

        let (_, view) = next_view(&mut events).await;
        assert_eq!(flattened_ids(&view), vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn switching_groups_freezes_the_old_handle() {
        let store = Arc::new(ScriptedStore::default());
        let engine = ChatSyncEngine::new(store.clone(), EngineConfig::default());
        let mut events = engine.events();

        engine.subscribe("group-a", "alice").await.expect("subscribe a");
        let _ = next_view(&mut events).await;

        engine.subscribe("group-b", "alice").await.expect("subscribe b");
        assert_eq!(store.dropped_handles(), 1);
        assert_eq!(engine.active_group().as_deref(), Some("group-b"));

        // The old handle's delivery channel is gone: a late push for
        // group-a cannot reach the engine at all.
        assert!(store.push(0, vec![message("stale", 1)]).is_err());

        let base = Utc::now().timestamp_millis();
        store
            .push(1, vec![message("fresh", base)])
            .expect("push to new handle");

        loop {
            let (group_id, view) = next_view(&mut events).await;
            if matches!(view, ConversationView::Ready { .. }) {
                assert_eq!(group_id, "group-b");
                assert_eq!(flattened_ids(&view), vec!["fresh"]);
                break;
            }
        }
    }

    #[tokio::test]
    async fn failed_registration_publishes_failed_not_empty() {
        let engine = ChatSyncEngine::new(Arc::new(UnavailableStore), EngineConfig::default());
        let mut events = engine.events();

        let err = engine
            .subscribe("g1", "alice")
            .await
            .expect_err("registration must fail");
        assert_eq!(err.code, "store_unavailable");

        let (_, view) = next_view(&mut events).await;
        match view {
            ConversationView::Failed { error } => assert_eq!(error.code, "store_unavailable"),
            other => panic!("expected failed view, got {other:?}"),
        }
        assert_ne!(engine.current_view(), ConversationView::Empty);
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let store = Arc::new(ScriptedStore::default());
        let engine = ChatSyncEngine::new(store.clone(), EngineConfig::default());

        engine.teardown().await;
        assert_eq!(engine.lifecycle(), EngineLifecycle::Idle);

        engine.subscribe("g1", "alice").await.expect("subscribe");
        engine.teardown().await;
        engine.teardown().await;

        assert_eq!(engine.lifecycle(), EngineLifecycle::Idle);
        assert_eq!(engine.active_group(), None);
        assert_eq!(store.dropped_handles(), 1);
    }

    #[tokio::test]
    async fn send_round_trip_reaches_the_view_through_the_snapshot_path() {
        let store = Arc::new(InMemoryMessageStore::new());
        let engine = ChatSyncEngine::new(store.clone(), EngineConfig::default());
        let mut events = engine.events();

        engine.subscribe("g1", "alice").await.expect("subscribe");
        loop {
            let (_, view) = next_view(&mut events).await;
            if view == ConversationView::Empty {
                break;
            }
        }

        let mut composer = MessageComposer::new(store.clone());
        composer.set_draft("hello everyone");
        let disposition = composer.send("g1", "alice", "Alice").await;
        assert_eq!(disposition, SendDisposition::Sent);

        let (_, view) = next_view(&mut events).await;
        match &view {
            ConversationView::Ready { groups } => {
                assert_eq!(groups.len(), 1);
                assert_eq!(groups[0].label, "Today");
                assert_eq!(groups[0].messages[0].body, "hello everyone");
                assert!(groups[0].messages[0].is_own_message);
            }
            other => panic!("expected ready view, got {other:?}"),
        }
    }

    #[test]
    fn store_error_mapping_keeps_codes_stable() {
        assert_eq!(
            map_store_error(StoreError::Unavailable("x".into())).code,
            "store_unavailable"
        );
        assert_eq!(
            map_store_error(StoreError::PermissionDenied("x".into())).code,
            "permission_denied"
        );
        assert_eq!(
            map_store_error(StoreError::InvalidGroup("".into())).code,
            "invalid_group_id"
        );
        assert_eq!(
            map_store_error(StoreError::InvalidMessage("x".into())).code,
            "invalid_message"
        );
    }

    #[test]
    fn store_outage_carries_a_retry_hint() {
        let outage = map_store_error(StoreError::Unavailable("mock outage".into()));
        assert_eq!(
            outage.retry_after_ms,
            Some(STORE_UNAVAILABLE_RETRY_HINT.as_millis() as u64)
        );
        assert!(outage.is_recoverable());

        let denied = map_store_error(StoreError::PermissionDenied("not a member".into()));
        assert_eq!(denied.retry_after_ms, None);

        let invalid = map_store_error(StoreError::InvalidGroup("".into()));
        assert!(!invalid.is_recoverable());
    }
}

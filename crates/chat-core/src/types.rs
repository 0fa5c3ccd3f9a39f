use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Maximum accepted message body length, in characters.
pub const MAX_MESSAGE_BODY_CHARS: usize = 500;

/// Sentinel rendered when a message arrives without a usable author name.
pub const UNKNOWN_AUTHOR_LABEL: &str = "Unknown";

/// Clock placeholder rendered for an optimistic echo that has no server time yet.
pub const PENDING_CLOCK_LABEL: &str = "--:--";

/// Engine lifecycle state reported to the frontend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EngineLifecycle {
    /// No subscription is active.
    Idle,
    /// Subscribed, waiting for the first snapshot.
    Loading,
    /// At least one snapshot has been applied.
    Ready,
}

/// A persisted (or in-flight) group-chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Store-assigned identifier, stable and unique within a group.
    pub id: String,
    /// Conversation this message belongs to; immutable once created.
    pub group_id: String,
    /// Sender identity at time of send.
    pub author_id: String,
    /// Denormalized sender display name; `None` when missing or corrupt.
    pub author_display_name: Option<String>,
    /// Message text, non-empty and bounded by [`MAX_MESSAGE_BODY_CHARS`].
    pub body: String,
    /// Server-assigned ordering key in milliseconds since the Unix epoch.
    ///
    /// `None` only for an optimistic local echo that the store has not
    /// confirmed yet; such a message sorts after every confirmed one.
    pub created_at_ms: Option<i64>,
}

impl Message {
    /// Deterministic display ordering key: `created_at_ms` ascending with
    /// `id` as tiebreak; pending echoes sort last.
    pub fn order_key(&self) -> (i64, &str) {
        (self.created_at_ms.unwrap_or(i64::MAX), self.id.as_str())
    }
}

/// Outgoing message payload handed to the store, which assigns `id` and
/// `created_at_ms` on insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageDraft {
    /// Target conversation.
    pub group_id: String,
    /// Sender identity.
    pub author_id: String,
    /// Denormalized sender display name captured at send time.
    pub author_display_name: String,
    /// Trimmed message text.
    pub body: String,
}

/// Display-ready message row inside a [`DayGroup`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageView {
    /// Store-assigned message ID.
    pub id: String,
    /// Sender identity.
    pub author_id: String,
    /// Sender display name, or [`UNKNOWN_AUTHOR_LABEL`] when missing.
    pub author_display_name: String,
    /// Message text.
    pub body: String,
    /// Viewer-local `HH:MM` clock string, [`PENDING_CLOCK_LABEL`] for an
    /// unconfirmed echo.
    pub sent_at_local: String,
    /// Whether the viewer supplied at subscribe time authored this message.
    pub is_own_message: bool,
}

/// Contiguous run of messages sharing one viewer-local calendar date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayGroup {
    /// `"Today"`, `"Yesterday"`, or a formatted calendar date.
    pub label: String,
    /// Messages for that date in display order.
    pub messages: Vec<MessageView>,
}

/// Conversation view-model published to the frontend.
///
/// `Loading`, `Empty`, and `Failed` are deliberately distinct so the UI never
/// conflates "not loaded yet", "no messages yet", and "could not load".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConversationView {
    /// Subscribed, first snapshot not yet delivered.
    Loading,
    /// Snapshot delivered with zero messages.
    Empty,
    /// Grouped, ordered conversation content.
    Ready {
        /// Day groups in chronological order.
        groups: Vec<DayGroup>,
    },
    /// The live query could not be established or maintained.
    Failed {
        /// Stable error payload describing the failure.
        error: ChatError,
    },
}

/// Recoverable send failure kinds surfaced to the UI.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SendErrorKind {
    /// The store was unreachable or rejected the insert transiently.
    StoreUnavailable,
    /// The store refused the insert for this sender.
    PermissionDenied,
}

/// Composer status exposed to the frontend send affordance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ComposerStatus {
    /// Whether a send is currently in flight.
    pub sending: bool,
    /// Most recent send failure, until dismissed or superseded.
    pub last_error: Option<SendErrorKind>,
}

/// Outcome of a composer send call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDisposition {
    /// Preconditions failed; the call was a silent no-op.
    Ignored,
    /// The store confirmed the insert.
    Sent,
    /// The insert failed; the draft was restored.
    Failed(SendErrorKind),
}

/// Engine tuning values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Broadcast buffer size for the engine event channel.
    pub event_buffer: usize,
    /// Client-side message length guard, at most
    /// [`MAX_MESSAGE_BODY_CHARS`] (the store-side cap is fixed).
    pub max_body_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_buffer: 64,
            max_body_chars: MAX_MESSAGE_BODY_CHARS,
        }
    }
}

/// Event channel output emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatEvent {
    /// Engine lifecycle transition.
    LifecycleChanged {
        /// New lifecycle state.
        state: EngineLifecycle,
    },
    /// Recomputed conversation view for the active group.
    ConversationUpdated {
        /// Group the view belongs to.
        group_id: String,
        /// Latest view-model.
        view: ConversationView,
    },
}

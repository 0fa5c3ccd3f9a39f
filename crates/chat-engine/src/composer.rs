use std::sync::Arc;

use chat_core::{
    ComposerStatus, EngineConfig, MAX_MESSAGE_BODY_CHARS, MessageDraft, SendDisposition,
    SendErrorKind,
};
use chat_store::{MessageStore, StoreError};
use tracing::{debug, warn};

/// Outgoing-message coordinator for one conversation screen.
///
/// Owns the draft buffer and performs optimistic sends: the draft is cleared
/// immediately, the confirmed message arrives back through the engine's
/// normal snapshot path, and a failed insert restores the draft verbatim so
/// the user never loses what they typed.
pub struct MessageComposer {
    store: Arc<dyn MessageStore>,
    draft: String,
    sending: bool,
    last_error: Option<SendErrorKind>,
    max_body_chars: usize,
}

impl MessageComposer {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    /// Build a composer with tuned limits; the body guard can only tighten
    /// the store-side cap, never exceed it.
    pub fn with_config(store: Arc<dyn MessageStore>, config: EngineConfig) -> Self {
        Self {
            store,
            draft: String::new(),
            sending: false,
            last_error: None,
            max_body_chars: config.max_body_chars.clamp(1, MAX_MESSAGE_BODY_CHARS),
        }
    }

    /// Replace the draft buffer.
    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Current draft buffer contents.
    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Current send status for the frontend send affordance.
    pub fn status(&self) -> ComposerStatus {
        ComposerStatus {
            sending: self.sending,
            last_error: self.last_error,
        }
    }

    /// Dismiss the last recorded send failure.
    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Send the current draft to `group_id`.
    ///
    /// A blank or oversized draft, or missing group/author identifiers, is a
    /// silent no-op (the UI disables the send affordance in those states).
    /// Only one send is expected in flight at a time; callers gate on
    /// [`ComposerStatus::sending`].
    pub async fn send(
        &mut self,
        group_id: &str,
        author_id: &str,
        author_display_name: &str,
    ) -> SendDisposition {
        let body = self.draft.trim().to_owned();
        if body.is_empty()
            || body.chars().count() > self.max_body_chars
            || group_id.trim().is_empty()
            || author_id.trim().is_empty()
        {
            debug!("ignoring send with failed preconditions");
            return SendDisposition::Ignored;
        }

        // Optimistic clear; restored verbatim on failure.
        let original_draft = std::mem::take(&mut self.draft);
        self.sending = true;
        self.last_error = None;

        let draft = MessageDraft {
            group_id: group_id.to_owned(),
            author_id: author_id.to_owned(),
            author_display_name: author_display_name.to_owned(),
            body,
        };

        match self.store.insert_message(draft).await {
            Ok(message) => {
                self.sending = false;
                debug!(message_id = %message.id, "message persisted");
                SendDisposition::Sent
            }
            Err(err) => {
                warn!(%err, "message insert failed, restoring draft");
                self.draft = original_draft;
                let kind = send_error_kind(&err);
                self.last_error = Some(kind);
                self.sending = false;
                SendDisposition::Failed(kind)
            }
        }
    }
}

fn send_error_kind(err: &StoreError) -> SendErrorKind {
    match err {
        StoreError::PermissionDenied(_) => SendErrorKind::PermissionDenied,
        StoreError::Unavailable(_) => SendErrorKind::StoreUnavailable,
        // Client-side guards make these unreachable in practice.
        StoreError::InvalidGroup(_) | StoreError::InvalidMessage(_) => {
            SendErrorKind::StoreUnavailable
        }
    }
}

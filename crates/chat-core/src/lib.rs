//! Core chat contract shared between the synchronization engine and
//! frontend consumers.
//!
//! This crate defines the message/view protocol types, the day-grouping and
//! ordering algorithms, the engine lifecycle model, and common error/channel
//! abstractions.

/// Engine event channel primitives.
pub mod channel;
/// Stable chat error types.
pub mod error;
/// Message ordering and day-grouping algorithms.
pub mod grouping;
/// Engine lifecycle state machine.
pub mod state_machine;
/// Frontend-facing protocol types (messages, views, events).
pub mod types;

pub use channel::{EngineChannels, EventStream};
pub use error::{ChatError, ChatErrorCategory};
pub use grouping::{build_view, day_label, sort_for_display};
pub use state_machine::EngineStateMachine;
pub use types::{
    ChatEvent, ComposerStatus, ConversationView, DayGroup, EngineConfig, EngineLifecycle,
    MAX_MESSAGE_BODY_CHARS, Message, MessageDraft, MessageView, PENDING_CLOCK_LABEL,
    SendDisposition, SendErrorKind, UNKNOWN_AUTHOR_LABEL,
};

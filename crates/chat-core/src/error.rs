use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::EngineLifecycle;

/// Broad error category used for user-facing handling and recovery policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatErrorCategory {
    /// Invalid input or precondition failure.
    Validation,
    /// Transient store/transport failure.
    Network,
    /// Sender is not allowed to perform the operation.
    Permission,
    /// Internal engine bug or invariant break.
    Internal,
}

/// Stable error payload emitted across the engine event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ChatError {
    /// High-level error category.
    pub category: ChatErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl ChatError {
    /// Construct a new chat error.
    pub fn new(
        category: ChatErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Build the standard empty/missing group identifier error.
    pub fn invalid_group(value: impl AsRef<str>) -> Self {
        Self::new(
            ChatErrorCategory::Validation,
            "invalid_group_id",
            format!("invalid group id '{}'", value.as_ref()),
        )
    }

    /// Build a standard invalid-lifecycle-transition error.
    pub fn invalid_lifecycle(current: EngineLifecycle, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ChatErrorCategory::Internal,
            "invalid_lifecycle_transition",
            format!("cannot run '{action}' while engine is in state {current:?}"),
        )
    }

    /// Whether retrying the failed operation may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category,
            ChatErrorCategory::Network | ChatErrorCategory::Permission
        )
    }
}

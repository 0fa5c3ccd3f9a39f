use crate::{
    error::ChatError,
    types::{ChatEvent, EngineLifecycle},
};

/// Engine lifecycle state machine: `Idle -> Loading -> Ready`, with
/// `Ready -> Ready` on every subsequent snapshot and any state returning to
/// `Idle` on teardown.
#[derive(Debug, Clone)]
pub struct EngineStateMachine {
    state: EngineLifecycle,
}

impl Default for EngineStateMachine {
    fn default() -> Self {
        Self {
            state: EngineLifecycle::Idle,
        }
    }
}

impl EngineStateMachine {
    pub fn state(&self) -> EngineLifecycle {
        self.state
    }

    /// A new subscription was established; valid from any state because
    /// `subscribe` tears down the previous handle first.
    pub fn on_subscribed(&mut self) -> ChatEvent {
        self.state = EngineLifecycle::Loading;
        ChatEvent::LifecycleChanged {
            state: EngineLifecycle::Loading,
        }
    }

    /// A snapshot was applied. The first one moves `Loading -> Ready` and
    /// yields a lifecycle event; later ones are `Ready -> Ready` and yield
    /// nothing. A snapshot while `Idle` is an engine invariant break.
    pub fn on_snapshot(&mut self) -> Result<Option<ChatEvent>, ChatError> {
        match self.state {
            EngineLifecycle::Loading => {
                self.state = EngineLifecycle::Ready;
                Ok(Some(ChatEvent::LifecycleChanged {
                    state: EngineLifecycle::Ready,
                }))
            }
            EngineLifecycle::Ready => Ok(None),
            EngineLifecycle::Idle => {
                Err(ChatError::invalid_lifecycle(self.state, "apply_snapshot"))
            }
        }
    }

    /// Teardown is idempotent: already-idle yields no event.
    pub fn on_teardown(&mut self) -> Option<ChatEvent> {
        if self.state == EngineLifecycle::Idle {
            return None;
        }
        self.state = EngineLifecycle::Idle;
        Some(ChatEvent::LifecycleChanged {
            state: EngineLifecycle::Idle,
        })
    }
}

use tokio::sync::broadcast;

use crate::types::ChatEvent;

/// Broadcast event stream type used by frontend subscribers.
pub type EventStream = broadcast::Receiver<ChatEvent>;

/// Event fan-out channel shared by the engine and its frontend consumers.
#[derive(Clone, Debug)]
pub struct EngineChannels {
    event_tx: broadcast::Sender<ChatEvent>,
}

impl EngineChannels {
    /// Create an event channel with the given buffer size (`>= 1`).
    pub fn new(event_buffer: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));
        Self { event_tx }
    }

    /// Subscribe to emitted engine events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: ChatEvent) {
        let _ = self.event_tx.send(event);
    }
}

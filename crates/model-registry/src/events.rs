//! Change notifications emitted by the registry.
//!
//! The registry only knows about [`ChangeCallback`]. [`ModelEventBus`] is one
//! ready-made callback target: a broadcast channel that any number of
//! subscribers (a socket bridge, a cache invalidator) can listen on.

use crate::config::RegistryConfig;
use crate::models::ModelConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Updated,
    Deleted,
}

/// A committed change to one record.
///
/// For `Deleted`, `record` is the record as it was just before removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelChangeEvent {
    pub kind: ChangeKind,
    pub key: String,
    pub record: ModelConfig,
}

impl ModelChangeEvent {
    pub fn new(kind: ChangeKind, record: ModelConfig) -> Self {
        Self {
            kind,
            key: record.key.clone(),
            record,
        }
    }

    /// Event name a transport bridge should emit this under.
    pub fn event_name(&self) -> &'static str {
        match self.kind {
            ChangeKind::Added => "model_config_added",
            ChangeKind::Updated => "model_config_updated",
            ChangeKind::Deleted => "model_config_deleted",
        }
    }
}

/// Callback invoked after a mutation commits.
///
/// It runs on the mutating thread once the store lock has been released, so
/// it may call back into the registry. Events from one thread arrive in the
/// order that thread committed them. Events from writers racing on the same
/// key carry no ordering guarantee; a consumer that needs the latest state
/// should re-read it with `get_model` rather than trust arrival order.
pub type ChangeCallback = Arc<dyn Fn(&ModelChangeEvent) + Send + Sync + 'static>;

/// Broadcast fan-out for registry change events.
#[derive(Debug, Clone)]
pub struct ModelEventBus {
    sender: broadcast::Sender<ModelChangeEvent>,
}

impl ModelEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModelChangeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish one event. Having no subscribers is not an error.
    pub fn publish(&self, event: &ModelChangeEvent) {
        if self.sender.send(event.clone()).is_err() {
            debug!("No subscribers for {} ({})", event.event_name(), event.key);
        }
    }

    /// A [`ChangeCallback`] that publishes onto this bus.
    pub fn callback(&self) -> ChangeCallback {
        let bus = self.clone();
        Arc::new(move |event: &ModelChangeEvent| bus.publish(event))
    }
}

impl Default for ModelEventBus {
    fn default() -> Self {
        Self::new(RegistryConfig::EVENT_CHANNEL_CAPACITY)
    }
}

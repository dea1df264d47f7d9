use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use accord_types::events::LifecycleEvent;

/// Fire-and-forget outlet for lifecycle signals. Implementations must not
/// block and must swallow their own failures.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: LifecycleEvent);
}

/// Drops every event.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, event: LifecycleEvent) {
        debug!("Dropping {} event (no notifier configured)", event.kind());
    }
}

/// Fans lifecycle events out to every subscriber (publishers, gateways).
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<LifecycleEvent>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Subscribe to lifecycle events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.broadcast_tx.subscribe()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for Dispatcher {
    fn notify(&self, event: LifecycleEvent) {
        let kind = event.kind();
        if self.inner.broadcast_tx.send(event).is_err() {
            debug!("No subscribers for {} event", kind);
        }
    }
}

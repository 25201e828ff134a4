//! Event sinks and subscription handles.
//!
//! Listeners hold a `SubscriptionHandle` and must unsubscribe explicitly;
//! nothing is dropped behind their back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;

use caplink_core::CapabilitiesChanged;

/// Receives capability change events. Fire-and-forget: the dispatcher does
/// not wait for or check any acknowledgement.
///
/// Called from the peer's actor while `forget` for that peer is held off,
/// so implementations must not block or call `Dispatcher::forget`.
pub trait EventSink: Send + Sync {
    fn capabilities_changed(&self, event: &CapabilitiesChanged);
}

impl EventSink for mpsc::UnboundedSender<CapabilitiesChanged> {
    fn capabilities_changed(&self, event: &CapabilitiesChanged) {
        if self.send(event.clone()).is_err() {
            tracing::trace!(peer = %event.peer, "event receiver dropped");
        }
    }
}

/// Returned by `subscribe`; pass it back to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// Ordered list of event sinks.
#[derive(Clone, Default)]
pub struct Subscribers {
    next_id: Arc<AtomicU64>,
    sinks: Arc<RwLock<Vec<(SubscriptionHandle, Arc<dyn EventSink>)>>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) -> SubscriptionHandle {
        let handle = SubscriptionHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut sinks = match self.sinks.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sinks.push((handle, sink));
        handle
    }

    /// Returns false if the handle was not subscribed.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut sinks = match self.sinks.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = sinks.len();
        sinks.retain(|(h, _)| *h != handle);
        sinks.len() != before
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver to every sink in subscription order.
    pub fn publish(&self, event: &CapabilitiesChanged) {
        // Deliver outside the lock so a sink may (un)subscribe re-entrantly.
        for sink in self.current() {
            sink.capabilities_changed(event);
        }
    }

    fn current(&self) -> Vec<Arc<dyn EventSink>> {
        let sinks = match self.sinks.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sinks.iter().map(|(_, sink)| sink.clone()).collect()
    }
}

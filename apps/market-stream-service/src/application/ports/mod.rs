//! Port Interfaces
//!
//! Contracts between price producers and the components that consume their
//! snapshots.
//!
//! ## Driven Ports (Outbound)
//!
//! - `PriceHandler`: receives each published snapshot (the hub is one)
//!
//! ## Driver Ports (Inbound)
//!
//! - `PriceSource`: produces snapshots and pushes them to subscribed handlers
//!
//! A source keeps its handlers in a [`PriceObservers`] list. Subscribing
//! returns a [`PriceSubscription`] guard; dropping the guard stops delivery.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::domain::price::PriceSnapshot;

// =============================================================================
// Handler Port
// =============================================================================

/// Consumer of published price snapshots.
///
/// Called on the producer's task. Implementations must not block.
#[cfg_attr(test, mockall::automock)]
pub trait PriceHandler: Send + Sync {
    /// Handle one snapshot.
    fn on_prices(&self, snapshot: &PriceSnapshot);
}

impl<F> PriceHandler for F
where
    F: Fn(&PriceSnapshot) + Send + Sync,
{
    fn on_prices(&self, snapshot: &PriceSnapshot) {
        self(snapshot);
    }
}

// =============================================================================
// Source Port
// =============================================================================

/// Producer of price snapshots.
pub trait PriceSource: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Register a handler for every future snapshot.
    #[must_use = "dropping the subscription unsubscribes the handler"]
    fn subscribe(&self, handler: Arc<dyn PriceHandler>) -> PriceSubscription;
}

// =============================================================================
// Observer List
// =============================================================================

struct Entry {
    id: u64,
    handler: Arc<dyn PriceHandler>,
}

#[derive(Default)]
struct ObserverList {
    next_id: u64,
    entries: Vec<Entry>,
}

/// Handler registry shared by price source implementations.
#[derive(Clone, Default)]
pub struct PriceObservers {
    inner: Arc<RwLock<ObserverList>>,
}

impl PriceObservers {
    /// Create an empty observer list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler and return the guard that keeps it registered.
    pub fn subscribe(&self, handler: Arc<dyn PriceHandler>) -> PriceSubscription {
        let mut list = self.inner.write();
        let id = list.next_id;
        list.next_id += 1;
        list.entries.push(Entry { id, handler });
        PriceSubscription {
            id,
            observers: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver a snapshot to every registered handler.
    ///
    /// Returns the number of handlers notified.
    pub fn publish(&self, snapshot: &PriceSnapshot) -> usize {
        // Handlers run outside the lock so they may subscribe or unsubscribe.
        let handlers: Vec<Arc<dyn PriceHandler>> = self
            .inner
            .read()
            .entries
            .iter()
            .map(|e| Arc::clone(&e.handler))
            .collect();
        for handler in &handlers {
            handler.on_prices(snapshot);
        }
        handlers.len()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }
}

impl std::fmt::Debug for PriceObservers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceObservers")
            .field("handlers", &self.len())
            .finish()
    }
}

/// Guard returned by [`PriceSource::subscribe`].
///
/// The handler stays registered until the guard is dropped or
/// [`PriceSubscription::unsubscribe`] is called.
#[derive(Debug)]
#[must_use = "dropping the subscription unsubscribes the handler"]
pub struct PriceSubscription {
    id: u64,
    observers: Weak<RwLock<ObserverList>>,
}

impl PriceSubscription {
    /// Stop delivery to this handler.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for PriceSubscription {
    fn drop(&mut self) {
        if let Some(list) = self.observers.upgrade() {
            list.write().entries.retain(|e| e.id != self.id);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

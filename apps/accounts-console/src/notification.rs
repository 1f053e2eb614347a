//! Observer registry used as the console's decoupled refresh signal.
//!
//! The channel is owned by [`crate::app::ConsoleApp`] and handed to whoever needs to publish or
//! subscribe. Delivery is synchronous at publish time: every listener registered at that moment
//! runs before `publish` returns. Nothing is queued and late subscribers see no replay.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ConsoleEvent {
    /// The account set on the server may have changed; listeners should re-fetch.
    AccountsChanged,
}

impl ConsoleEvent {
    pub const fn label(self) -> &'static str {
        match self {
            Self::AccountsChanged => "fetchAccounts",
        }
    }
}

type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: BTreeMap<u64, (ConsoleEvent, Listener)>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct NotificationChannel {
    registry: Arc<Mutex<Registry>>,
}

impl NotificationChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for `event` until the returned guard is dropped.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, event: ConsoleEvent, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id = registry.next_id.wrapping_add(1);
        registry.listeners.insert(id, (event, Arc::new(listener)));
        tracing::debug!(event = event.label(), subscription = id, "listener subscribed");
        Subscription {
            id,
            event,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Delivers `event` to the current listeners and returns how many ran.
    pub fn publish(&self, event: ConsoleEvent) -> usize {
        // Listeners run outside the lock so they may subscribe or unsubscribe themselves.
        let listeners: Vec<Listener> = lock(&self.registry)
            .listeners
            .values()
            .filter(|(registered, _)| *registered == event)
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in &listeners {
            listener();
        }
        tracing::debug!(
            event = event.label(),
            delivered = listeners.len(),
            "published console event"
        );
        listeners.len()
    }

    #[must_use]
    pub fn listener_count(&self, event: ConsoleEvent) -> usize {
        lock(&self.registry)
            .listeners
            .values()
            .filter(|(registered, _)| *registered == event)
            .count()
    }
}

impl std::fmt::Debug for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationChannel")
            .field("listeners", &lock(&self.registry).listeners.len())
            .finish()
    }
}

/// Live registration on a [`NotificationChannel`]. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    event: ConsoleEvent,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn event(&self) -> ConsoleEvent {
        self.event
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).listeners.remove(&self.id);
            tracing::debug!(
                event = self.event.label(),
                subscription = self.id,
                "listener unsubscribed"
            );
        }
    }
}

//! Decrypted-message fan-out.
//!
//! Incoming traffic, once decrypted by the owning session, is delivered to
//! every registered handler as a [`MessageEvent`]. Handlers run on the
//! receive task in priority order; within a tier, registration order is
//! preserved. Dispatch holds the handler table's read lock for the whole
//! pass, so handlers must not register or unregister from inside a
//! callback.

use crate::error::{constants, ProtocolError, Result};
use std::sync::{Arc, RwLock};
use tracing::trace;

/// Delivery tier for a handler. Higher tiers run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Lowest,
    Low,
    Normal,
    High,
    Highest,
}

/// A decrypted message, ready for application consumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    /// Formatted identity of the sending peer.
    pub peer: String,
    /// Recovered plaintext.
    pub plaintext: String,
}

/// Token returned by [`Dispatcher::register`], used to unregister later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type HandlerFn = dyn Fn(&MessageEvent) + Send + Sync + 'static;

struct Entry {
    id: HandlerId,
    priority: Priority,
    handler: Box<HandlerFn>,
}

struct Inner {
    // Sorted by descending priority; ties keep registration order.
    entries: Vec<Entry>,
    next_id: u64,
}

/// Shared handler table. Clones deliver to the same handlers.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<RwLock<Inner>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                entries: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Register a handler at the given priority.
    pub fn register<F>(&self, priority: Priority, handler: F) -> Result<HandlerId>
    where
        F: Fn(&MessageEvent) + Send + Sync + 'static,
    {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string()))?;

        let id = HandlerId(inner.next_id);
        inner.next_id += 1;

        let at = inner
            .entries
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(inner.entries.len());
        inner.entries.insert(
            at,
            Entry {
                id,
                priority,
                handler: Box::new(handler),
            },
        );
        trace!(?id, ?priority, "Handler registered");
        Ok(id)
    }

    /// Remove a handler. Returns `false` if the id was never registered
    /// or was already removed.
    pub fn unregister(&self, id: HandlerId) -> Result<bool> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string()))?;

        let before = inner.entries.len();
        inner.entries.retain(|e| e.id != id);
        Ok(inner.entries.len() < before)
    }

    /// Deliver an event to every handler, highest priority first.
    /// Returns the number of handlers invoked.
    pub fn dispatch(&self, event: &MessageEvent) -> Result<usize> {
        let inner = self
            .inner
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string()))?;

        for entry in &inner.entries {
            (entry.handler)(event);
        }
        trace!(peer = %event.peer, handlers = inner.entries.len(), "Event dispatched");
        Ok(inner.entries.len())
    }

    pub fn handler_count(&self) -> Result<usize> {
        let inner = self
            .inner
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string()))?;
        Ok(inner.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn event() -> MessageEvent {
        MessageEvent {
            peer: "user-1:000001".to_string(),
            plaintext: "hello".to_string(),
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn Fn(&MessageEvent) + Send + Sync>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_for_factory = Arc::clone(&log);
        let factory = move |tag: &'static str| -> Box<dyn Fn(&MessageEvent) + Send + Sync> {
            let log = Arc::clone(&log_for_factory);
            Box::new(move |_e: &MessageEvent| log.lock().unwrap().push(tag))
        };
        (log, factory)
    }

    #[test]
    fn higher_priority_runs_first() {
        let dispatcher = Dispatcher::new();
        let (log, handler) = recorder();

        dispatcher.register(Priority::Low, handler("low")).unwrap();
        dispatcher
            .register(Priority::Highest, handler("highest"))
            .unwrap();
        dispatcher
            .register(Priority::Normal, handler("normal"))
            .unwrap();

        let delivered = dispatcher.dispatch(&event()).unwrap();
        assert_eq!(delivered, 3);
        assert_eq!(*log.lock().unwrap(), vec!["highest", "normal", "low"]);
    }

    #[test]
    fn registration_order_kept_within_tier() {
        let dispatcher = Dispatcher::new();
        let (log, handler) = recorder();

        dispatcher.register(Priority::Normal, handler("first")).unwrap();
        dispatcher.register(Priority::Normal, handler("second")).unwrap();
        dispatcher.register(Priority::Normal, handler("third")).unwrap();

        dispatcher.dispatch(&event()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn unregister_stops_delivery() {
        let dispatcher = Dispatcher::new();
        let (log, handler) = recorder();

        let keep = dispatcher.register(Priority::Normal, handler("keep")).unwrap();
        let drop = dispatcher.register(Priority::Normal, handler("drop")).unwrap();

        assert!(dispatcher.unregister(drop).unwrap());
        assert!(!dispatcher.unregister(drop).unwrap());

        let delivered = dispatcher.dispatch(&event()).unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(*log.lock().unwrap(), vec!["keep"]);
        assert_eq!(dispatcher.handler_count().unwrap(), 1);
        let _ = keep;
    }

    #[test]
    fn dispatch_without_handlers_is_a_noop() {
        let dispatcher = Dispatcher::new();
        assert_eq!(dispatcher.dispatch(&event()).unwrap(), 0);
    }

    #[test]
    fn clones_share_the_handler_table() {
        let dispatcher = Dispatcher::new();
        let clone = dispatcher.clone();
        let (log, handler) = recorder();

        clone.register(Priority::Normal, handler("shared")).unwrap();
        dispatcher.dispatch(&event()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["shared"]);
    }

    #[test]
    fn event_carries_peer_and_plaintext() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);

        dispatcher
            .register(Priority::Normal, move |e: &MessageEvent| {
                *seen_clone.lock().unwrap() = Some(e.clone());
            })
            .unwrap();
        dispatcher.dispatch(&event()).unwrap();

        let got = seen.lock().unwrap().take().unwrap();
        assert_eq!(got.peer, "user-1:000001");
        assert_eq!(got.plaintext, "hello");
    }
}

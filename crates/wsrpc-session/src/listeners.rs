//! Local notification listeners.
//!
//! A typed dispatch table: `(kind, name)` maps to an ordered list of
//! callbacks. Several independent listeners per name are allowed, and each
//! can be removed on its own by [`ListenerId`].
//!
//! The table is shared (`Arc`) and outlives any one session, so a client's
//! listeners keep working across reconnects.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tokio::sync::mpsc;
use wsrpc_protocol::is_internal;

/// Whether a notification name is application-level or internal (`rpc.*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Public,
    Internal,
}

impl NotificationKind {
    /// Classifies a name by its prefix.
    pub fn of(name: &str) -> Self {
        if is_internal(name) {
            Self::Internal
        } else {
            Self::Public
        }
    }
}

/// Identifies one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A notification callback. Receives the notification's params.
pub type Listener = Arc<dyn Fn(Option<Value>) + Send + Sync>;

type Key = (NotificationKind, String);

#[derive(Default)]
struct Table {
    next_id: u64,
    by_key: HashMap<Key, Vec<(ListenerId, Listener)>>,
}

/// The listener table. Cheap to clone; clones share entries.
#[derive(Clone, Default)]
pub struct Listeners {
    table: Arc<RwLock<Table>>,
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Listeners")
            .field("keys", &table.by_key.len())
            .finish()
    }
}

impl Listeners {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a callback for `(kind, name)`.
    pub fn add(
        &self,
        kind: NotificationKind,
        name: &str,
        listener: impl Fn(Option<Value>) + Send + Sync + 'static,
    ) -> ListenerId {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        table.next_id += 1;
        let id = ListenerId(table.next_id);
        table
            .by_key
            .entry((kind, name.to_owned()))
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Adds a listener that forwards params into a channel.
    pub fn channel(
        &self,
        kind: NotificationKind,
        name: &str,
    ) -> (ListenerId, mpsc::UnboundedReceiver<Option<Value>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.add(kind, name, move |params| {
            let _ = tx.send(params);
        });
        (id, rx)
    }

    /// Removes one listener. Returns `false` if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;
        table.by_key.retain(|_, listeners| {
            let before = listeners.len();
            listeners.retain(|(existing, _)| *existing != id);
            removed |= listeners.len() != before;
            !listeners.is_empty()
        });
        removed
    }

    /// Removes every listener for `(kind, name)`. Returns how many.
    pub fn remove_all(&self, kind: NotificationKind, name: &str) -> usize {
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .by_key
            .remove(&(kind, name.to_owned()))
            .map_or(0, |listeners| listeners.len())
    }

    /// Returns `true` if at least one listener exists for `(kind, name)`.
    pub fn has(&self, kind: NotificationKind, name: &str) -> bool {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_key
            .contains_key(&(kind, name.to_owned()))
    }

    /// Calls every listener for `(kind, name)` in registration order.
    /// Returns how many were called. Unknown names are ignored.
    pub fn dispatch(&self, kind: NotificationKind, name: &str, params: Option<Value>) -> usize {
        let listeners: Vec<Listener> = self
            .table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_key
            .get(&(kind, name.to_owned()))
            .map(|entries| entries.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        for listener in &listeners {
            let params = params.clone();
            if std::panic::catch_unwind(AssertUnwindSafe(|| listener(params))).is_err() {
                tracing::warn!(notification = name, "notification listener panicked");
            }
        }
        listeners.len()
    }
}

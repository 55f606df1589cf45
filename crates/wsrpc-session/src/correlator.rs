//! The request correlator: outstanding calls keyed by request id.
//!
//! Removal from the pending map is the linearization point. Whoever
//! removes an entry (a reply, the timeout, the caller giving up, or the
//! connection closing) decides its outcome; everyone else finds nothing
//! and backs off.
//!
//! An id is live at most once. Each registration gets a [`Ticket`], and a
//! caller only ever removes the entry its own ticket names, so an id that
//! is reused after its first call completed stays safe.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;
use wsrpc_protocol::{ErrorObject, RequestId};

use crate::CallError;

/// What a pending call eventually receives.
pub type Reply = Result<Value, CallError>;

/// Names one registration of a request id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

struct PendingRequest {
    ticket: Ticket,
    method: String,
    reply: oneshot::Sender<Reply>,
}

#[derive(Default)]
struct Pending {
    requests: HashMap<RequestId, PendingRequest>,
    next_ticket: u64,
    closed: bool,
}

/// Per-connection registry of in-flight outgoing requests.
#[derive(Default)]
pub struct Correlator {
    pending: Mutex<Pending>,
}

impl Correlator {
    /// Creates an empty correlator.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a call before its frame is written.
    ///
    /// # Errors
    /// - [`CallError::ConnectionClosed`] once [`close`](Self::close) has run
    /// - [`CallError::DuplicateId`] if `id` already names a pending call;
    ///   that call is left untouched
    pub fn register(
        &self,
        id: RequestId,
        method: &str,
    ) -> Result<(Ticket, oneshot::Receiver<Reply>), CallError> {
        let mut pending = self.lock();
        if pending.closed {
            return Err(CallError::ConnectionClosed);
        }
        if pending.requests.contains_key(&id) {
            return Err(CallError::DuplicateId(id));
        }
        pending.next_ticket += 1;
        let ticket = Ticket(pending.next_ticket);
        let (tx, rx) = oneshot::channel();
        pending.requests.insert(
            id,
            PendingRequest {
                ticket,
                method: method.to_owned(),
                reply: tx,
            },
        );
        Ok((ticket, rx))
    }

    /// Drops the entry registered under `ticket` without answering it.
    /// Returns `false` if it was already gone, or if `id` now belongs to a
    /// later registration.
    pub fn remove(&self, id: &RequestId, ticket: Ticket) -> bool {
        let mut pending = self.lock();
        match pending.requests.get(id) {
            Some(entry) if entry.ticket == ticket => pending.requests.remove(id).is_some(),
            _ => false,
        }
    }

    /// Completes a call with a result. Unknown ids are ignored.
    pub fn resolve(&self, id: &RequestId, result: Value) -> bool {
        self.complete(id, Ok(result))
    }

    /// Fails a call with the peer's error object. Unknown ids are ignored.
    pub fn reject(&self, id: &RequestId, error: ErrorObject) -> bool {
        self.complete(id, Err(CallError::Remote(error)))
    }

    fn complete(&self, id: &RequestId, reply: Reply) -> bool {
        let Some(entry) = self.lock().requests.remove(id) else {
            tracing::debug!(%id, "reply for unknown request dropped");
            return false;
        };
        tracing::debug!(%id, method = %entry.method, ok = reply.is_ok(), "reply matched");
        // The caller may have stopped waiting; that is fine.
        let _ = entry.reply.send(reply);
        true
    }

    /// Rejects every pending call with [`CallError::ConnectionClosed`] and
    /// refuses new ones. Returns how many were rejected.
    pub fn close(&self) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.lock();
            pending.closed = true;
            pending.requests.drain().map(|(_, entry)| entry).collect()
        };
        let count = drained.len();
        for entry in drained {
            let _ = entry.reply.send(Err(CallError::ConnectionClosed));
        }
        count
    }

    /// Number of calls waiting for a reply.
    pub fn len(&self) -> usize {
        self.lock().requests.len()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! In-process connection pair.
//!
//! Behaves like a WebSocket from the engine's point of view: whole
//! messages, a close handshake carrying a code, and `Closed` once the peer
//! goes away. Used by the engine tests and for embedding two endpoints in
//! one process.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, Mutex};

use crate::{CloseReason, Connection, ConnectionId, Inbound, TransportError};

enum Frame {
    Data(Vec<u8>),
    Close(CloseReason),
}

/// One end of an in-memory connection. Create pairs with [`memory_pair`].
pub struct MemoryConnection {
    id: ConnectionId,
    /// Frames towards the peer.
    peer: mpsc::UnboundedSender<Frame>,
    /// Our own inbox, so a local close can wake our own `recv`. Weak so
    /// that dropping the peer still ends the stream.
    inbox: mpsc::WeakUnboundedSender<Frame>,
    rx: Mutex<mpsc::UnboundedReceiver<Frame>>,
    closed: AtomicBool,
}

/// Creates a connected pair of in-memory connections with fresh IDs.
pub fn memory_pair() -> (MemoryConnection, MemoryConnection) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();

    let a = MemoryConnection {
        id: ConnectionId::next(),
        inbox: a_tx.downgrade(),
        peer: b_tx.clone(),
        rx: Mutex::new(a_rx),
        closed: AtomicBool::new(false),
    };
    let b = MemoryConnection {
        id: ConnectionId::next(),
        inbox: b_tx.downgrade(),
        peer: a_tx,
        rx: Mutex::new(b_rx),
        closed: AtomicBool::new(false),
    };
    (a, b)
}

impl MemoryConnection {
    /// Returns `true` once [`close`](Connection::close) has been called on
    /// this end.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Connection for MemoryConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed(
                "closed locally".into(),
            ));
        }
        self.peer
            .send(Frame::Data(data.to_vec()))
            .map_err(|_| TransportError::ConnectionClosed("peer dropped".into()))
    }

    async fn recv(&self) -> Result<Inbound, TransportError> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(Frame::Data(data)) => Ok(Inbound::Message(data)),
            Some(Frame::Close(reason)) => Ok(Inbound::Closed(reason)),
            None => Ok(Inbound::Closed(CloseReason::abnormal("peer dropped"))),
        }
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let reason = CloseReason::new(code, reason);
        // The peer may already be gone; a close towards nobody is fine.
        let _ = self.peer.send(Frame::Close(reason.clone()));
        if let Some(inbox) = self.inbox.upgrade() {
            let _ = inbox.send(Frame::Close(reason));
        }
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

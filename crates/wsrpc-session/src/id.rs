//! Request id generation.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use rand::Rng;
use wsrpc_protocol::RequestId;

/// Produces ids for outgoing requests.
///
/// Clones share state, so a client that reconnects keeps counting where it
/// left off.
#[derive(Clone)]
pub enum IdGenerator {
    /// 1, 2, 3, ...
    Counter(Arc<AtomicI64>),
    /// 32 lowercase hex characters (128 random bits).
    RandomHex,
    /// Any function, e.g. a UUID source.
    Custom(Arc<dyn Fn() -> RequestId + Send + Sync>),
}

impl IdGenerator {
    /// A counter starting at 1.
    pub fn counter() -> Self {
        Self::Counter(Arc::new(AtomicI64::new(1)))
    }

    /// Random 128-bit hex strings.
    pub fn random_hex() -> Self {
        Self::RandomHex
    }

    /// Ids from a caller-supplied function.
    pub fn custom(f: impl Fn() -> RequestId + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    /// Returns the next id.
    pub fn next_id(&self) -> RequestId {
        match self {
            Self::Counter(next) => RequestId::Number(next.fetch_add(1, Ordering::Relaxed)),
            Self::RandomHex => RequestId::String(random_hex()),
            Self::Custom(f) => f(),
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::counter()
    }
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Counter(next) => write!(f, "Counter(next={})", next.load(Ordering::Relaxed)),
            Self::RandomHex => write!(f, "RandomHex"),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

fn random_hex() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_starts_at_one_and_increments() {
        let ids = IdGenerator::counter();
        assert_eq!(ids.next_id(), RequestId::Number(1));
        assert_eq!(ids.next_id(), RequestId::Number(2));
    }

    #[test]
    fn test_counter_clones_share_state() {
        let a = IdGenerator::counter();
        let b = a.clone();
        a.next_id();
        assert_eq!(b.next_id(), RequestId::Number(2));
    }

    #[test]
    fn test_random_hex_is_32_hex_chars_and_unique() {
        let ids = IdGenerator::random_hex();
        let RequestId::String(first) = ids.next_id() else {
            panic!("expected string id");
        };
        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(RequestId::String(first), ids.next_id());
    }

    #[test]
    fn test_custom_generator() {
        let ids = IdGenerator::custom(|| RequestId::from("fixed"));
        assert_eq!(ids.next_id(), RequestId::from("fixed"));
    }
}

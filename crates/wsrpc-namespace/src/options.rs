//! Namespace configuration.

use serde::{Deserialize, Serialize};

/// How notifications find their recipients.
///
/// One axis on purpose: subscription bookkeeping and broadcast targeting
/// always change together.
///
/// ```text
/// Strict     rpc.on/rpc.off maintain subscriber sets; a notification
///            reaches only the subscribers of its (declared) name.
/// Broadcast  rpc.on/rpc.off answer "ok" for every name without
///            bookkeeping; a notification reaches every connection.
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationMode {
    #[default]
    Strict,
    Broadcast,
}

impl NotificationMode {
    /// Returns `true` in [`Strict`](Self::Strict) mode.
    pub fn is_strict(self) -> bool {
        matches!(self, Self::Strict)
    }
}

impl std::fmt::Display for NotificationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Broadcast => write!(f, "broadcast"),
        }
    }
}

/// Options applied to a namespace when it is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceOptions {
    /// Notification targeting mode. Default: [`NotificationMode::Strict`].
    pub notifications: NotificationMode,
}

impl NamespaceOptions {
    /// Options for broadcast-to-all notification delivery.
    pub fn broadcast() -> Self {
        Self {
            notifications: NotificationMode::Broadcast,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_options_default_is_strict() {
        let options = NamespaceOptions::default();
        assert_eq!(options.notifications, NotificationMode::Strict);
        assert!(options.notifications.is_strict());
    }

    #[test]
    fn test_namespace_options_broadcast() {
        assert!(!NamespaceOptions::broadcast().notifications.is_strict());
    }

    #[test]
    fn test_notification_mode_display() {
        assert_eq!(NotificationMode::Strict.to_string(), "strict");
        assert_eq!(NotificationMode::Broadcast.to_string(), "broadcast");
    }
}

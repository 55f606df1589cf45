//! A namespace: one method table, one notification table, and the set of
//! connections attached to it.
//!
//! Several connections read and write the same namespace at once, so the
//! tables sit behind one `RwLock`. The lock is never held across an
//! `.await`: handlers and channel senders are cloned out first, then used.
//!
//! Connections are not owned here. Each attached connection registers a
//! [`PeerSender`], and the namespace pushes [`PeerCommand`]s through it.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use wsrpc_protocol::{is_internal, ErrorCode, ErrorObject};
use wsrpc_transport::{close_code, ConnectionId};

use crate::handler::{method_handler, run_handler, CallContext, MethodError, MethodHandler};
use crate::{builtins, NamespaceError, NamespaceOptions};

/// Name of the login method installed by [`Namespace::set_auth`].
pub const LOGIN_METHOD: &str = "rpc.login";

/// Per-name results of `rpc.on` / `rpc.off`.
pub mod status {
    /// The (un)subscription took effect.
    pub const OK: &str = "ok";
    /// No notification is declared under that name.
    pub const INVALID: &str = "provided event invalid";
    /// `rpc.off` for a name the connection was not subscribed to.
    pub const NOT_SUBSCRIBED: &str = "not subscribed";
    /// `rpc.on` for a name the connection is already subscribed to.
    pub const ALREADY_SUBSCRIBED: &str = "socket has already been subscribed to event";
}

/// A command pushed from a namespace to one attached connection.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerCommand {
    /// Send a notification frame.
    Notify {
        method: String,
        params: Option<Value>,
    },
    /// Close the connection.
    Close { code: u16, reason: String },
}

/// Channel sender for delivering commands to a connection.
pub type PeerSender = mpsc::UnboundedSender<PeerCommand>;

struct MethodEntry {
    handler: MethodHandler,
    protected: bool,
}

#[derive(Default)]
struct NotificationEntry {
    subscribers: HashSet<ConnectionId>,
    protected: bool,
}

struct ConnectionEntry {
    sender: PeerSender,
    authenticated: bool,
}

#[derive(Default)]
struct Tables {
    methods: HashMap<String, MethodEntry>,
    notifications: HashMap<String, NotificationEntry>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
    closed: bool,
}

struct Inner {
    name: String,
    options: NamespaceOptions,
    tables: RwLock<Tables>,
}

/// A named partition of methods, notifications, and connections.
///
/// Cheap to clone: all clones share the same tables.
#[derive(Clone)]
pub struct Namespace {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.inner.name)
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

/// Checks a namespace name: non-empty, starting with `/`.
pub fn validate_namespace_name(name: &str) -> Result<(), NamespaceError> {
    if name.starts_with('/') {
        Ok(())
    } else {
        Err(NamespaceError::InvalidName(name.to_owned()))
    }
}

fn check_name(name: &str, internal: bool) -> Result<(), NamespaceError> {
    if name.is_empty() {
        return Err(NamespaceError::EmptyName);
    }
    match (internal, is_internal(name)) {
        (false, true) => Err(NamespaceError::ReservedName(name.to_owned())),
        (true, false) => Err(NamespaceError::MissingPrefix(name.to_owned())),
        _ => Ok(()),
    }
}

impl Namespace {
    /// Creates a namespace with the built-in `rpc.*` methods installed.
    pub fn new(name: impl Into<String>, options: NamespaceOptions) -> Result<Self, NamespaceError> {
        let name = name.into();
        validate_namespace_name(&name)?;
        let namespace = Self {
            inner: Arc::new(Inner {
                name,
                options,
                tables: RwLock::new(Tables::default()),
            }),
        };
        builtins::install(&namespace);
        Ok(namespace)
    }

    /// The namespace name, e.g. `"/"` or `"/chat"`.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The options this namespace was created with.
    pub fn options(&self) -> NamespaceOptions {
        self.inner.options
    }

    // Tables stay structurally valid if a holder panicked, so a poisoned
    // lock is still usable.
    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.inner.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.inner.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Methods
    // -----------------------------------------------------------------------

    /// Registers an application method. Re-registering a name replaces the
    /// previous handler.
    pub fn register_method<F, Fut>(&self, name: &str, handler: F) -> Result<MethodHandle, NamespaceError>
    where
        F: Fn(Option<Value>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, MethodError>> + Send + 'static,
    {
        self.register_handler(name, method_handler(handler), false)
    }

    /// Registers an internal (`rpc.*`) method.
    pub fn register_internal_method<F, Fut>(
        &self,
        name: &str,
        handler: F,
    ) -> Result<MethodHandle, NamespaceError>
    where
        F: Fn(Option<Value>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, MethodError>> + Send + 'static,
    {
        self.register_handler(name, method_handler(handler), true)
    }

    /// Installs the login method. A truthy result authenticates the caller.
    pub fn set_auth<F, Fut>(&self, handler: F) -> Result<MethodHandle, NamespaceError>
    where
        F: Fn(Option<Value>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, MethodError>> + Send + 'static,
    {
        self.register_internal_method(LOGIN_METHOD, handler)
    }

    /// Registers an already-boxed handler.
    pub fn register_handler(
        &self,
        name: &str,
        handler: MethodHandler,
        internal: bool,
    ) -> Result<MethodHandle, NamespaceError> {
        check_name(name, internal)?;
        let mut tables = self.write();
        if tables.closed {
            return Err(NamespaceError::Closed(self.inner.name.clone()));
        }
        tables.methods.insert(
            name.to_owned(),
            MethodEntry {
                handler,
                protected: false,
            },
        );
        drop(tables);
        tracing::debug!(namespace = %self.inner.name, method = name, "method registered");
        Ok(MethodHandle {
            namespace: self.clone(),
            name: name.to_owned(),
        })
    }

    /// Returns a handle to a registered method.
    pub fn method(&self, name: &str) -> Option<MethodHandle> {
        self.read().methods.contains_key(name).then(|| MethodHandle {
            namespace: self.clone(),
            name: name.to_owned(),
        })
    }

    /// Removes a method. Returns `false` if it was not registered.
    pub fn unregister_method(&self, name: &str) -> bool {
        self.write().methods.remove(name).is_some()
    }

    /// Public (non-`rpc.`) method names, sorted.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .read()
            .methods
            .keys()
            .filter(|name| !is_internal(name))
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn set_method_protected(&self, name: &str, protected: bool) -> bool {
        match self.write().methods.get_mut(name) {
            Some(entry) => {
                entry.protected = protected;
                true
            }
            None => false,
        }
    }

    fn is_method_protected(&self, name: &str) -> bool {
        self.read().methods.get(name).is_some_and(|m| m.protected)
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Looks up `method` for `connection_id` and runs it.
    ///
    /// Answers -32601 for an unknown name and -32605 for a protected method
    /// called by an unauthenticated connection (without running it).
    pub async fn invoke(
        &self,
        connection_id: ConnectionId,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ErrorObject> {
        let handler = self.resolve(connection_id, method)?;
        let ctx = CallContext {
            connection_id,
            namespace: self.clone(),
        };
        run_handler(&handler, params, ctx)
            .await
            .map_err(MethodError::into_error_object)
    }

    fn resolve(&self, connection_id: ConnectionId, method: &str) -> Result<MethodHandler, ErrorObject> {
        let tables = self.read();
        let entry = tables
            .methods
            .get(method)
            .ok_or_else(|| ErrorObject::new(ErrorCode::MethodNotFound))?;
        if entry.protected && !authenticated(&tables, connection_id) {
            return Err(ErrorObject::new(ErrorCode::MethodForbidden));
        }
        Ok(entry.handler.clone())
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    /// Declares an application notification. Declaring an existing name
    /// keeps its subscribers.
    pub fn register_notification(&self, name: &str) -> Result<NotificationHandle, NamespaceError> {
        self.declare(name, false)
    }

    /// Declares several application notifications at once.
    ///
    /// Every name is checked first, so a bad name declares none of them.
    pub fn register_notifications(
        &self,
        names: &[&str],
    ) -> Result<Vec<NotificationHandle>, NamespaceError> {
        for name in names {
            check_name(name, false)?;
        }
        names.iter().map(|name| self.declare(name, false)).collect()
    }

    /// Declares an internal (`rpc.*`) notification.
    pub fn register_internal_notification(
        &self,
        name: &str,
    ) -> Result<NotificationHandle, NamespaceError> {
        self.declare(name, true)
    }

    fn declare(&self, name: &str, internal: bool) -> Result<NotificationHandle, NamespaceError> {
        check_name(name, internal)?;
        let mut tables = self.write();
        if tables.closed {
            return Err(NamespaceError::Closed(self.inner.name.clone()));
        }
        tables.notifications.entry(name.to_owned()).or_default();
        drop(tables);
        tracing::debug!(namespace = %self.inner.name, notification = name, "notification declared");
        Ok(NotificationHandle {
            namespace: self.clone(),
            name: name.to_owned(),
        })
    }

    /// Removes a notification and severs all of its subscriptions.
    pub fn unregister_notification(&self, name: &str) -> bool {
        self.write().notifications.remove(name).is_some()
    }

    /// Public (non-`rpc.`) notification names, sorted.
    pub fn notification_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .read()
            .notifications
            .keys()
            .filter(|name| !is_internal(name))
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Connections subscribed to `name`, sorted.
    pub fn subscribers(&self, name: &str) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .read()
            .notifications
            .get(name)
            .map(|n| n.subscribers.iter().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn set_notification_protected(&self, name: &str, protected: bool) -> bool {
        match self.write().notifications.get_mut(name) {
            Some(entry) => {
                entry.protected = protected;
                true
            }
            None => false,
        }
    }

    fn is_notification_protected(&self, name: &str) -> bool {
        self.read().notifications.get(name).is_some_and(|n| n.protected)
    }

    /// Subscribes a connection to each name, returning a status per name.
    ///
    /// In strict mode, a protected name requested by an unauthenticated
    /// connection rejects the whole call with -32606 and subscribes
    /// nothing.
    pub fn subscribe(
        &self,
        connection_id: ConnectionId,
        names: &[String],
    ) -> Result<Map<String, Value>, ErrorObject> {
        if !self.inner.options.notifications.is_strict() {
            return Ok(all_ok(names));
        }
        let mut tables = self.write();
        if !tables.connections.contains_key(&connection_id) {
            return Err(ErrorObject::new(ErrorCode::InternalError)
                .with_data("connection is not attached"));
        }
        let forbidden = !authenticated(&tables, connection_id)
            && names
                .iter()
                .any(|name| tables.notifications.get(name).is_some_and(|n| n.protected));
        if forbidden {
            return Err(ErrorObject::new(ErrorCode::EventForbidden));
        }

        let mut statuses = Map::new();
        for name in names {
            let outcome = match tables.notifications.get_mut(name) {
                None => status::INVALID,
                Some(entry) => {
                    if entry.subscribers.insert(connection_id) {
                        status::OK
                    } else {
                        status::ALREADY_SUBSCRIBED
                    }
                }
            };
            statuses.insert(name.clone(), Value::from(outcome));
        }
        drop(tables);
        tracing::debug!(namespace = %self.inner.name, %connection_id, ?names, "subscribed");
        Ok(statuses)
    }

    /// Unsubscribes a connection from each name, returning a status per name.
    pub fn unsubscribe(&self, connection_id: ConnectionId, names: &[String]) -> Map<String, Value> {
        if !self.inner.options.notifications.is_strict() {
            return all_ok(names);
        }
        let mut tables = self.write();
        let mut statuses = Map::new();
        for name in names {
            let outcome = match tables.notifications.get_mut(name) {
                None => status::INVALID,
                Some(entry) => {
                    if entry.subscribers.remove(&connection_id) {
                        status::OK
                    } else {
                        status::NOT_SUBSCRIBED
                    }
                }
            };
            statuses.insert(name.clone(), Value::from(outcome));
        }
        statuses
    }

    /// Sends an application notification to its recipients and returns how
    /// many were reached. No recipients is not an error.
    pub fn send_notification(&self, name: &str, params: Option<Value>) -> Result<usize, NamespaceError> {
        check_name(name, false)?;
        Ok(self.deliver(name, params))
    }

    /// Sends an internal (`rpc.*`) notification.
    pub fn send_internal_notification(
        &self,
        name: &str,
        params: Option<Value>,
    ) -> Result<usize, NamespaceError> {
        check_name(name, true)?;
        Ok(self.deliver(name, params))
    }

    fn deliver(&self, name: &str, params: Option<Value>) -> usize {
        let targets: Vec<PeerSender> = {
            let tables = self.read();
            if self.inner.options.notifications.is_strict() {
                tables
                    .notifications
                    .get(name)
                    .map(|entry| {
                        entry
                            .subscribers
                            .iter()
                            .filter_map(|id| tables.connections.get(id))
                            .map(|conn| conn.sender.clone())
                            .collect()
                    })
                    .unwrap_or_default()
            } else {
                let protected = tables.notifications.get(name).is_some_and(|n| n.protected);
                tables
                    .connections
                    .values()
                    .filter(|conn| !protected || conn.authenticated)
                    .map(|conn| conn.sender.clone())
                    .collect()
            }
        };

        let reached = targets
            .iter()
            .filter(|sender| {
                sender
                    .send(PeerCommand::Notify {
                        method: name.to_owned(),
                        params: params.clone(),
                    })
                    .is_ok()
            })
            .count();
        tracing::debug!(namespace = %self.inner.name, notification = name, reached, "notification sent");
        reached
    }

    // -----------------------------------------------------------------------
    // Connections
    // -----------------------------------------------------------------------

    /// Attaches a connection. It starts unauthenticated.
    pub fn attach(&self, connection_id: ConnectionId, sender: PeerSender) -> Result<(), NamespaceError> {
        let mut tables = self.write();
        if tables.closed {
            return Err(NamespaceError::Closed(self.inner.name.clone()));
        }
        tables.connections.insert(
            connection_id,
            ConnectionEntry {
                sender,
                authenticated: false,
            },
        );
        drop(tables);
        tracing::info!(namespace = %self.inner.name, %connection_id, "connection attached");
        Ok(())
    }

    /// Detaches a connection and removes it from every subscriber set.
    pub fn detach(&self, connection_id: ConnectionId) -> bool {
        let mut tables = self.write();
        let removed = tables.connections.remove(&connection_id).is_some();
        for entry in tables.notifications.values_mut() {
            entry.subscribers.remove(&connection_id);
        }
        drop(tables);
        if removed {
            tracing::info!(namespace = %self.inner.name, %connection_id, "connection detached");
        }
        removed
    }

    /// Attached connections, sorted.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.read().connections.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Returns `true` if the connection is attached and logged in.
    pub fn is_authenticated(&self, connection_id: ConnectionId) -> bool {
        authenticated(&self.read(), connection_id)
    }

    /// Sets the connection's login flag. Returns `false` if not attached.
    pub fn set_authenticated(&self, connection_id: ConnectionId, value: bool) -> bool {
        match self.write().connections.get_mut(&connection_id) {
            Some(conn) => {
                conn.authenticated = value;
                true
            }
            None => false,
        }
    }

    /// Asks one connection to close. Returns `false` if not attached.
    pub fn disconnect(&self, connection_id: ConnectionId, code: u16, reason: &str) -> bool {
        let sender = self
            .read()
            .connections
            .get(&connection_id)
            .map(|conn| conn.sender.clone());
        sender.is_some_and(|sender| {
            sender
                .send(PeerCommand::Close {
                    code,
                    reason: reason.to_owned(),
                })
                .is_ok()
        })
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Closes every attached connection (code 1000) and clears all tables.
    /// Later registrations and attachments are rejected.
    pub fn close(&self) {
        let connections = {
            let mut tables = self.write();
            if tables.closed {
                return;
            }
            tables.closed = true;
            tables.methods.clear();
            tables.notifications.clear();
            std::mem::take(&mut tables.connections)
        };
        for conn in connections.values() {
            let _ = conn.sender.send(PeerCommand::Close {
                code: close_code::NORMAL,
                reason: "namespace closed".to_owned(),
            });
        }
        tracing::info!(
            namespace = %self.inner.name,
            connections = connections.len(),
            "namespace closed"
        );
    }

    /// Returns `true` once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.read().closed
    }

    /// Returns `true` if nothing but the built-ins lives here: no
    /// connection, no notification, and no method the application added.
    pub fn is_vacant(&self) -> bool {
        let tables = self.read();
        tables.connections.is_empty()
            && tables.notifications.is_empty()
            && tables.methods.keys().all(|name| builtins::is_builtin(name))
    }
}

fn authenticated(tables: &Tables, connection_id: ConnectionId) -> bool {
    tables
        .connections
        .get(&connection_id)
        .is_some_and(|conn| conn.authenticated)
}

fn all_ok(names: &[String]) -> Map<String, Value> {
    names
        .iter()
        .map(|name| (name.clone(), Value::from(status::OK)))
        .collect()
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Handle to a registered method, for toggling its protection.
#[derive(Debug, Clone)]
pub struct MethodHandle {
    namespace: Namespace,
    name: String,
}

impl MethodHandle {
    /// The method name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requires an authenticated connection. Idempotent.
    pub fn protected(&self) -> &Self {
        self.namespace.set_method_protected(&self.name, true);
        self
    }

    /// Allows any connection. Idempotent.
    pub fn public(&self) -> &Self {
        self.namespace.set_method_protected(&self.name, false);
        self
    }

    /// Current protection flag.
    pub fn is_protected(&self) -> bool {
        self.namespace.is_method_protected(&self.name)
    }
}

/// Handle to a declared notification, for toggling its protection.
#[derive(Debug, Clone)]
pub struct NotificationHandle {
    namespace: Namespace,
    name: String,
}

impl NotificationHandle {
    /// The notification name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Only authenticated connections may subscribe. Idempotent.
    pub fn protected(&self) -> &Self {
        self.namespace.set_notification_protected(&self.name, true);
        self
    }

    /// Any connection may subscribe. Idempotent.
    pub fn public(&self) -> &Self {
        self.namespace.set_notification_protected(&self.name, false);
        self
    }

    /// Current protection flag.
    pub fn is_protected(&self) -> bool {
        self.namespace.is_notification_protected(&self.name)
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn namespace() -> Namespace {
        Namespace::new("/", NamespaceOptions::default()).unwrap()
    }

    fn attach(ns: &Namespace) -> (ConnectionId, mpsc::UnboundedReceiver<PeerCommand>) {
        let id = ConnectionId::next();
        let (tx, rx) = mpsc::unbounded_channel();
        ns.attach(id, tx).unwrap();
        (id, rx)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn test_namespace_name_must_start_with_slash() {
        assert!(Namespace::new("", NamespaceOptions::default()).is_err());
        assert_eq!(
            Namespace::new("chat", NamespaceOptions::default()).unwrap_err(),
            NamespaceError::InvalidName("chat".into())
        );
        assert!(Namespace::new("/chat", NamespaceOptions::default()).is_ok());
    }

    #[test]
    fn test_register_method_rejects_reserved_prefix() {
        let ns = namespace();
        let result = ns.register_method("rpc.sneaky", |_, _| async { Ok(Value::Null) });
        assert_eq!(result.unwrap_err(), NamespaceError::ReservedName("rpc.sneaky".into()));
    }

    #[test]
    fn test_register_internal_method_requires_prefix() {
        let ns = namespace();
        let result = ns.register_internal_method("plain", |_, _| async { Ok(Value::Null) });
        assert_eq!(result.unwrap_err(), NamespaceError::MissingPrefix("plain".into()));
    }

    #[test]
    fn test_register_method_rejects_empty_name() {
        let ns = namespace();
        let result = ns.register_method("", |_, _| async { Ok(Value::Null) });
        assert_eq!(result.unwrap_err(), NamespaceError::EmptyName);
    }

    #[test]
    fn test_method_names_lists_only_public_sorted() {
        let ns = namespace();
        ns.register_method("b", |_, _| async { Ok(Value::Null) }).unwrap();
        ns.register_method("a", |_, _| async { Ok(Value::Null) }).unwrap();
        assert_eq!(ns.method_names(), vec!["a", "b"]);
        assert!(ns.method(builtins::ON).is_some());
    }

    #[test]
    fn test_method_protected_toggle_is_idempotent() {
        let ns = namespace();
        let handle = ns.register_method("m", |_, _| async { Ok(Value::Null) }).unwrap();
        handle.protected().protected();
        assert!(handle.is_protected());
        handle.public().public();
        assert!(!handle.is_protected());
    }

    #[test]
    fn test_unregister_method() {
        let ns = namespace();
        ns.register_method("m", |_, _| async { Ok(Value::Null) }).unwrap();
        assert!(ns.unregister_method("m"));
        assert!(!ns.unregister_method("m"));
        assert!(ns.method_names().is_empty());
    }

    #[tokio::test]
    async fn test_invoke_unknown_method_is_not_found() {
        let ns = namespace();
        let (id, _rx) = attach(&ns);
        let err = ns.invoke(id, "nope", None).await.unwrap_err();
        assert_eq!(err.code, -32601);
    }

    #[tokio::test]
    async fn test_invoke_protected_method_gates_on_auth() {
        let ns = namespace();
        let (id, _rx) = attach(&ns);
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        ns.register_method("secret", move |_, _| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Ok(json!("classified")) }
        })
        .unwrap()
        .protected();

        let err = ns.invoke(id, "secret", None).await.unwrap_err();
        assert_eq!(err.code, -32605);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);

        assert!(ns.set_authenticated(id, true));
        assert_eq!(ns.invoke(id, "secret", None).await.unwrap(), json!("classified"));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscribe_strict_statuses() {
        let ns = namespace();
        let (id, _rx) = attach(&ns);
        ns.register_notification("x").unwrap();

        let first = ns.subscribe(id, &names(&["x", "missing"])).unwrap();
        assert_eq!(first["x"], status::OK);
        assert_eq!(first["missing"], status::INVALID);

        let again = ns.subscribe(id, &names(&["x"])).unwrap();
        assert_eq!(again["x"], status::ALREADY_SUBSCRIBED);
        assert_eq!(ns.subscribers("x"), vec![id]);
    }

    #[test]
    fn test_unsubscribe_not_subscribed_is_status_not_error() {
        let ns = namespace();
        let (id, _rx) = attach(&ns);
        ns.register_notification("x").unwrap();
        ns.subscribe(id, &names(&["x"])).unwrap();

        assert_eq!(ns.unsubscribe(id, &names(&["x"]))["x"], status::OK);
        assert_eq!(ns.unsubscribe(id, &names(&["x"]))["x"], status::NOT_SUBSCRIBED);
        assert_eq!(ns.unsubscribe(id, &names(&["y"]))["y"], status::INVALID);
    }

    #[test]
    fn test_subscribe_protected_notification_requires_auth() {
        let ns = namespace();
        let (id, _rx) = attach(&ns);
        ns.register_notification("open").unwrap();
        ns.register_notification("vip").unwrap().protected();

        let err = ns.subscribe(id, &names(&["open", "vip"])).unwrap_err();
        assert_eq!(err.code, -32606);
        // Nothing was subscribed by the rejected call.
        assert!(ns.subscribers("open").is_empty());

        ns.set_authenticated(id, true);
        let ok = ns.subscribe(id, &names(&["vip"])).unwrap();
        assert_eq!(ok["vip"], status::OK);
    }

    #[test]
    fn test_subscribe_broadcast_mode_reports_ok_without_bookkeeping() {
        let ns = Namespace::new("/", NamespaceOptions::broadcast()).unwrap();
        let (id, _rx) = attach(&ns);
        let statuses = ns.subscribe(id, &names(&["anything"])).unwrap();
        assert_eq!(statuses["anything"], status::OK);
        assert_eq!(ns.unsubscribe(id, &names(&["anything"]))["anything"], status::OK);
        assert!(ns.subscribers("anything").is_empty());
    }

    #[test]
    fn test_send_notification_reaches_only_subscribers() {
        let ns = namespace();
        let (subscribed, mut rx_a) = attach(&ns);
        let (_other, mut rx_b) = attach(&ns);
        ns.register_notification("x").unwrap();
        ns.subscribe(subscribed, &names(&["x"])).unwrap();

        assert_eq!(ns.send_notification("x", Some(json!([1]))).unwrap(), 1);
        assert_eq!(
            rx_a.try_recv().unwrap(),
            PeerCommand::Notify {
                method: "x".into(),
                params: Some(json!([1])),
            }
        );
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_send_notification_without_subscribers_is_noop() {
        let ns = namespace();
        ns.register_notification("x").unwrap();
        assert_eq!(ns.send_notification("x", None).unwrap(), 0);
        assert_eq!(ns.send_notification("undeclared", None).unwrap(), 0);
    }

    #[test]
    fn test_send_notification_broadcast_reaches_everyone() {
        let ns = Namespace::new("/", NamespaceOptions::broadcast()).unwrap();
        let (_a, mut rx_a) = attach(&ns);
        let (_b, mut rx_b) = attach(&ns);
        assert_eq!(ns.send_notification("news", None).unwrap(), 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_send_notification_name_rules() {
        let ns = namespace();
        assert!(ns.send_notification("rpc.x", None).is_err());
        assert!(ns.send_internal_notification("x", None).is_err());
        assert_eq!(ns.send_internal_notification("rpc.x", None).unwrap(), 0);
    }

    #[test]
    fn test_register_notifications_declares_all_or_none() {
        let ns = namespace();
        let handles = ns.register_notifications(&["b", "a"]).unwrap();
        assert_eq!(handles.len(), 2);
        assert_eq!(ns.notification_names(), names(&["a", "b"]));

        assert_eq!(
            ns.register_notifications(&["c", "rpc.d"]).unwrap_err(),
            NamespaceError::ReservedName("rpc.d".into())
        );
        assert_eq!(ns.notification_names(), names(&["a", "b"]));
    }

    #[test]
    fn test_unregister_notification_severs_subscribers() {
        let ns = namespace();
        let (id, _rx) = attach(&ns);
        ns.register_notification("x").unwrap();
        ns.subscribe(id, &names(&["x"])).unwrap();
        assert!(ns.unregister_notification("x"));
        assert_eq!(ns.send_notification("x", None).unwrap(), 0);
        assert!(ns.notification_names().is_empty());
    }

    #[test]
    fn test_detach_removes_from_every_subscriber_set() {
        let ns = namespace();
        let (id, _rx) = attach(&ns);
        ns.register_notification("a").unwrap();
        ns.register_notification("b").unwrap();
        ns.subscribe(id, &names(&["a", "b"])).unwrap();

        assert!(ns.detach(id));
        assert!(ns.subscribers("a").is_empty());
        assert!(ns.subscribers("b").is_empty());
        assert!(ns.connection_ids().is_empty());
        assert!(!ns.detach(id));
    }

    #[test]
    fn test_close_notifies_connections_and_rejects_registration() {
        let ns = namespace();
        let (_id, mut rx) = attach(&ns);
        ns.register_method("m", |_, _| async { Ok(Value::Null) }).unwrap();

        ns.close();
        assert!(ns.is_closed());
        assert_eq!(
            rx.try_recv().unwrap(),
            PeerCommand::Close {
                code: 1000,
                reason: "namespace closed".into(),
            }
        );
        assert!(ns.connection_ids().is_empty());
        assert!(ns.method_names().is_empty());
        assert!(matches!(
            ns.register_method("m", |_, _| async { Ok(Value::Null) }),
            Err(NamespaceError::Closed(_))
        ));
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(ns.attach(ConnectionId::next(), tx).is_err());
    }

    #[test]
    fn test_disconnect_sends_close_command() {
        let ns = namespace();
        let (id, mut rx) = attach(&ns);
        assert!(ns.disconnect(id, 4000, "bye"));
        assert_eq!(
            rx.try_recv().unwrap(),
            PeerCommand::Close {
                code: 4000,
                reason: "bye".into(),
            }
        );
        assert!(!ns.disconnect(ConnectionId::next(), 1000, ""));
    }

    #[test]
    fn test_is_authenticated_false_for_unknown_connection() {
        let ns = namespace();
        assert!(!ns.is_authenticated(ConnectionId::next()));
        assert!(!ns.set_authenticated(ConnectionId::next(), true));
    }
}

//! Namespace registry: the process-scoped map from name to [`Namespace`].
//!
//! Injected wherever it is needed (server, tests) rather than living in a
//! global, so two servers in one process never share tables by accident.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::namespace::validate_namespace_name;
use crate::{Namespace, NamespaceError, NamespaceOptions};

/// The name of the default namespace.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Creates, tracks, and closes namespaces. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct NamespaceRegistry {
    namespaces: Arc<RwLock<HashMap<String, Namespace>>>,
    options: NamespaceOptions,
}

impl NamespaceRegistry {
    /// Creates an empty registry. New namespaces get `options`.
    pub fn new(options: NamespaceOptions) -> Self {
        Self {
            namespaces: Arc::default(),
            options,
        }
    }

    /// The options applied to newly created namespaces.
    pub fn options(&self) -> NamespaceOptions {
        self.options
    }

    /// Returns the namespace called `name`, creating it on first use.
    ///
    /// A namespace that was closed is replaced by a fresh one.
    pub fn get_or_create(&self, name: &str) -> Result<Namespace, NamespaceError> {
        self.with_namespace(name, Namespace::clone)
    }

    /// Runs `f` on the namespace called `name` (created on first use) while
    /// the registry is locked.
    ///
    /// Attaching a connection inside `f` cannot race with
    /// [`release_if_vacant`](Self::release_if_vacant): the namespace is
    /// either released before `f` runs, and replaced, or it has the
    /// connection by the time anyone checks it again. `f` must not touch
    /// the registry.
    pub fn with_namespace<R>(
        &self,
        name: &str,
        f: impl FnOnce(&Namespace) -> R,
    ) -> Result<R, NamespaceError> {
        validate_namespace_name(name)?;
        let mut namespaces = self.namespaces.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = namespaces.get(name) {
            if !existing.is_closed() {
                return Ok(f(existing));
            }
        }
        let namespace = Namespace::new(name, self.options)?;
        namespaces.insert(name.to_owned(), namespace.clone());
        tracing::info!(namespace = name, mode = %self.options.notifications, "namespace created");
        Ok(f(&namespace))
    }

    /// Drops the namespace called `name` if it is vacant (see
    /// [`Namespace::is_vacant`]). The default namespace is always kept.
    ///
    /// Returns `true` if the namespace was removed.
    pub fn release_if_vacant(&self, name: &str) -> bool {
        if name == DEFAULT_NAMESPACE {
            return false;
        }
        let mut namespaces = self.namespaces.write().unwrap_or_else(PoisonError::into_inner);
        let vacant = namespaces.get(name).is_some_and(Namespace::is_vacant);
        if !vacant {
            return false;
        }
        if let Some(namespace) = namespaces.remove(name) {
            namespace.close();
        }
        tracing::debug!(namespace = name, "vacant namespace released");
        true
    }

    /// Returns the namespace called `name`, if it exists.
    pub fn get(&self, name: &str) -> Option<Namespace> {
        self.namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// All namespace names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Closes a namespace and removes it.
    pub fn close(&self, name: &str) -> Result<(), NamespaceError> {
        let removed = self
            .namespaces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        let namespace = removed.ok_or_else(|| NamespaceError::NotFound(name.to_owned()))?;
        namespace.close();
        Ok(())
    }

    /// Closes and removes every namespace.
    pub fn close_all(&self) {
        let drained: Vec<Namespace> = self
            .namespaces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, namespace)| namespace)
            .collect();
        for namespace in drained {
            namespace.close();
        }
    }

    /// Number of namespaces.
    pub fn len(&self) -> usize {
        self.namespaces.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if no namespace exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

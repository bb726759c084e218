//! In-memory configuration cache.
//!
//! The store maps namespace names to immutable [`Namespace`] values. Writers
//! swap a whole `Arc<Namespace>` under a short write lock, so readers on any
//! thread observe either the previous or the new key set for a namespace and
//! never a mix of both.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use time::OffsetDateTime;

use crate::error::ClientError;
use crate::namespace::Namespace;

/// Namespace name → key → value view returned by [`ConfigStore::get_all`].
pub type NamespaceMap = BTreeMap<String, BTreeMap<String, String>>;

/// Shared configuration cache with typed getters.
#[derive(Debug)]
pub struct ConfigStore {
    default_namespace: String,
    namespaces: RwLock<HashMap<String, Arc<Namespace>>>,
}

impl ConfigStore {
    /// Creates an empty store whose unscoped getters read `default_namespace`.
    pub fn new(default_namespace: impl Into<String>) -> Self {
        Self {
            default_namespace: default_namespace.into(),
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// Namespace read by the unscoped getters.
    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    /// Returns the current state of a namespace, if it has been synced.
    pub fn namespace(&self, name: &str) -> Option<Arc<Namespace>> {
        let guard = match self.namespaces.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(name).cloned()
    }

    /// Returns a namespace's key mapping, empty when it is not synced yet.
    pub fn get_namespace(&self, name: &str) -> BTreeMap<String, String> {
        self.namespace(name)
            .map(|namespace| namespace.configurations().clone())
            .unwrap_or_default()
    }

    /// Returns every namespace's key mapping.
    pub fn get_all(&self) -> NamespaceMap {
        let guard = match self.namespaces.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .iter()
            .map(|(name, namespace)| (name.clone(), namespace.configurations().clone()))
            .collect()
    }

    /// Names of every namespace currently held.
    pub fn namespace_names(&self) -> Vec<String> {
        let guard = match self.namespaces.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut names: Vec<String> = guard.keys().cloned().collect();
        names.sort();
        names
    }

    /// Raw value of `key` in the default namespace.
    pub fn get(&self, key: &str) -> Option<String> {
        self.get_in(&self.default_namespace, key)
    }

    /// Alias of [`ConfigStore::get`].
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get_string_in(&self.default_namespace, key)
    }

    /// `key` parsed as a number; an unparsable value is a type error.
    pub fn get_number(&self, key: &str) -> Result<Option<f64>, ClientError> {
        self.get_number_in(&self.default_namespace, key)
    }

    /// `key` parsed as `true` / `false`, case-insensitively.
    pub fn get_boolean(&self, key: &str) -> Result<Option<bool>, ClientError> {
        self.get_boolean_in(&self.default_namespace, key)
    }

    /// `key` parsed as a JSON value.
    pub fn get_json(&self, key: &str) -> Result<Option<Value>, ClientError> {
        self.get_json_in(&self.default_namespace, key)
    }

    /// `key` parsed as an RFC 3339 timestamp or unix milliseconds.
    pub fn get_date(&self, key: &str) -> Result<Option<OffsetDateTime>, ClientError> {
        self.get_date_in(&self.default_namespace, key)
    }

    /// Raw value of `key` in `namespace`; `None` when either is unknown.
    pub fn get_in(&self, namespace: &str, key: &str) -> Option<String> {
        self.namespace(namespace)
            .and_then(|namespace| namespace.get_string(key))
    }

    pub fn get_string_in(&self, namespace: &str, key: &str) -> Option<String> {
        self.get_in(namespace, key)
    }

    pub fn get_number_in(&self, namespace: &str, key: &str) -> Result<Option<f64>, ClientError> {
        match self.namespace(namespace) {
            Some(namespace) => namespace.get_number(key),
            None => Ok(None),
        }
    }

    pub fn get_boolean_in(&self, namespace: &str, key: &str) -> Result<Option<bool>, ClientError> {
        match self.namespace(namespace) {
            Some(namespace) => namespace.get_boolean(key),
            None => Ok(None),
        }
    }

    pub fn get_json_in(&self, namespace: &str, key: &str) -> Result<Option<Value>, ClientError> {
        match self.namespace(namespace) {
            Some(namespace) => namespace.get_json(key),
            None => Ok(None),
        }
    }

    pub fn get_date_in(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<OffsetDateTime>, ClientError> {
        match self.namespace(namespace) {
            Some(namespace) => namespace.get_date(key),
            None => Ok(None),
        }
    }

    /// Replaces a namespace wholesale and returns the installed value.
    pub(crate) fn install(&self, namespace: Namespace) -> Arc<Namespace> {
        let namespace = Arc::new(namespace);
        let mut guard = match self.namespaces.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.insert(namespace.name().to_string(), Arc::clone(&namespace));
        namespace
    }

    /// Installs `namespace` only when nothing is held under its name yet.
    pub(crate) fn install_if_absent(&self, namespace: Namespace) -> bool {
        let mut guard = match self.namespaces.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.contains_key(namespace.name()) {
            return false;
        }
        guard.insert(namespace.name().to_string(), Arc::new(namespace));
        true
    }
}

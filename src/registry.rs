//! Typed string-keyed registries
//!
//! Filters, actions, and resource managers are all extended the same way:
//! implementations are registered under a string key at process
//! initialization and looked up by key when a policy is compiled. Each
//! resource type owns independent filter and action registries, so an
//! `rds-cluster` `delete` never collides with a `delete` on another type.
//!
//! Registries are built once inside `OnceLock` initializers and never
//! mutated afterwards. Registering the same key twice is an error, not a
//! silent override.

use crate::error::EngineError;
use std::collections::BTreeMap;

/// A named mapping from string keys to registered entries.
#[derive(Debug)]
pub struct Registry<T> {
    name: String,
    entries: BTreeMap<String, T>,
}

impl<T> Registry<T> {
    /// Create an empty registry. The name is used in error messages,
    /// e.g. `"rds-cluster.filters"`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: BTreeMap::new(),
        }
    }

    /// The registry's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register an entry under `key`. Fails if the key is already taken.
    pub fn register(&mut self, key: impl Into<String>, entry: T) -> Result<(), EngineError> {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return Err(EngineError::DuplicateKey {
                registry: self.name.clone(),
                key,
            });
        }
        self.entries.insert(key, entry);
        Ok(())
    }

    /// Look up an entry by key.
    pub fn get(&self, key: &str) -> Result<&T, EngineError> {
        self.entries.get(key).ok_or_else(|| EngineError::UnknownType {
            registry: self.name.clone(),
            key: key.to_string(),
            known: self.keys().iter().map(|k| k.to_string()).collect(),
        })
    }

    /// Whether `key` is registered.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// All registered keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

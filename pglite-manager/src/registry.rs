// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::config::Configuration;
use crate::error::Result;
use crate::supervisor::Supervisor;
use log::debug;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// A supervisor shared between callers; the lock serializes start/stop on it.
pub type SharedSupervisor = Arc<tokio::sync::Mutex<Supervisor>>;

/// Keyed collection of supervisors. Removing an entry does not stop it.
#[derive(Default)]
pub struct Registry {
    entries: Mutex<BTreeMap<String, SharedSupervisor>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, SharedSupervisor>> {
        // The map stays consistent even if a holder panicked.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the supervisor stored under `key`, creating it from `factory` if absent.
    /// `factory` only runs when the key is new, and its error leaves the registry untouched.
    pub fn get_or_create<F>(&self, key: &str, factory: F) -> Result<SharedSupervisor>
    where
        F: FnOnce() -> Result<Configuration>,
    {
        let mut entries = self.entries();
        if let Some(existing) = entries.get(key) {
            return Ok(Arc::clone(existing));
        }
        let supervisor = Arc::new(tokio::sync::Mutex::new(Supervisor::new(factory()?)));
        entries.insert(key.to_string(), Arc::clone(&supervisor));
        debug!("registered supervisor '{key}'");
        Ok(supervisor)
    }

    pub fn get(&self, key: &str) -> Option<SharedSupervisor> {
        self.entries().get(key).cloned()
    }

    /// Drop the entry. The caller is responsible for stopping it first.
    pub fn remove(&self, key: &str) -> Option<SharedSupervisor> {
        let removed = self.entries().remove(key);
        if removed.is_some() {
            debug!("removed supervisor '{key}'");
        }
        removed
    }

    /// Exact key first, then the first key (in key order) containing `alias`.
    pub fn find_by_partial_key(&self, alias: &str) -> Option<(String, SharedSupervisor)> {
        let entries = self.entries();
        if let Some(exact) = entries.get(alias) {
            return Some((alias.to_string(), Arc::clone(exact)));
        }
        entries
            .iter()
            .find(|(key, _)| key.contains(alias))
            .map(|(key, sup)| (key.clone(), Arc::clone(sup)))
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tcp_config() -> Result<Configuration> {
        Configuration::builder().tcp("127.0.0.1", 15555).build()
    }

    #[test]
    fn test_get_or_create_reuses_instance() {
        let registry = Registry::new();
        let calls = AtomicUsize::new(0);
        let factory = || {
            calls.fetch_add(1, Ordering::SeqCst);
            tcp_config()
        };

        let first = registry.get_or_create("db1", factory).unwrap();
        let second = registry.get_or_create("db1", factory).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_keys_get_distinct_supervisors() {
        let registry = Registry::new();
        let a = registry.get_or_create("a", tcp_config).unwrap();
        let b = registry.get_or_create("b", tcp_config).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.keys(), ["a", "b"]);
    }

    #[test]
    fn test_factory_error_is_not_stored() {
        let registry = Registry::new();
        let err = registry
            .get_or_create("bad", || Configuration::builder().tcp("127.0.0.1", 0).build())
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidConfig { field: "tcp_port", .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_returns_entry() {
        let registry = Registry::new();
        let created = registry.get_or_create("db1", tcp_config).unwrap();
        let removed = registry.remove("db1").unwrap();
        assert!(Arc::ptr_eq(&created, &removed));
        assert!(registry.remove("db1").is_none());
        assert!(registry.get("db1").is_none());

        let recreated = registry.get_or_create("db1", tcp_config).unwrap();
        assert!(!Arc::ptr_eq(&created, &recreated));
    }

    #[test]
    fn test_find_by_partial_key_prefers_exact() {
        let registry = Registry::new();
        let exact = registry.get_or_create("db", tcp_config).unwrap();
        registry.get_or_create("a-db-session", tcp_config).unwrap();

        let (key, found) = registry.find_by_partial_key("db").unwrap();
        assert_eq!(key, "db");
        assert!(Arc::ptr_eq(&exact, &found));
    }

    #[test]
    fn test_find_by_partial_key_substring_in_key_order() {
        let registry = Registry::new();
        registry.get_or_create("worker-2-pglite", tcp_config).unwrap();
        let first = registry.get_or_create("worker-1-pglite", tcp_config).unwrap();

        let (key, found) = registry.find_by_partial_key("pglite").unwrap();
        assert_eq!(key, "worker-1-pglite");
        assert!(Arc::ptr_eq(&first, &found));
        assert!(registry.find_by_partial_key("mysql").is_none());
    }

    #[test]
    fn test_registries_are_independent() {
        let one = Registry::new();
        let two = Registry::new();
        one.get_or_create("db1", tcp_config).unwrap();
        assert!(two.get("db1").is_none());
    }

    #[test]
    fn test_concurrent_get_or_create() {
        let registry = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.get_or_create("shared", tcp_config).unwrap())
            })
            .collect();
        let supervisors: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(supervisors.iter().all(|s| Arc::ptr_eq(s, &supervisors[0])));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_shared_supervisor_lock() {
        let registry = Registry::new();
        let shared = registry.get_or_create("db1", tcp_config).unwrap();
        let mut sup = shared.lock().await;
        assert!(!sup.is_running());
        assert!(shared.try_lock().is_err(), "held lock serializes callers");
        sup.stop().await;
    }
}

//! Process-local adapter registry.
//!
//! Built once at startup and immutable afterwards, so lookups take no lock.

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::ProviderAdapter;

/// Name-keyed map of registered adapters.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<&'static str, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its canonical name.
    ///
    /// Registration happens during startup only; a duplicate name replaces
    /// the earlier adapter.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.name(), adapter);
    }

    /// Look up an adapter by provider name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(name).cloned()
    }

    /// Registered provider names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.adapters.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Number of registered adapters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::GoogleCalendarAdapter;
    use crate::gmail::GmailAdapter;
    use crate::types::ProviderCredentials;

    fn credentials() -> ProviderCredentials {
        ProviderCredentials {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
        }
    }

    fn full_registry() -> AdapterRegistry {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(GmailAdapter::new(credentials())));
        registry.register(Arc::new(GoogleCalendarAdapter::new(credentials())));
        registry
    }

    #[test]
    fn test_lookup_by_name() {
        let registry = full_registry();
        assert!(registry.get("gmail").is_some());
        assert!(registry.get("google-calendar").is_some());
        assert!(registry.get("outlook").is_none());
    }

    #[test]
    fn test_names_sorted() {
        let registry = full_registry();
        assert_eq!(registry.names(), vec!["gmail", "google-calendar"]);
        assert_eq!(registry.len(), 2);
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_adapter_categories() {
        let registry = full_registry();
        assert_eq!(registry.get("gmail").unwrap().category(), "mail");
        assert_eq!(
            registry.get("google-calendar").unwrap().category(),
            "calendar"
        );
    }
}

//! Service Registry (component 4.9): service-type -> provider
//! implementations, with late-bound [`ServiceReference`] handles and an
//! optional permission predicate gating registration.
//!
//! Grounded on the Meridian `PluginManager`'s hook/manager registration
//! pattern (`other_examples` meridian-plugin.rs) for the provider-map shape,
//! and `connector/error_code_registry.rs`'s duplicate-registration error
//! convention.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("service {service_type} already registered by provider {provider_id}")]
    AlreadyRegistered {
        service_type: String,
        provider_id: String,
    },
    #[error("provider {provider_id} denied permission to register {service_type}")]
    PermissionDenied {
        service_type: String,
        provider_id: String,
    },
}

impl ServiceError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRegistered { .. } => "PLUGIN_SERVICE_ALREADY_REGISTERED",
            Self::PermissionDenied { .. } => "PLUGIN_SERVICE_PERMISSION_DENIED",
        }
    }
}

type PermissionPredicate = dyn Fn(&str) -> bool + Send + Sync;

pub struct ServiceRegistry<T> {
    providers: RwLock<HashMap<String, HashMap<String, Arc<T>>>>,
    permission_predicate: Option<Box<PermissionPredicate>>,
}

impl<T> Default for ServiceRegistry<T> {
    fn default() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            permission_predicate: None,
        }
    }
}

impl<T> ServiceRegistry<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_permission_predicate<F>(predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            providers: RwLock::new(HashMap::new()),
            permission_predicate: Some(Box::new(predicate)),
        }
    }

    pub fn register(
        &self,
        service_type: &str,
        provider_id: &str,
        implementation: T,
    ) -> Result<(), ServiceError> {
        if let Some(predicate) = &self.permission_predicate {
            if !predicate(provider_id) {
                return Err(ServiceError::PermissionDenied {
                    service_type: service_type.to_string(),
                    provider_id: provider_id.to_string(),
                });
            }
        }
        let mut guard = self.providers.write().expect("service registry poisoned");
        let providers = guard.entry(service_type.to_string()).or_default();
        if providers.contains_key(provider_id) {
            return Err(ServiceError::AlreadyRegistered {
                service_type: service_type.to_string(),
                provider_id: provider_id.to_string(),
            });
        }
        providers.insert(provider_id.to_string(), Arc::new(implementation));
        Ok(())
    }

    #[must_use]
    pub fn services(&self, service_type: &str) -> Vec<Arc<T>> {
        let guard = self.providers.read().expect("service registry poisoned");
        guard
            .get(service_type)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn service(&self, service_type: &str, provider_id: &str) -> Option<Arc<T>> {
        let guard = self.providers.read().expect("service registry poisoned");
        guard.get(service_type)?.get(provider_id).cloned()
    }

    #[must_use]
    pub fn any_service(&self, service_type: &str) -> Option<Arc<T>> {
        let guard = self.providers.read().expect("service registry poisoned");
        guard.get(service_type)?.values().next().cloned()
    }

    #[must_use]
    pub fn has(&self, service_type: &str) -> bool {
        let guard = self.providers.read().expect("service registry poisoned");
        guard.get(service_type).is_some_and(|m| !m.is_empty())
    }

    #[must_use]
    pub fn providers(&self, service_type: &str) -> Vec<String> {
        let guard = self.providers.read().expect("service registry poisoned");
        guard
            .get(service_type)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn provider_count(&self, service_type: &str) -> usize {
        let guard = self.providers.read().expect("service registry poisoned");
        guard.get(service_type).map_or(0, HashMap::len)
    }

    #[must_use]
    pub fn service_type_count(&self) -> usize {
        let guard = self.providers.read().expect("service registry poisoned");
        guard.len()
    }

    pub fn unregister_all(&self, provider_id: &str) {
        let mut guard = self.providers.write().expect("service registry poisoned");
        for providers in guard.values_mut() {
            providers.remove(provider_id);
        }
        guard.retain(|_, providers| !providers.is_empty());
    }

    #[must_use]
    pub fn reference(self: &Arc<Self>, service_type: &str) -> ServiceReference<T> {
        ServiceReference {
            registry: Arc::clone(self),
            service_type: service_type.to_string(),
        }
    }
}

/// A late-binding handle: resolves against the registry's current state on
/// every call rather than capturing a snapshot at construction time.
pub struct ServiceReference<T> {
    registry: Arc<ServiceRegistry<T>>,
    service_type: String,
}

impl<T> ServiceReference<T> {
    #[must_use]
    pub fn get(&self) -> Option<Arc<T>> {
        self.registry.any_service(&self.service_type)
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.registry.has(&self.service_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_provider_registration_for_same_type_is_rejected() {
        let registry: ServiceRegistry<&str> = ServiceRegistry::new();
        registry.register("tax.calculator", "acme", "impl-1").unwrap();
        let err = registry.register("tax.calculator", "acme", "impl-2").unwrap_err();
        assert_eq!(err.code(), "PLUGIN_SERVICE_ALREADY_REGISTERED");
    }

    #[test]
    fn different_providers_can_register_same_type() {
        let registry: ServiceRegistry<&str> = ServiceRegistry::new();
        registry.register("tax.calculator", "acme", "impl-1").unwrap();
        registry.register("tax.calculator", "globex", "impl-2").unwrap();
        assert_eq!(registry.provider_count("tax.calculator"), 2);
    }

    #[test]
    fn permission_predicate_denies_registration() {
        let registry: ServiceRegistry<&str> =
            ServiceRegistry::with_permission_predicate(|id| id == "trusted-bundle");
        let err = registry.register("tax.calculator", "sketchy-bundle", "impl").unwrap_err();
        assert_eq!(err.code(), "PLUGIN_SERVICE_PERMISSION_DENIED");
        assert!(registry.register("tax.calculator", "trusted-bundle", "impl").is_ok());
    }

    #[test]
    fn unregister_all_removes_every_type_for_provider() {
        let registry: ServiceRegistry<&str> = ServiceRegistry::new();
        registry.register("a", "acme", "impl-a").unwrap();
        registry.register("b", "acme", "impl-b").unwrap();
        registry.unregister_all("acme");
        assert!(!registry.has("a"));
        assert!(!registry.has("b"));
    }

    #[test]
    fn reference_resolves_against_live_state() {
        let registry: Arc<ServiceRegistry<&str>> = Arc::new(ServiceRegistry::new());
        let reference = registry.reference("tax.calculator");
        assert!(!reference.is_available());
        registry.register("tax.calculator", "acme", "impl").unwrap();
        assert!(reference.is_available());
        assert_eq!(reference.get().map(|s| *s), Some("impl"));
    }
}

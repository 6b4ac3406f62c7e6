//! Descriptor Registry (component 4.5): the single owner of bundle
//! containers, keyed by id, with thread-safe snapshot reads.
//!
//! Grounded on the query-method surface of `connector/device_profile.rs`
//! and `connector/error_code_registry.rs` (a `HashMap`-backed registry with
//! a handful of filtered-read helpers), adapted to own full bundle
//! lifecycle state rather than static profile data.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::context::BundleContext;
use crate::error::PluginError;
use crate::version::Version;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleDescriptor {
    pub id: String,
    pub human_name: String,
    pub version: Version,
    pub summary: String,
    pub author: String,
    pub min_host_version: Version,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyDeclaration {
    pub target_id: String,
    pub range: crate::version::Range,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Discovered,
    Loaded,
    Enabled,
    Disabled,
    Failed(String),
    Unloaded,
}

impl LifecycleState {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Discovered => "Discovered",
            Self::Loaded => "Loaded",
            Self::Enabled => "Enabled",
            Self::Disabled => "Disabled",
            Self::Failed(_) => "Failed",
            Self::Unloaded => "Unloaded",
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Loaded | Self::Enabled | Self::Disabled)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// The legal transition edges of the lifecycle state machine (component
/// design §3). `force_state` in [`BundleContainer`] is the only way around
/// this table, and it is test-only.
#[must_use]
pub fn is_legal_transition(from: &LifecycleState, to: &LifecycleState) -> bool {
    use LifecycleState::{Disabled, Discovered, Enabled, Failed, Loaded, Unloaded};
    matches!(
        (from, to),
        (Discovered, Loaded)
            | (Discovered, Failed(_))
            | (Loaded, Enabled)
            | (Loaded, Unloaded)
            | (Loaded, Failed(_))
            | (Enabled, Disabled)
            | (Disabled, Enabled)
            | (Disabled, Unloaded)
            | (Failed(_), Unloaded)
    )
}

#[derive(Debug, Clone)]
pub struct BundleContainer {
    pub descriptor: BundleDescriptor,
    pub dependencies: Vec<DependencyDeclaration>,
    pub state: LifecycleState,
    pub context: Option<BundleContext>,
    pub artifact_path: Option<std::path::PathBuf>,
}

impl BundleContainer {
    #[must_use]
    pub fn new(descriptor: BundleDescriptor, dependencies: Vec<DependencyDeclaration>) -> Self {
        Self {
            descriptor,
            dependencies,
            state: LifecycleState::Discovered,
            context: None,
            artifact_path: None,
        }
    }

    pub fn try_transition(&mut self, to: LifecycleState) -> Result<(), PluginError> {
        if !is_legal_transition(&self.state, &to) {
            return Err(PluginError::invalid_state_transition(
                self.descriptor.id.clone(),
                self.state.label(),
                to.label(),
            ));
        }
        self.state = to;
        Ok(())
    }

    /// Test-only escape hatch around the transition table.
    #[cfg(test)]
    pub fn force_state(&mut self, state: LifecycleState) {
        self.state = state;
    }
}

#[derive(Default)]
pub struct DescriptorRegistry {
    containers: RwLock<HashMap<String, BundleContainer>>,
}

impl DescriptorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert: replaces any existing entry with the same id.
    pub fn add(&self, container: BundleContainer) {
        let mut guard = self.containers.write().expect("descriptor registry poisoned");
        guard.insert(container.descriptor.id.clone(), container);
    }

    pub fn remove(&self, id: &str) -> Option<BundleContainer> {
        let mut guard = self.containers.write().expect("descriptor registry poisoned");
        guard.remove(id)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<BundleContainer> {
        let guard = self.containers.read().expect("descriptor registry poisoned");
        guard.get(id).cloned()
    }

    pub fn get_or_fail(&self, id: &str) -> Result<BundleContainer, PluginError> {
        self.get(id)
            .ok_or_else(|| PluginError::bundle_not_found(id))
    }

    /// Replaces the container for `id` via `f`, if present. Used by the
    /// Lifecycle Manager so transition application and storage happen
    /// under one write lock acquisition per call.
    pub fn mutate<F, T>(&self, id: &str, f: F) -> Result<T, PluginError>
    where
        F: FnOnce(&mut BundleContainer) -> Result<T, PluginError>,
    {
        let mut guard = self.containers.write().expect("descriptor registry poisoned");
        let container = guard
            .get_mut(id)
            .ok_or_else(|| PluginError::bundle_not_found(id))?;
        f(container)
    }

    #[must_use]
    pub fn all(&self) -> Vec<BundleContainer> {
        let guard = self.containers.read().expect("descriptor registry poisoned");
        guard.values().cloned().collect()
    }

    #[must_use]
    pub fn by_state<F>(&self, predicate: F) -> Vec<BundleContainer>
    where
        F: Fn(&LifecycleState) -> bool,
    {
        let guard = self.containers.read().expect("descriptor registry poisoned");
        guard
            .values()
            .filter(|c| predicate(&c.state))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn active(&self) -> Vec<BundleContainer> {
        self.by_state(LifecycleState::is_active)
    }

    /// Bundles currently `Loaded`, `Enabled`, or `Disabled` — i.e. holding a
    /// live `BundleContext`. Alias over [`active`](Self::active).
    #[must_use]
    pub fn loaded(&self) -> Vec<BundleContainer> {
        self.active()
    }

    /// Returns the first container matching `predicate`, if any.
    #[must_use]
    pub fn find<F>(&self, predicate: F) -> Option<BundleContainer>
    where
        F: Fn(&BundleContainer) -> bool,
    {
        let guard = self.containers.read().expect("descriptor registry poisoned");
        guard.values().find(|c| predicate(c)).cloned()
    }

    #[must_use]
    pub fn enabled(&self) -> Vec<BundleContainer> {
        self.by_state(|s| matches!(s, LifecycleState::Enabled))
    }

    #[must_use]
    pub fn failed(&self) -> Vec<BundleContainer> {
        self.by_state(|s| matches!(s, LifecycleState::Failed(_)))
    }

    #[must_use]
    pub fn state_histogram(&self) -> HashMap<&'static str, usize> {
        let guard = self.containers.read().expect("descriptor registry poisoned");
        let mut histogram = HashMap::new();
        for container in guard.values() {
            *histogram.entry(container.state.label()).or_insert(0) += 1;
        }
        histogram
    }

    pub fn clear(&self) {
        let mut guard = self.containers.write().expect("descriptor registry poisoned");
        guard.clear();
    }
}

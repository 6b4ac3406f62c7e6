//! Extension Registry (component 4.8): extension-type -> ordered
//! contributions, keyed by contributing bundle, with a pluggable conflict
//! resolution policy.
//!
//! Grounded on the matching/placement registry shape of
//! `connector/device_profile.rs`, generalized from a single placement
//! policy to the three-way `ConflictPolicy` this spec requires.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::PluginError;

pub const DEFAULT_BUNDLE_PRIORITY: i32 = 100;
pub const HOST_PRIORITY_CEILING: i32 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    PriorityOrder,
    RegistrationOrder,
    Alphabetical,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self::PriorityOrder
    }
}

#[derive(Debug, Clone)]
pub struct Contribution<T> {
    pub bundle_id: Option<String>,
    pub priority: i32,
    pub sort_key: String,
    pub value: T,
    sequence: u64,
}

struct TypeEntries<T> {
    contributions: Vec<Contribution<T>>,
}

impl<T> Default for TypeEntries<T> {
    fn default() -> Self {
        Self {
            contributions: Vec::new(),
        }
    }
}

pub struct ExtensionRegistry<T> {
    policy: ConflictPolicy,
    by_type: RwLock<HashMap<String, TypeEntries<T>>>,
    sequence: std::sync::atomic::AtomicU64,
}

impl<T: Clone> Default for ExtensionRegistry<T> {
    fn default() -> Self {
        Self::new(ConflictPolicy::default())
    }
}

impl<T: Clone> ExtensionRegistry<T> {
    #[must_use]
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            by_type: RwLock::new(HashMap::new()),
            sequence: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn register(
        &self,
        bundle_id: Option<&str>,
        extension_type: &str,
        priority: Option<i32>,
        sort_key: &str,
        value: T,
    ) -> Result<(), PluginError> {
        if extension_type.is_empty() {
            return Err(PluginError::NullArgument("extension_type"));
        }
        let sequence = self
            .sequence
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let priority = priority.unwrap_or(DEFAULT_BUNDLE_PRIORITY);
        let contribution = Contribution {
            bundle_id: bundle_id.map(str::to_string),
            priority,
            sort_key: sort_key.to_string(),
            value,
            sequence,
        };
        let mut guard = self.by_type.write().expect("extension registry poisoned");
        guard
            .entry(extension_type.to_string())
            .or_default()
            .contributions
            .push(contribution);
        Ok(())
    }

    /// Linear removal of the first contribution equal to `value` under
    /// `extension_type`. Returns whether anything was removed.
    pub fn unregister(&self, extension_type: &str, value: &T) -> bool
    where
        T: PartialEq,
    {
        let mut guard = self.by_type.write().expect("extension registry poisoned");
        let Some(entries) = guard.get_mut(extension_type) else {
            return false;
        };
        let Some(pos) = entries.contributions.iter().position(|c| &c.value == value) else {
            return false;
        };
        entries.contributions.remove(pos);
        true
    }

    pub fn unregister_all(&self, bundle_id: &str) -> usize {
        let mut guard = self.by_type.write().expect("extension registry poisoned");
        let mut removed = 0;
        for entries in guard.values_mut() {
            let before = entries.contributions.len();
            entries
                .contributions
                .retain(|c| c.bundle_id.as_deref() != Some(bundle_id));
            removed += before - entries.contributions.len();
        }
        removed
    }

    #[must_use]
    pub fn get(&self, extension_type: &str) -> Vec<T> {
        let guard = self.by_type.read().expect("extension registry poisoned");
        let Some(entries) = guard.get(extension_type) else {
            return Vec::new();
        };
        let mut ordered: Vec<&Contribution<T>> = entries.contributions.iter().collect();
        match self.policy {
            ConflictPolicy::PriorityOrder => {
                ordered.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.sequence.cmp(&b.sequence)));
            }
            ConflictPolicy::RegistrationOrder => {
                ordered.sort_by(|a, b| a.sequence.cmp(&b.sequence));
            }
            ConflictPolicy::Alphabetical => {
                ordered.sort_by(|a, b| a.sort_key.cmp(&b.sort_key));
            }
        }
        ordered.into_iter().map(|c| c.value.clone()).collect()
    }

    #[must_use]
    pub fn has(&self, extension_type: &str) -> bool {
        let guard = self.by_type.read().expect("extension registry poisoned");
        guard
            .get(extension_type)
            .is_some_and(|e| !e.contributions.is_empty())
    }

    #[must_use]
    pub fn count(&self, extension_type: &str) -> usize {
        let guard = self.by_type.read().expect("extension registry poisoned");
        guard.get(extension_type).map_or(0, |e| e.contributions.len())
    }

    #[must_use]
    pub fn types(&self) -> Vec<String> {
        let guard = self.by_type.read().expect("extension registry poisoned");
        guard.keys().cloned().collect()
    }

    #[must_use]
    pub fn total(&self) -> usize {
        let guard = self.by_type.read().expect("extension registry poisoned");
        guard.values().map(|e| e.contributions.len()).sum()
    }

    pub fn clear(&self) {
        let mut guard = self.by_type.write().expect("extension registry poisoned");
        guard.clear();
    }
}

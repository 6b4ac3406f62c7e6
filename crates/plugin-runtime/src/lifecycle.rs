//! Lifecycle Manager (component 4.7): drives every bundle through
//! discovery, load, enable, disable, unload and shutdown, isolating
//! per-bundle failures from the rest of the fleet.
//!
//! The staged, fixed-order execution with early-failure-and-continue
//! follows `connector/activation_pipeline.rs`'s `activate()`. The overall
//! method set (`initialize`/`enable`/`disable`/`unload`/`shutdown`) mirrors
//! the Meridian `PluginManager`'s `load_plugin`/`start_plugin`/
//! `stop_plugin`/`unload_plugin` (`other_examples` meridian-plugin.rs),
//! adapted to this spec's exact state machine and idempotency rules.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::context::{BundleContextBuilder, Permission};
use crate::error::PluginError;
use crate::extensions::ExtensionRegistry;
use crate::loader::BundleLoader;
use crate::registry::{BundleDescriptor, DependencyDeclaration, DescriptorRegistry, LifecycleState};
use crate::resolver::{self, ResolverError};
use crate::version::Version;

/// Callbacks a bundle may implement. The host constructs one of these per
/// bundle (commonly from a dynamically loaded artifact); this crate tests
/// the manager with a stub in-process implementation.
pub trait BundleLifecycleHooks: Send + Sync {
    fn on_load(&self, _bundle_id: &str) -> Result<(), String> {
        Ok(())
    }
    fn on_enable(&self, _bundle_id: &str) -> Result<(), String> {
        Ok(())
    }
    fn on_disable(&self, _bundle_id: &str) -> Result<(), String> {
        Ok(())
    }
    fn on_unload(&self, _bundle_id: &str) -> Result<(), String> {
        Ok(())
    }
}

/// A hooks implementation that always succeeds; the default for bundles
/// that declare no lifecycle behaviour of their own.
pub struct NoopHooks;
impl BundleLifecycleHooks for NoopHooks {}

pub struct LifecycleManager {
    host_version: Version,
    base_data_directory: PathBuf,
    loader: BundleLoader,
    registry: DescriptorRegistry,
    extensions: ExtensionRegistry<String>,
    hooks: HashMap<String, Box<dyn BundleLifecycleHooks>>,
    default_permissions: Vec<Permission>,
    initialized: AtomicBool,
    shutdown: AtomicBool,
    transition_lock: Mutex<()>,
}

pub struct InitializeReport {
    pub load_order: Vec<String>,
    pub blocked: std::collections::BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

impl LifecycleManager {
    #[must_use]
    pub fn new(
        host_version: Version,
        base_data_directory: PathBuf,
        loader: BundleLoader,
        default_permissions: Vec<Permission>,
    ) -> Self {
        Self {
            host_version,
            base_data_directory,
            loader,
            registry: DescriptorRegistry::new(),
            extensions: ExtensionRegistry::default(),
            hooks: HashMap::new(),
            default_permissions,
            initialized: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            transition_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    #[must_use]
    pub fn extensions(&self) -> &ExtensionRegistry<String> {
        &self.extensions
    }

    pub fn register_hooks(&mut self, bundle_id: &str, hooks: Box<dyn BundleLifecycleHooks>) {
        self.hooks.insert(bundle_id.to_string(), hooks);
    }

    fn hooks_for(&self, bundle_id: &str) -> &dyn BundleLifecycleHooks {
        self.hooks
            .get(bundle_id)
            .map(|b| b.as_ref())
            .unwrap_or(&NoopHooks)
    }

    /// Idempotent: discovers compatible bundles, resolves their dependency
    /// graph, and loads every bundle in topological order. Per-bundle
    /// failures (dependency block or `on_load` error) are recorded as
    /// `Failed` and do not stop the rest of the fleet. A cycle among
    /// otherwise-satisfiable bundles is a hard error for the whole call.
    pub fn initialize(&self) -> Result<InitializeReport, PluginError> {
        let _guard = self.transition_lock.lock().expect("lifecycle lock poisoned");
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(InitializeReport {
                load_order: self
                    .registry
                    .by_state(|s| matches!(s, LifecycleState::Loaded | LifecycleState::Enabled | LifecycleState::Disabled))
                    .into_iter()
                    .map(|c| c.descriptor.id)
                    .collect(),
                blocked: Default::default(),
                warnings: Vec::new(),
            });
        }

        let discovered = self.loader.discover_compatible(&self.host_version)?;
        let mut descriptors: HashMap<String, BundleDescriptor> = HashMap::new();
        let mut deps: HashMap<String, Vec<DependencyDeclaration>> = HashMap::new();

        for bundle in discovered {
            descriptors.insert(bundle.container.descriptor.id.clone(), bundle.container.descriptor.clone());
            deps.insert(bundle.container.descriptor.id.clone(), bundle.container.dependencies.clone());
            self.registry.add(bundle.container);
        }

        let resolution = match resolver::resolve(&descriptors, &deps) {
            Ok(r) => r,
            Err(ResolverError::CircularDependency { participants }) => {
                for id in &participants {
                    let _ = self.registry.mutate(id, |c| {
                        c.state = LifecycleState::Failed("circular dependency".to_string());
                        Ok(())
                    });
                }
                return Err(PluginError::circular_dependency(participants));
            }
        };

        for (id, reason) in &resolution.blocked {
            let _ = self.registry.mutate(id, |c| {
                c.state = LifecycleState::Failed(reason.clone());
                Ok(())
            });
        }

        for id in &resolution.load_order {
            self.load_one(id);
        }

        Ok(InitializeReport {
            load_order: resolution.load_order,
            blocked: resolution.blocked,
            warnings: resolution.warnings,
        })
    }

    fn load_one(&self, id: &str) {
        let permissions = self.default_permissions.clone();
        let result = self.registry.mutate(id, |container| {
            let context = BundleContextBuilder::new(self.host_version.clone(), self.base_data_directory.clone(), id)
                .with_permissions(permissions)
                .build()?;
            container.context = Some(context);
            container.try_transition(LifecycleState::Loaded)
        });

        if let Err(e) = result {
            tracing::warn!(bundle = id, error = %e, "bundle failed during load");
            let _ = self.registry.mutate(id, |c| {
                c.state = LifecycleState::Failed(e.to_string());
                Ok(())
            });
            return;
        }

        if let Err(cause) = self.hooks_for(id).on_load(id) {
            tracing::warn!(bundle = id, %cause, "on_load callback failed");
            let _ = self.registry.mutate(id, |c| {
                c.state = LifecycleState::Failed(cause);
                Ok(())
            });
        } else {
            tracing::info!(bundle = id, "bundle loaded");
        }
    }

    /// Re-discovers a single bundle from the loader and (re-)loads it,
    /// replacing any existing (e.g. `Unloaded`) entry in the registry. Used
    /// by the Hot Reloader's `disable -> unload -> load -> enable` sequence,
    /// since `Unloaded` has no legal transition back to `Loaded` in place.
    pub fn load(&self, id: &str) -> Result<(), PluginError> {
        let _guard = self.transition_lock.lock().expect("lifecycle lock poisoned");
        let discovered = self.loader.discover_compatible(&self.host_version)?;
        let bundle = discovered
            .into_iter()
            .find(|b| b.container.descriptor.id == id)
            .ok_or_else(|| PluginError::bundle_not_found(id))?;
        self.registry.add(bundle.container);
        self.load_one(id);
        Ok(())
    }

    /// Requires `Loaded` or `Disabled`. Idempotent on already-`Enabled`.
    pub fn enable(&self, id: &str) -> Result<(), PluginError> {
        let _guard = self.transition_lock.lock().expect("lifecycle lock poisoned");
        let current = self.registry.get_or_fail(id)?;
        if matches!(current.state, LifecycleState::Enabled) {
            return Ok(());
        }

        if let Err(cause) = self.hooks_for(id).on_enable(id) {
            return Err(PluginError::lifecycle_error(id, "enable", cause));
        }

        self.registry.mutate(id, |c| c.try_transition(LifecycleState::Enabled))?;
        tracing::info!(bundle = id, "bundle enabled");
        Ok(())
    }

    /// Requires `Enabled`. Idempotent on already-`Disabled`.
    pub fn disable(&self, id: &str) -> Result<(), PluginError> {
        let _guard = self.transition_lock.lock().expect("lifecycle lock poisoned");
        let current = self.registry.get_or_fail(id)?;
        if matches!(current.state, LifecycleState::Disabled) {
            return Ok(());
        }

        if let Err(cause) = self.hooks_for(id).on_disable(id) {
            return Err(PluginError::lifecycle_error(id, "disable", cause));
        }

        self.extensions.unregister_all(id);
        self.registry.mutate(id, |c| c.try_transition(LifecycleState::Disabled))?;
        tracing::info!(bundle = id, "bundle disabled");
        Ok(())
    }

    /// Requires `Loaded`, `Disabled`, or `Failed`. Calling on `Enabled`
    /// raises `InvalidStateTransition` rather than implicitly disabling
    /// first (see `DESIGN.md`'s Open Question decisions).
    pub fn unload(&self, id: &str) -> Result<(), PluginError> {
        let _guard = self.transition_lock.lock().expect("lifecycle lock poisoned");
        let current = self.registry.get_or_fail(id)?;
        if matches!(current.state, LifecycleState::Unloaded) {
            return Ok(());
        }

        if let Err(cause) = self.hooks_for(id).on_unload(id) {
            tracing::warn!(bundle = id, %cause, "on_unload callback failed; unloading anyway");
        }

        self.registry.mutate(id, |c| {
            c.context = None;
            c.try_transition(LifecycleState::Unloaded)
        })?;
        tracing::info!(bundle = id, "bundle unloaded");
        Ok(())
    }

    /// Idempotent: disables every `Enabled` bundle, then unloads every
    /// remaining active or failed bundle, then clears the registries.
    pub fn shutdown(&self) -> Result<(), PluginError> {
        let already = self.shutdown.swap(true, Ordering::SeqCst);
        if already {
            return Ok(());
        }

        for bundle in self.registry.enabled() {
            if let Err(e) = self.disable(&bundle.descriptor.id) {
                tracing::warn!(bundle = %bundle.descriptor.id, error = %e, "disable failed during shutdown");
            }
        }
        for bundle in self.registry.by_state(|s| {
            matches!(s, LifecycleState::Loaded | LifecycleState::Disabled | LifecycleState::Failed(_))
        }) {
            if let Err(e) = self.unload(&bundle.descriptor.id) {
                tracing::warn!(bundle = %bundle.descriptor.id, error = %e, "unload failed during shutdown");
            }
        }

        self.extensions.clear();
        self.registry.clear();
        Ok(())
    }
}

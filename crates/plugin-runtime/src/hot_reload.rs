//! Hot Reloader (component 4.12): watches registered bundle artifacts on
//! disk and drives a debounced `disable -> unload -> load -> enable` cycle
//! through the Lifecycle Manager.
//!
//! The watcher-thread-plus-debounce-map shape follows the fencio rule
//! engine's `hot_reload.rs` `DeploymentManager` (`other_examples`), trimmed
//! from its blue-green/canary/rollback machinery down to this spec's single
//! disable/unload/load/enable sequence; the panic-isolated callback dispatch
//! reuses `event_bus.rs`'s `run_isolated` pattern so a misbehaving listener
//! never wedges the watch thread.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notify::{Event as NotifyEvent, RecursiveMode, Watcher};

use crate::lifecycle::LifecycleManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadStatus {
    Started,
    Completed { success: bool },
}

pub trait ReloadListener: Send + Sync {
    fn on_event(&self, bundle_id: &str, status: ReloadStatus) {
        let _ = (bundle_id, status);
    }

    fn on_failed(&self, _bundle_id: &str, _cause: &str) {}
}

/// Optional per-bundle state preservation across a reload. Errors from
/// either method are caught and the reload proceeds without state.
pub trait StatePreservation: Send + Sync {
    fn retrieve_state(&self, bundle_id: &str) -> Result<Vec<u8>, String>;
    fn restore_state(&self, bundle_id: &str, state: Vec<u8>) -> Result<(), String>;
}

/// A host-supplied set of ad hoc string flags, mirroring how the demo CLI
/// passes knobs through to the runtime. Only the exact string `"true"`
/// enables hot reload.
#[derive(Debug, Clone, Default)]
pub struct HostFlags(pub HashMap<String, String>);

impl HostFlags {
    #[must_use]
    pub fn hotreload_enabled(&self) -> bool {
        self.0.get("plugin.hotreload").map(String::as_str) == Some("true")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HotReloadError {
    #[error("hot reload is disabled by host flags")]
    Disabled,
    #[error("watch path is not a directory: {0}")]
    InvalidWatchPath(PathBuf),
    #[error("filesystem watcher error: {0}")]
    Watcher(String),
}

impl HotReloadError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Disabled => "PLUGIN_HOTRELOAD_DISABLED",
            Self::InvalidWatchPath(_) => "PLUGIN_HOTRELOAD_INVALID_PATH",
            Self::Watcher(_) => "PLUGIN_HOTRELOAD_WATCHER_ERROR",
        }
    }
}

struct Registration {
    bundle_id: String,
    artifact_path: PathBuf,
}

struct Shared {
    registrations: Mutex<Vec<Registration>>,
    pending: Mutex<HashMap<String, Instant>>,
    debounce: Duration,
    running: AtomicBool,
}

pub struct HotReloader {
    manager: Arc<LifecycleManager>,
    shared: Arc<Shared>,
    listener: Arc<dyn ReloadListener>,
    state_preservation: Option<Arc<dyn StatePreservation>>,
    watch_handle: Mutex<Option<JoinHandle<()>>>,
    drain_handle: Mutex<Option<JoinHandle<()>>>,
    watcher: Mutex<Option<notify::RecommendedWatcher>>,
}

struct NoopListener;
impl ReloadListener for NoopListener {}

impl HotReloader {
    /// Returns `HotReloadError::Disabled` unless `flags.hotreload_enabled()`.
    pub fn new(
        manager: Arc<LifecycleManager>,
        flags: &HostFlags,
        debounce: Duration,
    ) -> Result<Self, HotReloadError> {
        if !flags.hotreload_enabled() {
            return Err(HotReloadError::Disabled);
        }
        let debounce = if debounce.is_zero() { Duration::from_millis(500) } else { debounce };
        Ok(Self {
            manager,
            shared: Arc::new(Shared {
                registrations: Mutex::new(Vec::new()),
                pending: Mutex::new(HashMap::new()),
                debounce,
                running: AtomicBool::new(false),
            }),
            listener: Arc::new(NoopListener),
            state_preservation: None,
            watch_handle: Mutex::new(None),
            drain_handle: Mutex::new(None),
            watcher: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn ReloadListener>) -> Self {
        self.listener = listener;
        self
    }

    #[must_use]
    pub fn with_state_preservation(mut self, preservation: Arc<dyn StatePreservation>) -> Self {
        self.state_preservation = Some(preservation);
        self
    }

    pub fn register(&self, bundle_id: &str, artifact_path: PathBuf) -> Result<(), HotReloadError> {
        if !artifact_path.is_dir() && artifact_path.parent().is_none_or(|p| !p.is_dir()) {
            return Err(HotReloadError::InvalidWatchPath(artifact_path));
        }
        let mut guard = self.shared.registrations.lock().expect("hot reloader poisoned");
        guard.retain(|r| r.bundle_id != bundle_id);
        guard.push(Registration {
            bundle_id: bundle_id.to_string(),
            artifact_path,
        });
        Ok(())
    }

    pub fn unregister(&self, bundle_id: &str) {
        let mut guard = self.shared.registrations.lock().expect("hot reloader poisoned");
        guard.retain(|r| r.bundle_id != bundle_id);
    }

    /// Idempotent, non-blocking: spawns the watch thread and a debounce
    /// timer thread if not already running.
    pub fn start(&self, watch_root: &std::path::Path) -> Result<(), HotReloadError> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if !watch_root.is_dir() {
            self.shared.running.store(false, Ordering::SeqCst);
            return Err(HotReloadError::InvalidWatchPath(watch_root.to_path_buf()));
        }

        let shared_for_watcher = Arc::clone(&self.shared);
        let (tx, rx) = std::sync::mpsc::channel::<notify::Result<NotifyEvent>>();
        let mut watcher = notify::recommended_watcher(move |event| {
            let _ = tx.send(event);
        })
        .map_err(|e| HotReloadError::Watcher(e.to_string()))?;
        watcher
            .watch(watch_root, RecursiveMode::Recursive)
            .map_err(|e| HotReloadError::Watcher(e.to_string()))?;
        *self.watcher.lock().expect("hot reloader poisoned") = Some(watcher);

        let watch_thread = thread::spawn(move || {
            while shared_for_watcher.running.load(Ordering::SeqCst) {
                match rx.recv_timeout(Duration::from_millis(200)) {
                    Ok(Ok(event)) => mark_pending(&shared_for_watcher, &event),
                    Ok(Err(_)) | Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                    Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        });
        *self.watch_handle.lock().expect("hot reloader poisoned") = Some(watch_thread);

        let shared_for_drain = Arc::clone(&self.shared);
        let manager = Arc::clone(&self.manager);
        let listener = Arc::clone(&self.listener);
        let state_preservation = self.state_preservation.clone();
        let drain_thread = thread::spawn(move || {
            while shared_for_drain.running.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(50));
                let ready: Vec<String> = {
                    let mut pending = shared_for_drain.pending.lock().expect("hot reloader poisoned");
                    let now = Instant::now();
                    let ready: Vec<String> = pending
                        .iter()
                        .filter(|(_, seen_at)| now.duration_since(**seen_at) >= shared_for_drain.debounce)
                        .map(|(id, _)| id.clone())
                        .collect();
                    for id in &ready {
                        pending.remove(id);
                    }
                    ready
                };
                for bundle_id in ready {
                    run_reload(&manager, &bundle_id, listener.as_ref(), state_preservation.as_deref());
                }
            }
        });
        *self.drain_handle.lock().expect("hot reloader poisoned") = Some(drain_thread);

        Ok(())
    }

    /// Idempotent: signals both background threads to stop at their next
    /// poll and joins them. In-flight reloads are allowed to complete.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(watcher) = self.watcher.lock().expect("hot reloader poisoned").take() {
            drop(watcher);
        }
        if let Some(handle) = self.watch_handle.lock().expect("hot reloader poisoned").take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.drain_handle.lock().expect("hot reloader poisoned").take() {
            let _ = handle.join();
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Directly runs the reload sequence for `bundle_id`, bypassing the
    /// filesystem watch. Exposed for hosts (and tests) that want to trigger
    /// a reload deterministically.
    pub fn reload_now(&self, bundle_id: &str) {
        run_reload(
            &self.manager,
            bundle_id,
            self.listener.as_ref(),
            self.state_preservation.as_deref(),
        );
    }
}

fn mark_pending(shared: &Shared, event: &NotifyEvent) {
    let registrations = shared.registrations.lock().expect("hot reloader poisoned");
    for path in &event.paths {
        for registration in registrations.iter() {
            if path.starts_with(&registration.artifact_path) {
                shared
                    .pending
                    .lock()
                    .expect("hot reloader poisoned")
                    .insert(registration.bundle_id.clone(), Instant::now());
            }
        }
    }
}

fn run_reload(
    manager: &LifecycleManager,
    bundle_id: &str,
    listener: &dyn ReloadListener,
    state_preservation: Option<&dyn StatePreservation>,
) {
    notify_listener(listener, bundle_id, ReloadStatus::Started);

    let preserved_state = state_preservation.and_then(|sp| {
        catch_unwind(AssertUnwindSafe(|| sp.retrieve_state(bundle_id)))
            .ok()
            .and_then(Result::ok)
    });

    let outcome = (|| -> Result<(), crate::error::PluginError> {
        manager.disable(bundle_id).or_else(|e| {
            if e.code() == "PLUGIN_LIFECYCLE_INVALID_TRANSITION" {
                Ok(())
            } else {
                Err(e)
            }
        })?;
        manager.unload(bundle_id)?;
        manager.load(bundle_id)?;
        manager.enable(bundle_id)?;
        Ok(())
    })();

    match outcome {
        Ok(()) => {
            if let (Some(sp), Some(state)) = (state_preservation, preserved_state) {
                if let Err(cause) = catch_unwind(AssertUnwindSafe(|| sp.restore_state(bundle_id, state)))
                    .unwrap_or_else(|_| Err("restore_state panicked".to_string()))
                {
                    tracing::warn!(bundle = bundle_id, %cause, "state restore failed after reload");
                }
            }
            notify_listener(listener, bundle_id, ReloadStatus::Completed { success: true });
        }
        Err(e) => {
            tracing::warn!(bundle = bundle_id, error = %e, "hot reload failed");
            listener.on_failed(bundle_id, &e.to_string());
            notify_listener(listener, bundle_id, ReloadStatus::Completed { success: false });
        }
    }
}

fn notify_listener(listener: &dyn ReloadListener, bundle_id: &str, status: ReloadStatus) {
    let result = catch_unwind(AssertUnwindSafe(|| listener.on_event(bundle_id, status)));
    if result.is_err() {
        tracing::warn!(bundle = bundle_id, "reload listener panicked; isolated");
    }
}

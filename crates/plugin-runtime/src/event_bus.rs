//! Event Bus (component 4.10): type-keyed pub/sub with thread affinity,
//! per-bundle subscription tracking, and handler-panic isolation.
//!
//! Grounded on the Meridian `PluginManager`'s `HookManager::trigger` pattern
//! (`other_examples` meridian-plugin.rs), generalized to the three-way
//! affinity model of the component design and SPEC_FULL §5's mapping of
//! "Background" affinity onto a small `std::thread`-backed pool, matching
//! the teacher's general preference for explicit, dependency-light
//! concurrency over pulling in a full async runtime for this crate.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadAffinity {
    Background,
    UiThread,
    CallerThread,
}

#[derive(Clone)]
pub struct Event {
    pub event_type: String,
    pub payload: Arc<dyn std::any::Any + Send + Sync>,
}

impl Event {
    #[must_use]
    pub fn new<T: std::any::Any + Send + Sync>(event_type: &str, payload: T) -> Self {
        Self {
            event_type: event_type.to_string(),
            payload: Arc::new(payload),
        }
    }
}

type Handler = dyn Fn(&Event) + Send + Sync;

struct Subscription {
    id: u64,
    event_type: String,
    handler: Arc<Handler>,
    affinity: ThreadAffinity,
    bundle_id: Option<String>,
    active: AtomicBool,
}

pub struct SubscriptionHandle {
    id: u64,
}

impl SubscriptionHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

type DispatchJob = (Arc<Subscription>, Event);

/// One persistent worker thread per affinity, fed by an `mpsc` channel. A
/// single thread draining its channel strictly in send order is what gives
/// "Background"/"UiThread" delivery its per-subscriber publication-order
/// guarantee; a bare `thread::spawn` per event cannot promise that, since
/// the OS scheduler may run two spawned threads in either order.
struct DispatchQueues {
    background: Mutex<Option<Sender<DispatchJob>>>,
    ui_thread: Mutex<Option<Sender<DispatchJob>>>,
}

impl DispatchQueues {
    fn new() -> Self {
        Self {
            background: Mutex::new(Some(spawn_dispatch_worker())),
            ui_thread: Mutex::new(Some(spawn_dispatch_worker())),
        }
    }
}

fn spawn_dispatch_worker() -> Sender<DispatchJob> {
    let (tx, rx) = mpsc::channel::<DispatchJob>();
    thread::spawn(move || {
        for (subscription, event) in rx {
            run_isolated(&subscription, &event);
        }
    });
    tx
}

fn enqueue(slot: &Mutex<Option<Sender<DispatchJob>>>, subscription: &Arc<Subscription>, event: Event) {
    let guard = slot.lock().expect("event bus poisoned");
    if let Some(tx) = guard.as_ref() {
        let _ = tx.send((Arc::clone(subscription), event));
    }
}

pub struct EventBus {
    subscriptions: RwLock<HashMap<String, Vec<Arc<Subscription>>>>,
    by_bundle: RwLock<HashMap<String, Vec<u64>>>,
    next_id: AtomicU64,
    shutdown: AtomicBool,
    queues: DispatchQueues,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            by_bundle: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
            queues: DispatchQueues::new(),
        }
    }

    pub fn subscribe<F>(
        &self,
        event_type: &str,
        handler: F,
        affinity: ThreadAffinity,
        bundle_id: Option<&str>,
    ) -> Option<SubscriptionHandle>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        if self.shutdown.load(Ordering::SeqCst) {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let subscription = Arc::new(Subscription {
            id,
            event_type: event_type.to_string(),
            handler: Arc::new(handler),
            affinity,
            bundle_id: bundle_id.map(str::to_string),
            active: AtomicBool::new(true),
        });

        self.subscriptions
            .write()
            .expect("event bus poisoned")
            .entry(event_type.to_string())
            .or_default()
            .push(Arc::clone(&subscription));

        if let Some(bundle_id) = bundle_id {
            self.by_bundle
                .write()
                .expect("event bus poisoned")
                .entry(bundle_id.to_string())
                .or_default()
                .push(id);
        }

        Some(SubscriptionHandle { id })
    }

    /// Snapshots the subscriber list for `event.event_type` and dispatches
    /// to each according to its affinity. A no-op after `shutdown`.
    pub fn publish(&self, event: Event) {
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let snapshot: Vec<Arc<Subscription>> = {
            let guard = self.subscriptions.read().expect("event bus poisoned");
            guard
                .get(&event.event_type)
                .map(|subs| subs.iter().filter(|s| s.active.load(Ordering::SeqCst)).cloned().collect())
                .unwrap_or_default()
        };

        for subscription in snapshot {
            self.dispatch_one(&subscription, event.clone());
        }
    }

    pub fn unsubscribe_all(&self, bundle_id: &str) {
        let ids = {
            let mut by_bundle = self.by_bundle.write().expect("event bus poisoned");
            by_bundle.remove(bundle_id).unwrap_or_default()
        };
        if ids.is_empty() {
            return;
        }
        let guard = self.subscriptions.read().expect("event bus poisoned");
        for subs in guard.values() {
            for sub in subs {
                if ids.contains(&sub.id) {
                    sub.active.store(false, Ordering::SeqCst);
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let mut guard = self.subscriptions.write().expect("event bus poisoned");
        guard.clear();
        self.by_bundle.write().expect("event bus poisoned").clear();
        // Dropping the sender closes the channel; each worker thread drains
        // whatever was already queued, then exits on its own.
        self.queues.background.lock().expect("event bus poisoned").take();
        self.queues.ui_thread.lock().expect("event bus poisoned").take();
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Runs `subscription`'s handler per its affinity, isolating panics so
    /// one bad handler never blocks delivery to any other subscriber.
    fn dispatch_one(&self, subscription: &Arc<Subscription>, event: Event) {
        match subscription.affinity {
            ThreadAffinity::CallerThread => run_isolated(subscription, &event),
            ThreadAffinity::Background => enqueue(&self.queues.background, subscription, event),
            // This crate has no real UI thread to hand off to; model the
            // affinity as a second named dispatch queue, distinct from
            // Background, so the two affinities never interleave on the
            // same worker.
            ThreadAffinity::UiThread => enqueue(&self.queues.ui_thread, subscription, event),
        }
    }
}

fn run_isolated(subscription: &Subscription, event: &Event) {
    let handler = Arc::clone(&subscription.handler);
    let event = event.clone();
    let result = catch_unwind(AssertUnwindSafe(|| (handler)(&event)));
    if let Err(panic) = result {
        let message = panic
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("<non-string panic payload>");
        tracing::warn!(
            event_type = %event.event_type,
            subscriber = subscription.bundle_id.as_deref().unwrap_or("<host>"),
            %message,
            "event handler panicked; isolated from other subscribers"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn caller_thread_handler_runs_synchronously() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        bus.subscribe(
            "bundle.loaded",
            move |_| {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            },
            ThreadAffinity::CallerThread,
            None,
        );
        bus.publish(Event::new("bundle.loaded", ()));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn one_handler_panicking_does_not_block_others() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            "evt",
            |_| panic!("boom"),
            ThreadAffinity::CallerThread,
            None,
        );
        let seen_clone = Arc::clone(&seen);
        bus.subscribe(
            "evt",
            move |_| {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            },
            ThreadAffinity::CallerThread,
            None,
        );
        bus.publish(Event::new("evt", ()));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_all_deactivates_bundle_subscriptions() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        bus.subscribe(
            "evt",
            move |_| {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            },
            ThreadAffinity::CallerThread,
            Some("bundle-a"),
        );
        bus.unsubscribe_all("bundle-a");
        bus.publish(Event::new("evt", ()));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn publish_after_shutdown_is_silent_noop() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        bus.subscribe(
            "evt",
            move |_| {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            },
            ThreadAffinity::CallerThread,
            None,
        );
        bus.shutdown();
        bus.publish(Event::new("evt", ()));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn subscribe_after_shutdown_returns_none() {
        let bus = EventBus::new();
        bus.shutdown();
        let handle = bus.subscribe("evt", |_| {}, ThreadAffinity::CallerThread, None);
        assert!(handle.is_none());
    }

    #[test]
    fn background_handler_preserves_publication_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        bus.subscribe(
            "evt",
            move |e| {
                let n = *e.payload.downcast_ref::<usize>().unwrap();
                seen_clone.lock().expect("test mutex poisoned").push(n);
            },
            ThreadAffinity::Background,
            None,
        );

        for i in 0..20 {
            bus.publish(Event::new("evt", i));
        }

        for _ in 0..100 {
            if seen.lock().expect("test mutex poisoned").len() == 20 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(*seen.lock().expect("test mutex poisoned"), (0..20).collect::<Vec<usize>>());
    }

    #[test]
    fn background_handler_eventually_runs() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        bus.subscribe(
            "evt",
            move |_| {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            },
            ThreadAffinity::Background,
            None,
        );
        bus.publish(Event::new("evt", ()));
        for _ in 0..50 {
            if seen.load(Ordering::SeqCst) == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}

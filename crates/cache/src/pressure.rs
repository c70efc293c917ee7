//! Memory pressure broadcasting
//!
//! A single broadcaster is initialised at process start with
//! [`MemoryPressureBroadcaster::init_global`]. Subsystems that own caches
//! subscribe and keep the returned [`Subscription`] alive for as long as they
//! exist; dropping the subscription removes the listener.
//!
//! Listeners are held weakly and invoked synchronously, in subscription
//! order, on a snapshot taken when the pass starts. A listener that errors or
//! panics is logged and skipped; the rest of the pass continues.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

/// Identifier handed out for each subscription
pub type ListenerId = u64;

/// A listener could not release what it was asked to release
#[derive(Debug, thiserror::Error)]
#[error("failed to release memory: {0}")]
pub struct ReleaseError(pub String);

/// Something that holds memory it can drop on request
pub trait MemoryPressureListener: Send + Sync {
    /// Release non-essential caches.
    fn did_receive_memory_warning(&self) -> Result<(), ReleaseError>;
}

/// Outcome of a single notification pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PressureReport {
    /// Listeners that were invoked
    pub notified: usize,
    /// Invoked listeners that returned an error or panicked
    pub failed: usize,
    /// Registrations whose listener had already been dropped
    pub dropped: usize,
}

struct Registration {
    id: ListenerId,
    listener: Weak<dyn MemoryPressureListener>,
}

struct BroadcasterState {
    next_id: ListenerId,
    listeners: Vec<Registration>,
}

static GLOBAL: OnceLock<MemoryPressureBroadcaster> = OnceLock::new();

/// Fan-out of memory warnings to registered listeners
///
/// Cloning yields another handle to the same listener set.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use looseleaf_cache::{MemoryPressureBroadcaster, MemoryPressureListener, ReleaseError};
///
/// struct Counter(AtomicUsize);
///
/// impl MemoryPressureListener for Counter {
///     fn did_receive_memory_warning(&self) -> Result<(), ReleaseError> {
///         self.0.fetch_add(1, Ordering::SeqCst);
///         Ok(())
///     }
/// }
///
/// let broadcaster = MemoryPressureBroadcaster::new();
/// let counter = Arc::new(Counter(AtomicUsize::new(0)));
/// let subscription = broadcaster.subscribe(&counter);
///
/// broadcaster.notify_pressure();
/// assert_eq!(counter.0.load(Ordering::SeqCst), 1);
///
/// drop(subscription);
/// broadcaster.notify_pressure();
/// assert_eq!(counter.0.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone)]
pub struct MemoryPressureBroadcaster {
    state: Arc<Mutex<BroadcasterState>>,
}

impl MemoryPressureBroadcaster {
    /// Create an independent broadcaster with no listeners
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BroadcasterState { next_id: 1, listeners: Vec::new() })),
        }
    }

    /// Initialise the process-wide broadcaster, returning it
    ///
    /// Calling this again returns the instance created by the first call.
    pub fn init_global() -> &'static MemoryPressureBroadcaster {
        GLOBAL.get_or_init(MemoryPressureBroadcaster::new)
    }

    /// The process-wide broadcaster, if `init_global` has run
    pub fn global() -> Option<&'static MemoryPressureBroadcaster> {
        GLOBAL.get()
    }

    /// Register a listener
    ///
    /// The broadcaster only keeps a weak reference. The listener stays
    /// registered until the returned subscription is dropped.
    #[must_use = "dropping the subscription unsubscribes the listener"]
    pub fn subscribe<L>(&self, listener: &Arc<L>) -> Subscription
    where
        L: MemoryPressureListener + 'static,
    {
        let weak = Arc::downgrade(listener);
        let weak: Weak<dyn MemoryPressureListener> = weak;
        self.subscribe_weak(weak)
    }

    fn subscribe_weak(&self, listener: Weak<dyn MemoryPressureListener>) -> Subscription {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.listeners.push(Registration { id, listener });
        log::debug!("memory pressure listener {} subscribed", id);

        Subscription { id, state: Arc::downgrade(&self.state) }
    }

    /// Remove a listener by id. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        remove_listener(&self.state, id)
    }

    /// Number of registrations whose listener is still alive
    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.iter().filter(|r| r.listener.strong_count() > 0).count()
    }

    /// Ask every listener to release its caches
    pub fn notify_pressure(&self) -> PressureReport {
        // Snapshot so listeners may subscribe/unsubscribe from inside the pass
        // without deadlocking and without changing who gets called.
        let snapshot: Vec<(ListenerId, Weak<dyn MemoryPressureListener>)> = self
            .state
            .lock()
            .listeners
            .iter()
            .map(|r| (r.id, r.listener.clone()))
            .collect();

        let mut report = PressureReport::default();

        for (id, weak) in snapshot {
            let Some(listener) = weak.upgrade() else {
                report.dropped += 1;
                continue;
            };

            report.notified += 1;
            match panic::catch_unwind(AssertUnwindSafe(|| listener.did_receive_memory_warning())) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    report.failed += 1;
                    log::warn!("memory pressure listener {} failed: {}", id, err);
                }
                Err(_) => {
                    report.failed += 1;
                    log::warn!("memory pressure listener {} panicked", id);
                }
            }
        }

        if report.dropped > 0 {
            self.state.lock().listeners.retain(|r| r.listener.strong_count() > 0);
        }

        log::debug!(
            "memory pressure pass: {} notified, {} failed, {} dropped",
            report.notified,
            report.failed,
            report.dropped
        );
        report
    }
}

impl Default for MemoryPressureBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_listener(state: &Mutex<BroadcasterState>, id: ListenerId) -> bool {
    let mut state = state.lock();
    let before = state.listeners.len();
    state.listeners.retain(|r| r.id != id);
    before != state.listeners.len()
}

/// Keeps a listener registered; unsubscribes on drop
pub struct Subscription {
    id: ListenerId,
    state: Weak<Mutex<BroadcasterState>>,
}

impl Subscription {
    /// Id of the registration
    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            remove_listener(&state, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records the order in which listeners were called
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl MemoryPressureListener for Recorder {
        fn did_receive_memory_warning(&self) -> Result<(), ReleaseError> {
            self.log.lock().push(self.name);
            Ok(())
        }
    }

    struct Failing;

    impl MemoryPressureListener for Failing {
        fn did_receive_memory_warning(&self) -> Result<(), ReleaseError> {
            Err(ReleaseError("busy".to_string()))
        }
    }

    struct Panicking;

    impl MemoryPressureListener for Panicking {
        fn did_receive_memory_warning(&self) -> Result<(), ReleaseError> {
            panic!("listener blew up");
        }
    }

    struct Counting(AtomicUsize);

    impl MemoryPressureListener for Counting {
        fn did_receive_memory_warning(&self) -> Result<(), ReleaseError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<Recorder> {
        Arc::new(Recorder { name, log: log.clone() })
    }

    #[test]
    fn test_listeners_called_in_subscription_order() {
        let broadcaster = MemoryPressureBroadcaster::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = recorder("a", &log);
        let b = recorder("b", &log);
        let c = recorder("c", &log);
        let _sa = broadcaster.subscribe(&a);
        let _sb = broadcaster.subscribe(&b);
        let _sc = broadcaster.subscribe(&c);

        let report = broadcaster.notify_pressure();

        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
        assert_eq!(report, PressureReport { notified: 3, failed: 0, dropped: 0 });
    }

    #[test]
    fn test_failures_are_isolated() {
        let broadcaster = MemoryPressureBroadcaster::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = recorder("first", &log);
        let failing = Arc::new(Failing);
        let panicking = Arc::new(Panicking);
        let last = recorder("last", &log);

        let _s1 = broadcaster.subscribe(&first);
        let _s2 = broadcaster.subscribe(&failing);
        let _s3 = broadcaster.subscribe(&panicking);
        let _s4 = broadcaster.subscribe(&last);

        let report = broadcaster.notify_pressure();

        assert_eq!(*log.lock(), vec!["first", "last"]);
        assert_eq!(report.notified, 4);
        assert_eq!(report.failed, 2);

        // Still usable afterwards
        let again = broadcaster.notify_pressure();
        assert_eq!(again.notified, 4);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let broadcaster = MemoryPressureBroadcaster::new();
        let counter = Arc::new(Counting(AtomicUsize::new(0)));

        let subscription = broadcaster.subscribe(&counter);
        assert_eq!(broadcaster.listener_count(), 1);

        drop(subscription);
        assert_eq!(broadcaster.listener_count(), 0);

        broadcaster.notify_pressure();
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_explicit_unsubscribe() {
        let broadcaster = MemoryPressureBroadcaster::new();
        let counter = Arc::new(Counting(AtomicUsize::new(0)));

        let subscription = broadcaster.subscribe(&counter);
        assert!(broadcaster.unsubscribe(subscription.id()));
        assert!(!broadcaster.unsubscribe(subscription.id()));

        broadcaster.notify_pressure();
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dead_listener_is_pruned() {
        let broadcaster = MemoryPressureBroadcaster::new();
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        let subscription = broadcaster.subscribe(&counter);

        drop(counter);
        let report = broadcaster.notify_pressure();

        assert_eq!(report, PressureReport { notified: 0, failed: 0, dropped: 1 });
        // The subscription outliving its listener is harmless
        drop(subscription);
    }

    /// Subscribes a new listener from inside the pass
    struct Subscriber {
        broadcaster: MemoryPressureBroadcaster,
        late: Arc<Counting>,
        held: Mutex<Vec<Subscription>>,
    }

    impl MemoryPressureListener for Subscriber {
        fn did_receive_memory_warning(&self) -> Result<(), ReleaseError> {
            let subscription = self.broadcaster.subscribe(&self.late);
            self.held.lock().push(subscription);
            Ok(())
        }
    }

    #[test]
    fn test_mutation_during_pass_is_not_observed() {
        let broadcaster = MemoryPressureBroadcaster::new();
        let late = Arc::new(Counting(AtomicUsize::new(0)));
        let subscriber = Arc::new(Subscriber {
            broadcaster: broadcaster.clone(),
            late: late.clone(),
            held: Mutex::new(Vec::new()),
        });
        let _s = broadcaster.subscribe(&subscriber);

        let report = broadcaster.notify_pressure();
        assert_eq!(report.notified, 1);
        assert_eq!(late.0.load(Ordering::SeqCst), 0);

        // Visible on the next pass
        broadcaster.notify_pressure();
        assert_eq!(late.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_subscribe_during_notify() {
        let broadcaster = MemoryPressureBroadcaster::new();
        let stable = Arc::new(Counting(AtomicUsize::new(0)));
        let _stable_sub = broadcaster.subscribe(&stable);

        let churn = broadcaster.clone();
        let handle = std::thread::spawn(move || {
            for _ in 0..200 {
                let listener = Arc::new(Counting(AtomicUsize::new(0)));
                let sub = churn.subscribe(&listener);
                drop(sub);
            }
        });

        for _ in 0..200 {
            broadcaster.notify_pressure();
        }
        handle.join().unwrap();

        // The listener present for every pass was called exactly once per pass
        assert_eq!(stable.0.load(Ordering::SeqCst), 200);
    }

    #[test]
    #[serial]
    fn test_global_is_initialised_once() {
        let first = MemoryPressureBroadcaster::init_global();
        let second = MemoryPressureBroadcaster::init_global();

        assert!(Arc::ptr_eq(&first.state, &second.state));
        assert!(MemoryPressureBroadcaster::global().is_some());
    }
}

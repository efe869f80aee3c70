//! Ordered callback registrations with service-type filtering.
//!
//! The registry is standalone and generic over the frame and transport types
//! so it can be tested without any socket. Dispatch snapshots the current
//! registration list and invokes handlers lock-free, so a handler may
//! register or unregister callbacks during a pass; such mutations take
//! effect from the next dispatch on.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::codec::ServiceType;

/// Handler invoked for each matching decoded frame together with the
/// transport it arrived on. Handlers run on the client's dispatch task and
/// must not block.
pub type FrameHandler<F, T> = Arc<dyn Fn(&F, &T) + Send + Sync>;

/// Opaque token identifying one registration, used for removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(u64);

struct Registration<F, T> {
    id: u64,
    handler: FrameHandler<F, T>,
    service_types: HashSet<ServiceType>,
}

impl<F, T> Registration<F, T> {
    /// An empty filter matches every service type
    fn matches(&self, service_type: ServiceType) -> bool {
        self.service_types.is_empty() || self.service_types.contains(&service_type)
    }
}

/// Ordered collection of frame callbacks; registration order is dispatch order
pub struct CallbackRegistry<F, T> {
    registrations: Mutex<Vec<Registration<F, T>>>,
    next_id: AtomicU64,
    unhandled: AtomicU64,
}

impl<F, T> Default for CallbackRegistry<F, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F, T> CallbackRegistry<F, T> {
    pub fn new() -> Self {
        CallbackRegistry {
            registrations: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            unhandled: AtomicU64::new(0),
        }
    }

    /// Append a registration and return a handle usable for removal
    pub fn register(
        &self,
        handler: FrameHandler<F, T>,
        service_types: HashSet<ServiceType>,
    ) -> CallbackHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.registrations.lock().push(Registration {
            id,
            handler,
            service_types,
        });
        CallbackHandle(id)
    }

    /// Remove a registration; removing an unknown handle is a logged no-op
    pub fn unregister(&self, handle: CallbackHandle) {
        let mut registrations = self.registrations.lock();
        let before = registrations.len();
        registrations.retain(|r| r.id != handle.0);
        if registrations.len() == before {
            debug!("unregister: unknown callback handle {:?}", handle);
        }
    }

    /// Invoke every registration matching `service_type`, in registration
    /// order. Returns whether any handler matched; unmatched frames are
    /// recorded as an unhandled-service-type observation.
    ///
    /// A panicking handler is logged and does not stop the pass.
    pub fn dispatch(&self, frame: &F, transport: &T, service_type: ServiceType) -> bool {
        let matching: Vec<FrameHandler<F, T>> = {
            let registrations = self.registrations.lock();
            registrations
                .iter()
                .filter(|r| r.matches(service_type))
                .map(|r| Arc::clone(&r.handler))
                .collect()
        };

        if matching.is_empty() {
            self.unhandled.fetch_add(1, Ordering::Relaxed);
            debug!("unhandled service type {}", service_type);
            return false;
        }

        for handler in matching {
            if catch_unwind(AssertUnwindSafe(|| handler(frame, transport))).is_err() {
                error!(
                    "frame callback panicked for service type {}; continuing dispatch",
                    service_type
                );
            }
        }
        true
    }

    /// Number of live registrations
    pub fn len(&self) -> usize {
        self.registrations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.lock().is_empty()
    }

    /// Frames that were decoded successfully but matched no registration
    pub fn unhandled_frames(&self) -> u64 {
        self.unhandled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;

    type TestRegistry = CallbackRegistry<u16, ()>;

    fn collector(
        registry: &TestRegistry,
        tag: u16,
        seen: &Arc<SyncMutex<Vec<u16>>>,
        filter: &[u16],
    ) -> CallbackHandle {
        let seen = Arc::clone(seen);
        registry.register(
            Arc::new(move |frame, _| seen.lock().push(tag * 1000 + frame)),
            filter.iter().map(|t| ServiceType(*t)).collect(),
        )
    }

    #[test]
    fn test_empty_filter_matches_all_types() {
        let registry = TestRegistry::new();
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        collector(&registry, 1, &seen, &[]);

        assert!(registry.dispatch(&7, &(), ServiceType(0x0201)));
        assert!(registry.dispatch(&8, &(), ServiceType(0x0203)));
        assert_eq!(*seen.lock(), vec![1007, 1008]);
        assert_eq!(registry.unhandled_frames(), 0);
    }

    #[test]
    fn test_filter_selectivity() {
        let registry = TestRegistry::new();
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        collector(&registry, 1, &seen, &[0x0201]);

        assert!(registry.dispatch(&1, &(), ServiceType(0x0201)));
        assert!(!registry.dispatch(&2, &(), ServiceType(0x0203)));
        assert_eq!(*seen.lock(), vec![1001]);
        assert_eq!(registry.unhandled_frames(), 1);
    }

    #[test]
    fn test_dispatch_preserves_registration_order() {
        let registry = TestRegistry::new();
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        collector(&registry, 1, &seen, &[0x0201]);
        collector(&registry, 2, &seen, &[]);

        registry.dispatch(&5, &(), ServiceType(0x0201));
        assert_eq!(*seen.lock(), vec![1005, 2005]);
    }

    #[test]
    fn test_unregister_removes_callback() {
        let registry = TestRegistry::new();
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        let handle = collector(&registry, 1, &seen, &[]);

        registry.dispatch(&1, &(), ServiceType(0x0201));
        registry.unregister(handle);
        registry.dispatch(&2, &(), ServiceType(0x0201));

        assert_eq!(*seen.lock(), vec![1001]);
        assert!(registry.is_empty());

        // Unknown handle is a no-op
        registry.unregister(handle);
    }

    #[test]
    fn test_mutation_during_dispatch_is_deferred() {
        let registry = Arc::new(TestRegistry::new());
        let seen = Arc::new(SyncMutex::new(Vec::new()));

        let registry_inner = Arc::clone(&registry);
        let seen_inner = Arc::clone(&seen);
        registry.register(
            Arc::new(move |frame, _| {
                seen_inner.lock().push(1000 + frame);
                let seen_late = Arc::clone(&seen_inner);
                registry_inner.register(
                    Arc::new(move |frame, _| seen_late.lock().push(9000 + frame)),
                    HashSet::new(),
                );
            }),
            HashSet::new(),
        );

        // The callback registered mid-pass must not see the in-flight frame
        registry.dispatch(&1, &(), ServiceType(0x0201));
        assert_eq!(*seen.lock(), vec![1001]);

        // It participates from the next pass on
        registry.dispatch(&2, &(), ServiceType(0x0201));
        assert_eq!(*seen.lock(), vec![1001, 1002, 9002]);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_pass() {
        let registry = TestRegistry::new();
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        registry.register(Arc::new(|_, _| panic!("misbehaving handler")), HashSet::new());
        collector(&registry, 2, &seen, &[]);

        assert!(registry.dispatch(&3, &(), ServiceType(0x0201)));
        assert_eq!(*seen.lock(), vec![2003]);

        // The registry keeps working for subsequent frames
        assert!(registry.dispatch(&4, &(), ServiceType(0x0201)));
        assert_eq!(*seen.lock(), vec![2003, 2004]);
    }
}

//! Operation registry: the live completion slots of a poller.
//!
//! Any thread may register; any thread driving polling may drain. The map is
//! sharded (DashMap) so unrelated registrations never contend on one lock.
//!
//! A slot is inserted only after its native operation has started, so a drain
//! pass never observes an unstarted handle. Continuations fire after the
//! slot has been removed and outside every shard lock: they may register new
//! operations, and a panicking continuation cannot corrupt the map.

mod slot;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

use crate::error::Panicked;
use crate::native::NativeRequest;

pub use slot::{CompletionSlot, Continuation, SlotId, SlotOutcome};

/// Counters snapshot of a registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub pending: usize,
    pub registered: u64,
    pub completed: u64,
}

#[derive(Default)]
pub struct Registry {
    slots: DashMap<SlotId, CompletionSlot>,
    registered: AtomicU64,
    completed: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a native operation and track it until it completes.
    ///
    /// `start` runs on the calling thread. If it fails, nothing is registered
    /// and its error is returned as-is.
    pub fn register<E>(
        &self,
        start: impl FnOnce() -> Result<Box<dyn NativeRequest>, E>,
        continuation: Continuation,
    ) -> Result<SlotId, E> {
        let request = start()?;
        let id = SlotId::new();
        self.slots
            .insert(id, CompletionSlot::new(id, request, continuation));
        self.registered.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(slot = %id, "Completion slot registered");
        Ok(id)
    }

    /// Test every pending slot once and fire the ones that completed.
    ///
    /// Returns the number of continuations fired by this pass.
    pub fn drain_pass(&self) -> usize {
        let mut ready = Vec::new();
        for mut entry in self.slots.iter_mut() {
            if entry.value_mut().poll_completion() {
                ready.push(*entry.key());
            }
        }

        let mut fired = 0;
        for id in ready {
            // Only the pass that moved this slot to Done pushed this id.
            let Some((_, slot)) = self.slots.remove(&id) else {
                continue;
            };
            self.completed.fetch_add(1, Ordering::Relaxed);
            fired += 1;

            if let Err(payload) = catch_unwind(AssertUnwindSafe(move || slot.fire())) {
                tracing::error!(
                    slot = %id,
                    error = %Panicked::from_payload(payload),
                    "Continuation panicked during drain pass"
                );
            }
        }

        if fired > 0 {
            tracing::trace!(fired, pending = self.slots.len(), "Drain pass fired slots");
        }
        fired
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            pending: self.slots.len(),
            registered: self.registered.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::Status;
    use crate::native::loopback::{GrequestHandle, Request, grequest_start};
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};

    fn start_grequest(registry: &Registry, fired: &Arc<AtomicUsize>) -> GrequestHandle {
        let handle = Arc::new(Mutex::new(None));
        let handle_out = Arc::clone(&handle);
        let fired = Arc::clone(fired);
        registry
            .register(
                move || {
                    let mut request = Request::default();
                    *handle_out.lock().unwrap() = Some(grequest_start(&mut request));
                    Ok::<_, std::convert::Infallible>(Box::new(request) as Box<dyn NativeRequest>)
                },
                Box::new(move |_| {
                    fired.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        let handle = handle.lock().unwrap().take().unwrap();
        handle
    }

    #[test]
    fn drain_fires_completed_slots_once() {
        let registry = Registry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = start_grequest(&registry, &fired);

        assert_eq!(registry.drain_pass(), 0);
        assert_eq!(registry.len(), 1);

        handle.complete(Status::SUCCESS);
        assert_eq!(registry.drain_pass(), 1);
        assert_eq!(registry.drain_pass(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn failed_start_registers_nothing() {
        let registry = Registry::new();
        let result = registry.register(
            || Err::<Box<dyn NativeRequest>, _>("could not start"),
            Box::new(|_| panic!("must not fire")),
        );

        assert_eq!(result.unwrap_err(), "could not start");
        assert!(registry.is_empty());
        assert_eq!(registry.stats().registered, 0);
    }

    #[test]
    fn continuation_receives_completion_status() {
        let registry = Registry::new();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);

        registry
            .register(
                || {
                    let mut request = Request::default();
                    let handle = grequest_start(&mut request);
                    handle.complete(Status::ERR_TRUNCATE);
                    Ok::<_, std::convert::Infallible>(Box::new(request) as Box<dyn NativeRequest>)
                },
                Box::new(move |status| {
                    *seen_clone.lock().unwrap() = Some(status);
                }),
            )
            .unwrap();

        registry.drain_pass();
        assert_eq!(*seen.lock().unwrap(), Some(Status::ERR_TRUNCATE));
    }

    #[test]
    fn concurrent_drains_fire_each_slot_exactly_once() {
        const SLOTS: usize = 256;
        const DRAINERS: usize = 8;

        let registry = Arc::new(Registry::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..SLOTS)
            .map(|_| start_grequest(&registry, &fired))
            .collect();

        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let drainers: Vec<_> = (0..DRAINERS)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let stop = Arc::clone(&stop);
                std::thread::spawn(move || {
                    let mut total = 0;
                    while !stop.load(Ordering::Acquire) || !registry.is_empty() {
                        total += registry.drain_pass();
                    }
                    total
                })
            })
            .collect();

        for handle in &handles {
            handle.complete(Status::SUCCESS);
        }
        stop.store(true, Ordering::Release);

        let total: usize = drainers.into_iter().map(|t| t.join().unwrap()).sum();
        assert_eq!(total, SLOTS);
        assert_eq!(fired.load(Ordering::SeqCst), SLOTS);

        let stats = registry.stats();
        assert_eq!(stats.registered, SLOTS as u64);
        assert_eq!(stats.completed, SLOTS as u64);
        assert_eq!(stats.pending, 0);
    }

    #[test]
    fn registration_overlaps_concurrent_drains() {
        const REGISTRARS: usize = 4;
        const PER_REGISTRAR: usize = 128;
        const DRAINERS: usize = 4;
        const TOTAL: usize = REGISTRARS * PER_REGISTRAR;

        let registry = Arc::new(Registry::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let drainers: Vec<_> = (0..DRAINERS)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let stop = Arc::clone(&stop);
                std::thread::spawn(move || {
                    let mut total = 0;
                    while !stop.load(Ordering::Acquire) || !registry.is_empty() {
                        total += registry.drain_pass();
                    }
                    total
                })
            })
            .collect();

        let registrars: Vec<_> = (0..REGISTRARS)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let fired = Arc::clone(&fired);
                std::thread::spawn(move || {
                    for _ in 0..PER_REGISTRAR {
                        let fired = Arc::clone(&fired);
                        registry
                            .register(
                                || {
                                    Ok::<_, std::convert::Infallible>(
                                        Box::new(Request::default()) as Box<dyn NativeRequest>
                                    )
                                },
                                Box::new(move |_| {
                                    fired.fetch_add(1, Ordering::SeqCst);
                                }),
                            )
                            .unwrap();
                    }
                })
            })
            .collect();

        for registrar in registrars {
            registrar.join().unwrap();
        }
        stop.store(true, Ordering::Release);

        let total: usize = drainers.into_iter().map(|t| t.join().unwrap()).sum();
        assert_eq!(total, TOTAL);
        assert_eq!(fired.load(Ordering::SeqCst), TOTAL);

        let stats = registry.stats();
        assert_eq!(stats.registered, TOTAL as u64);
        assert_eq!(stats.completed, TOTAL as u64);
        assert_eq!(stats.pending, 0);
    }

    #[test]
    fn continuation_may_register_new_slots() {
        let registry = Arc::new(Registry::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let inner_registry = Arc::clone(&registry);
        let inner_fired = Arc::clone(&fired);

        registry
            .register(
                || Ok::<_, std::convert::Infallible>(Box::new(Request::default()) as Box<dyn NativeRequest>),
                Box::new(move |_| {
                    let handle = start_grequest(&inner_registry, &inner_fired);
                    handle.complete(Status::SUCCESS);
                }),
            )
            .unwrap();

        assert_eq!(registry.drain_pass(), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.drain_pass(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_continuation_leaves_registry_usable() {
        let registry = Registry::new();
        registry
            .register(
                || Ok::<_, std::convert::Infallible>(Box::new(Request::default()) as Box<dyn NativeRequest>),
                Box::new(|_| panic!("continuation exploded")),
            )
            .unwrap();

        assert_eq!(registry.drain_pass(), 1);
        assert!(registry.is_empty());

        let fired = Arc::new(AtomicUsize::new(0));
        let handle = start_grequest(&registry, &fired);
        handle.complete(Status::SUCCESS);
        assert_eq!(registry.drain_pass(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}

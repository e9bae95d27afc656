//! CompletionSlot - one outstanding native request and its continuation.
//!
//! The slot is owned by the registry from registration until it fires. It is
//! only ever tested and fired through exclusive access: under its shard's
//! write guard during a drain pass, then by value once removed from the map.
//! Only the pass whose `remove` returned the slot fires it, which is what makes
//! resumption exactly-once. The continuation is moved out when fired.
//!
//! Request and continuation are `Send` but not `Sync`. They sit behind
//! mutexes so the registry can be shared between threads; with exclusive
//! access those are reached through `get_mut`/`into_inner` and never locked.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::native::{NativeRequest, Status};

/// One-shot callback fired with the native completion status.
pub type Continuation = Box<dyn FnOnce(Status) + Send + 'static>;

/// Unique identifier for a completion slot.
///
/// Random, so it never collides with a native handle value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(uuid::Uuid);

impl SlotId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SlotId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOutcome {
    Pending,
    Done(Status),
}

pub struct CompletionSlot {
    id: SlotId,
    request: Mutex<Box<dyn NativeRequest>>,
    continuation: Mutex<Option<Continuation>>,
    status: Option<Status>,
}

impl CompletionSlot {
    pub(crate) fn new(
        id: SlotId,
        request: Box<dyn NativeRequest>,
        continuation: Continuation,
    ) -> Self {
        Self {
            id,
            request: Mutex::new(request),
            continuation: Mutex::new(Some(continuation)),
            status: None,
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn outcome(&self) -> SlotOutcome {
        match self.status {
            Some(status) => SlotOutcome::Done(status),
            None => SlotOutcome::Pending,
        }
    }

    /// Test the native request without blocking.
    ///
    /// Returns `true` only for the call that moved the slot to Done; a done
    /// slot is never tested again.
    pub(crate) fn poll_completion(&mut self) -> bool {
        if self.status.is_some() {
            return false;
        }
        let request = self
            .request
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(status) = request.test() else {
            return false;
        };
        self.status = Some(status);
        true
    }

    /// Run the continuation with the completion status. Consumes the slot.
    pub(crate) fn fire(mut self) {
        let Some(status) = self.status else {
            debug_assert!(false, "fired a slot that never completed");
            tracing::error!(slot = %self.id, "Bug: fire called on pending slot");
            return;
        };
        let Some(continuation) = self.take_continuation() else {
            debug_assert!(false, "continuation already consumed");
            tracing::error!(slot = %self.id, "Bug: completion slot fired twice");
            return;
        };
        continuation(status);
    }

    fn take_continuation(&mut self) -> Option<Continuation> {
        self.continuation
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for CompletionSlot {
    fn drop(&mut self) {
        if self.take_continuation().is_some() {
            tracing::warn!(
                slot = %self.id,
                outcome = ?self.outcome(),
                "Completion slot dropped without firing - operation abandoned"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::loopback::{Request, grequest_start};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_slot(request: Request) -> (CompletionSlot, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let slot = CompletionSlot::new(
            SlotId::new(),
            Box::new(request),
            Box::new(move |_| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (slot, fired)
    }

    #[test]
    fn slot_starts_pending() {
        let mut request = Request::default();
        let _handle = grequest_start(&mut request);
        let (mut slot, _) = counting_slot(request);

        assert_eq!(slot.outcome(), SlotOutcome::Pending);
        assert!(!slot.poll_completion());
        assert_eq!(slot.outcome(), SlotOutcome::Pending);
    }

    #[test]
    fn slot_transitions_to_done_once() {
        let mut request = Request::default();
        let handle = grequest_start(&mut request);
        let (mut slot, fired) = counting_slot(request);

        handle.complete(Status::ERR_OTHER);
        assert!(slot.poll_completion());
        assert!(!slot.poll_completion());
        assert_eq!(slot.outcome(), SlotOutcome::Done(Status::ERR_OTHER));

        slot.fire();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn slot_is_shareable_between_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CompletionSlot>();
    }

    #[test]
    fn slot_ids_are_unique() {
        assert_ne!(SlotId::new(), SlotId::new());
    }
}

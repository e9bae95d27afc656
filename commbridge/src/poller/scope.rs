use std::sync::Arc;

use super::{Poller, ScopeId};
use crate::config::PollingMode;
use crate::policy::ErrorPolicy;

/// A live polling activation.
///
/// Polling stays enabled on the poller until every scope is dropped. The
/// scope is released on every exit path, including `?` and unwinding.
///
/// Dropping the last scope while operations started under it are still
/// pending leaves them unresolved: nothing drains the registry until polling
/// is enabled again. Await operations before their scope ends.
#[must_use = "polling stops as soon as the scope is dropped"]
pub struct PollingScope {
    poller: Arc<Poller>,
    id: ScopeId,
    mode: PollingMode,
    policy: ErrorPolicy,
}

impl PollingScope {
    pub(super) fn new(
        poller: Arc<Poller>,
        id: ScopeId,
        mode: PollingMode,
        policy: ErrorPolicy,
    ) -> Self {
        Self {
            poller,
            id,
            mode,
            policy,
        }
    }

    pub fn mode(&self) -> PollingMode {
        self.mode
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    pub fn poller(&self) -> &Arc<Poller> {
        &self.poller
    }
}

impl std::fmt::Debug for PollingScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingScope")
            .field("mode", &self.mode)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Drop for PollingScope {
    fn drop(&mut self) {
        self.poller.deactivate(self.id);
    }
}

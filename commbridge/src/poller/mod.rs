//! Poller - polling context shared by every operation started through it.
//!
//! A poller owns one operation registry and the drivers that run its drain
//! passes. Drivers only run while at least one [`PollingScope`] is alive:
//!
//! ```text
//! enable_polling(Background, _) ──► driver thread   ─┐
//! enable_polling(Cooperative, _) ─► runtime task     ─┼─► registry.drain_pass()
//! sync_wait(op) while active ─────► blocked thread   ─┘
//! ```
//!
//! Scopes nest per thread. An operation observes the policy of the innermost
//! live scope opened on the thread that starts it. A thread with no scope of
//! its own uses the policy every live scope agrees on. With no live scope, or
//! with live scopes that disagree, the policy is fatal.

mod driver;
mod scope;
mod sync_wait;

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::sync::Notify;

use crate::config::{PollingConfig, PollingMode};
use crate::policy::ErrorPolicy;
use crate::registry::{Registry, RegistryStats};

use driver::{BackgroundDriver, CooperativeDriver};

pub use scope::PollingScope;
pub use sync_wait::sync_wait;

static GLOBAL: OnceLock<Arc<Poller>> = OnceLock::new();

thread_local! {
    /// Scopes opened on this thread, innermost last. Ids are unique across
    /// pollers; entries are only trusted while the poller still lists them.
    static OPENED: RefCell<Vec<ScopeId>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScopeId(u64);

impl ScopeId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

struct ActiveScope {
    id: ScopeId,
    mode: PollingMode,
    policy: ErrorPolicy,
}

#[derive(Default)]
struct ScopeState {
    /// Live scopes, innermost last.
    active: Vec<ActiveScope>,
    background: Option<BackgroundDriver>,
    cooperative: Option<CooperativeDriver>,
}

/// Snapshot of a poller for logs and health output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PollerStats {
    pub activations: usize,
    pub policy: ErrorPolicy,
    pub background_driver: bool,
    pub cooperative_driver: bool,
    #[serde(flatten)]
    pub registry: RegistryStats,
}

pub struct Poller {
    registry: Arc<Registry>,
    config: PollingConfig,
    state: RwLock<ScopeState>,
    wake: Arc<Notify>,
}

impl Poller {
    pub fn new(config: PollingConfig) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(Registry::new()),
            config,
            state: RwLock::new(ScopeState::default()),
            wake: Arc::new(Notify::new()),
        })
    }

    /// Process-wide default poller, created on first use.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Self::new(PollingConfig::default())))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    /// Activate polling until the returned scope is dropped.
    ///
    /// Operations started while the scope is the innermost live one use
    /// `policy` for both their immediate status and their completion status.
    pub fn enable_polling(self: &Arc<Self>, mode: PollingMode, policy: ErrorPolicy) -> PollingScope {
        let id = ScopeId::next();
        OPENED.with(|opened| opened.borrow_mut().push(id));
        let mut state = self.write_state();
        state.active.push(ActiveScope { id, mode, policy });

        match mode {
            PollingMode::Background => {
                if state.background.is_none() {
                    match BackgroundDriver::spawn(Arc::clone(&self.registry), &self.config) {
                        Ok(driver) => state.background = Some(driver),
                        Err(e) => tracing::error!(
                            error = %e,
                            "Failed to spawn background polling thread"
                        ),
                    }
                }
            }
            PollingMode::Cooperative => {
                if state.cooperative.is_none() {
                    state.cooperative = CooperativeDriver::spawn(
                        Arc::clone(&self.registry),
                        Arc::clone(&self.wake),
                        &self.config,
                    );
                    if state.cooperative.is_none() {
                        tracing::debug!("No tokio runtime, cooperative polling runs in sync_wait only");
                    }
                }
            }
        }

        tracing::debug!(
            mode = mode.as_str(),
            policy = policy.as_str(),
            activations = state.active.len(),
            "Polling scope activated"
        );
        drop(state);

        PollingScope::new(Arc::clone(self), id, mode, policy)
    }

    pub(crate) fn deactivate(&self, id: ScopeId) {
        // May run during thread teardown; a scope dropped on another thread
        // leaves a stale entry that the liveness check skips.
        let _ = OPENED.try_with(|opened| opened.borrow_mut().retain(|s| *s != id));

        let (background, cooperative, activations) = {
            let mut state = self.write_state();
            let Some(position) = state.active.iter().rposition(|scope| scope.id == id) else {
                tracing::error!(scope = id.0, "Bug: deactivating unknown polling scope");
                return;
            };
            state.active.remove(position);

            let background = if state.active.iter().any(|s| s.mode == PollingMode::Background) {
                None
            } else {
                state.background.take()
            };
            let cooperative = if state.active.iter().any(|s| s.mode == PollingMode::Cooperative) {
                None
            } else {
                state.cooperative.take()
            };
            (background, cooperative, state.active.len())
        };

        let pending = self.registry.len();
        if activations == 0 && pending > 0 {
            tracing::warn!(
                pending,
                "Polling deactivated with outstanding operations - they stay unresolved until polling is re-enabled"
            );
        }
        tracing::debug!(activations, "Polling scope deactivated");

        // Join outside the lock: the driver may be firing a continuation
        // that activates another scope.
        if let Some(driver) = background {
            driver.stop();
        }
        if let Some(driver) = cooperative {
            driver.stop();
        }
    }

    pub fn is_active(&self) -> bool {
        !self.read_state().active.is_empty()
    }

    /// Policy an operation started on the calling thread would use.
    pub fn current_policy(&self) -> ErrorPolicy {
        policy_for_current_thread(&self.read_state())
    }

    /// Run one drain pass on the calling thread.
    pub fn drain_pass(&self) -> usize {
        self.registry.drain_pass()
    }

    pub fn stats(&self) -> PollerStats {
        let state = self.read_state();
        PollerStats {
            activations: state.active.len(),
            policy: policy_for_current_thread(&state),
            background_driver: state.background.is_some(),
            cooperative_driver: state.cooperative.is_some(),
            registry: self.registry.stats(),
        }
    }

    /// Cut idle drivers short after a registration.
    pub(crate) fn wake_drivers(&self) {
        if let Some(driver) = &self.read_state().background {
            driver.wake();
        }
        self.wake.notify_one();
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ScopeState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ScopeState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

fn policy_for_current_thread(state: &ScopeState) -> ErrorPolicy {
    let own = OPENED
        .try_with(|opened| {
            opened.borrow().iter().rev().find_map(|id| {
                state
                    .active
                    .iter()
                    .find(|scope| scope.id == *id)
                    .map(|scope| scope.policy)
            })
        })
        .ok()
        .flatten();
    if let Some(policy) = own {
        return policy;
    }

    let mut live = state.active.iter().map(|scope| scope.policy);
    let Some(first) = live.next() else {
        return ErrorPolicy::default();
    };
    if live.all(|policy| policy == first) {
        first
    } else {
        tracing::warn!(
            activations = state.active.len(),
            "Live polling scopes disagree on error policy and none is open on this thread - using fatal"
        );
        ErrorPolicy::Fatal
    }
}

/// Activate polling on the default poller.
pub fn enable_user_polling(mode: PollingMode, policy: ErrorPolicy) -> PollingScope {
    Poller::global().enable_polling(mode, policy)
}

//! commbridge: Rust futures over pull-to-test native communication requests.
//!
//! Native operations start immediately and hand back a request handle whose
//! completion is only discovered by testing it. This crate registers those
//! handles, drives the tests from idle execution resources while polling is
//! enabled, and resolves an [`Operation`] future exactly once per request.
//!
//! ```no_run
//! use commbridge::native::loopback::{self, Buffer, Comm, Request};
//! use commbridge::{ErrorPolicy, OperationExt, PollingMode, enable_user_polling, just};
//!
//! let _polling = enable_user_polling(PollingMode::Cooperative, ErrorPolicy::Recoverable);
//! let comm = loopback::world(1).remove(0);
//! let status = just((Buffer::new(4), comm))
//!     .transform(|(buf, comm): (Buffer, Comm), request: &mut Request| {
//!         loopback::ibcast(&buf, 4, 0, &comm, request)
//!     })
//!     .sync_wait();
//! assert!(status.is_ok());
//! ```

mod config;
mod dispatch;
mod error;
mod logging;
mod policy;
mod transform;

pub mod native;
pub mod poller;
pub mod registry;

pub use config::{PollingConfig, PollingMode};
pub use dispatch::{AdaptsSelf, Invocation, transform_value};
pub use error::{BoxError, Error, Panicked};
pub use logging::init_tracing;
pub use policy::ErrorPolicy;
pub use poller::{Poller, PollerStats, PollingScope, enable_user_polling, sync_wait};
pub use transform::{InvokeOutput, Operation, OperationExt, just, transform, transform_then};

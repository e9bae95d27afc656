//! Native (pull-to-test) completion model.
//!
//! A native operation is started immediately and hands back an opaque request
//! handle. The handle carries no callback: completion is only discovered by
//! testing it. The bridge treats "start, get handle, later test handle" as the
//! whole contract.
//!
//! # Architecture
//!
//! - **status**: Integer return/completion codes and their diagnostics
//! - **loopback**: In-process communicator world implementing the contract

pub mod loopback;
mod status;

pub use status::{ErrorClass, Status};

/// An in-flight native operation.
///
/// Requests are not cancellable: once started they must be tested until they
/// report completion.
pub trait NativeRequest: Send + 'static {
    /// Non-blocking completion test.
    ///
    /// Returns `None` while the operation is in flight and `Some(status)` once
    /// it has completed. A request that has already reported completion (or
    /// was never started) keeps reporting `Some(Status::SUCCESS)`.
    fn test(&mut self) -> Option<Status>;
}

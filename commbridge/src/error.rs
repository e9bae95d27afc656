//! Failures delivered through an operation's error channel.

use std::any::Any;

use crate::native::Status;

/// Boxed user error crossing a bridge boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The argument producer failed before the native operation started.
    #[error(transparent)]
    Producer(BoxError),

    /// The invoke function failed or panicked before a handle was registered.
    #[error(transparent)]
    Invocation(BoxError),

    /// The native library rejected the call's parameters.
    #[error("invalid argument: {message} [{status}]")]
    ArgumentValidation { status: Status, message: String },

    /// The native handle completed with a non-success status.
    #[error("operation failed: {message} [{status}]")]
    Operation { status: Status, message: String },

    /// User code run at resolution failed or panicked.
    #[error(transparent)]
    Continuation(BoxError),

    /// The completion slot was dropped without ever firing.
    #[error("operation abandoned: completion slot dropped before firing")]
    Abandoned,
}

impl Error {
    /// Map a non-success native status to its typed failure.
    pub fn from_status(status: Status) -> Self {
        let message = status.message().to_string();
        if status.class().is_argument_validation() {
            Self::ArgumentValidation { status, message }
        } else {
            Self::Operation { status, message }
        }
    }

    /// Native status carried by this failure, if it came from the native library.
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::ArgumentValidation { status, .. } | Self::Operation { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    pub fn is_native(&self) -> bool {
        self.status().is_some()
    }
}

/// A panic caught at a bridge boundary, carried as an ordinary error.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct Panicked {
    message: String,
}

impl Panicked {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Self { message }
    }

    pub(crate) fn boxed(payload: Box<dyn Any + Send>) -> BoxError {
        Box::new(Self::from_payload(payload))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_statuses_map_to_validation_failures() {
        let err = Error::from_status(Status::ERR_ROOT);
        assert!(matches!(err, Error::ArgumentValidation { .. }));
        assert_eq!(err.status(), Some(Status::ERR_ROOT));
        insta::assert_snapshot!(err.to_string(), @"invalid argument: invalid root [ERR_ROOT]");
    }

    #[test]
    fn completion_statuses_map_to_operation_failures() {
        let err = Error::from_status(Status::ERR_TRUNCATE);
        assert!(matches!(err, Error::Operation { .. }));
        insta::assert_snapshot!(err.to_string(), @"operation failed: message truncated [ERR_TRUNCATE]");
    }

    #[test]
    fn user_errors_display_transparently() {
        let err = Error::Producer("error".into());
        assert_eq!(err.to_string(), "error");
        assert!(!err.is_native());

        let err = Error::Continuation("error in continuation".into());
        assert_eq!(err.to_string(), "error in continuation");
    }

    #[test]
    fn panic_payloads_keep_their_message() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(Panicked::from_payload(payload).message(), "boom 7");

        let payload = std::panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(Panicked::boxed(payload).to_string(), "static");

        let payload = std::panic::catch_unwind(|| std::panic::panic_any(3_u8)).unwrap_err();
        assert_eq!(
            Panicked::from_payload(payload).message(),
            "panic with non-string payload"
        );
    }
}

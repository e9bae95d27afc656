//! Error policies: how a non-success native status reaches the caller.
//!
//! The policy belongs to the polling scope that was innermost when an
//! operation started; it is captured at start time and used both for the
//! immediate return code of the invoke call and for the completion status.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::native::Status;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Non-success statuses become typed failures in the error channel.
    Recoverable,
    /// Non-success statuses abort the process, like the native library's own
    /// default error handler.
    #[default]
    Fatal,
}

impl ErrorPolicy {
    /// Pass a success status through, or apply the policy to a failure.
    ///
    /// Under [`ErrorPolicy::Fatal`] a failure never returns.
    pub fn check(self, status: Status) -> Result<Status, Error> {
        if status.is_success() {
            return Ok(status);
        }
        match self {
            Self::Recoverable => Err(Error::from_status(status)),
            Self::Fatal => abort_on_status(status),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recoverable => "recoverable",
            Self::Fatal => "fatal",
        }
    }
}

impl FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recoverable" => Ok(Self::Recoverable),
            "fatal" => Ok(Self::Fatal),
            other => Err(format!(
                "invalid error policy '{other}', expected 'recoverable' or 'fatal'"
            )),
        }
    }
}

fn abort_on_status(status: Status) -> ! {
    tracing::error!(
        status = %status,
        code = status.code(),
        "Native operation failed under fatal error policy: {}",
        status.message()
    );
    eprintln!(
        "commbridge: fatal native error {status} ({}): {}",
        status.code(),
        status.message()
    );
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_passes_under_both_policies() {
        assert_eq!(
            ErrorPolicy::Recoverable.check(Status::SUCCESS).unwrap(),
            Status::SUCCESS
        );
        assert_eq!(ErrorPolicy::Fatal.check(Status::SUCCESS).unwrap(), Status::SUCCESS);
    }

    #[test]
    fn recoverable_maps_failures_to_errors() {
        let err = ErrorPolicy::Recoverable.check(Status::ERR_RANK).unwrap_err();
        assert!(err.to_string().contains("invalid rank"));
    }

    #[test]
    fn default_policy_is_fatal() {
        assert_eq!(ErrorPolicy::default(), ErrorPolicy::Fatal);
    }

    #[test]
    fn parses_from_str() {
        assert_eq!("recoverable".parse::<ErrorPolicy>(), Ok(ErrorPolicy::Recoverable));
        assert_eq!("fatal".parse::<ErrorPolicy>(), Ok(ErrorPolicy::Fatal));
        assert!("lenient".parse::<ErrorPolicy>().is_err());
    }
}

//! Native status codes.
//!
//! Mirrors the integer encoding of message-passing libraries: zero is success,
//! every other value names an error class with a fixed diagnostic string.

use serde::{Deserialize, Serialize};

/// Return/completion code of a native operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(i32);

impl Status {
    pub const SUCCESS: Status = Status(0);
    pub const ERR_BUFFER: Status = Status(1);
    pub const ERR_COUNT: Status = Status(2);
    pub const ERR_TYPE: Status = Status(3);
    pub const ERR_TAG: Status = Status(4);
    pub const ERR_COMM: Status = Status(5);
    pub const ERR_RANK: Status = Status(6);
    pub const ERR_REQUEST: Status = Status(7);
    pub const ERR_ROOT: Status = Status(8);
    pub const ERR_ARG: Status = Status(12);
    pub const ERR_TRUNCATE: Status = Status(15);
    pub const ERR_OTHER: Status = Status(16);
    pub const ERR_INTERN: Status = Status(17);

    pub const fn from_code(code: i32) -> Self {
        Self(code)
    }

    pub const fn code(self) -> i32 {
        self.0
    }

    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    pub fn class(self) -> ErrorClass {
        match self.0 {
            0 => ErrorClass::Success,
            1..=6 | 8 | 12 => ErrorClass::InvalidArgument,
            7 => ErrorClass::InvalidRequest,
            15 => ErrorClass::Truncated,
            17 => ErrorClass::Internal,
            _ => ErrorClass::Other,
        }
    }

    /// Symbolic name, e.g. `ERR_ROOT`.
    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "SUCCESS",
            1 => "ERR_BUFFER",
            2 => "ERR_COUNT",
            3 => "ERR_TYPE",
            4 => "ERR_TAG",
            5 => "ERR_COMM",
            6 => "ERR_RANK",
            7 => "ERR_REQUEST",
            8 => "ERR_ROOT",
            12 => "ERR_ARG",
            15 => "ERR_TRUNCATE",
            16 => "ERR_OTHER",
            17 => "ERR_INTERN",
            _ => "ERR_UNKNOWN",
        }
    }

    /// Human-readable diagnostic for this status.
    pub fn message(self) -> &'static str {
        match self.0 {
            0 => "no errors",
            1 => "invalid buffer pointer",
            2 => "invalid count argument",
            3 => "invalid datatype",
            4 => "invalid tag",
            5 => "invalid communicator",
            6 => "invalid rank",
            7 => "invalid request",
            8 => "invalid root",
            12 => "invalid argument of some other kind",
            15 => "message truncated",
            16 => "known error not in this list",
            17 => "internal error",
            _ => "unknown error code",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name() == "ERR_UNKNOWN" {
            write!(f, "ERR_UNKNOWN({})", self.0)
        } else {
            f.write_str(self.name())
        }
    }
}

/// Coarse classification of a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Success,
    /// The call's parameters were rejected (rank, root, count, tag, ...).
    InvalidArgument,
    InvalidRequest,
    Truncated,
    Internal,
    Other,
}

impl ErrorClass {
    pub fn is_argument_validation(&self) -> bool {
        matches!(self, Self::InvalidArgument)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_zero() {
        assert!(Status::SUCCESS.is_success());
        assert_eq!(Status::SUCCESS.code(), 0);
        assert_eq!(Status::SUCCESS.class(), ErrorClass::Success);
    }

    #[test]
    fn root_error_is_argument_validation() {
        let status = Status::ERR_ROOT;
        assert!(!status.is_success());
        assert!(status.class().is_argument_validation());
        assert_eq!(status.message(), "invalid root");
        assert_eq!(status.to_string(), "ERR_ROOT");
    }

    #[test]
    fn truncation_is_not_argument_validation() {
        assert_eq!(Status::ERR_TRUNCATE.class(), ErrorClass::Truncated);
        assert!(!Status::ERR_TRUNCATE.class().is_argument_validation());
    }

    #[test]
    fn unknown_codes_display_their_value() {
        let status = Status::from_code(99);
        assert_eq!(status.class(), ErrorClass::Other);
        assert_eq!(status.to_string(), "ERR_UNKNOWN(99)");
        assert_eq!(status.message(), "unknown error code");
    }

    #[test]
    fn status_serializes_as_code() {
        let json = serde_json::to_value(Status::ERR_RANK).unwrap();
        assert_eq!(json, serde_json::json!(6));
    }
}

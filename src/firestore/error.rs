use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FirestoreErrorCode {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
    MissingProjectId,
    /// The backend sent something the listen protocol does not allow.
    ProtocolViolation,
}

impl FirestoreErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FirestoreErrorCode::Cancelled => "firestore/cancelled",
            FirestoreErrorCode::Unknown => "firestore/unknown",
            FirestoreErrorCode::InvalidArgument => "firestore/invalid-argument",
            FirestoreErrorCode::DeadlineExceeded => "firestore/deadline-exceeded",
            FirestoreErrorCode::NotFound => "firestore/not-found",
            FirestoreErrorCode::AlreadyExists => "firestore/already-exists",
            FirestoreErrorCode::PermissionDenied => "firestore/permission-denied",
            FirestoreErrorCode::ResourceExhausted => "firestore/resource-exhausted",
            FirestoreErrorCode::FailedPrecondition => "firestore/failed-precondition",
            FirestoreErrorCode::Aborted => "firestore/aborted",
            FirestoreErrorCode::OutOfRange => "firestore/out-of-range",
            FirestoreErrorCode::Unimplemented => "firestore/unimplemented",
            FirestoreErrorCode::Internal => "firestore/internal",
            FirestoreErrorCode::Unavailable => "firestore/unavailable",
            FirestoreErrorCode::DataLoss => "firestore/data-loss",
            FirestoreErrorCode::Unauthenticated => "firestore/unauthenticated",
            FirestoreErrorCode::MissingProjectId => "firestore/missing-project-id",
            FirestoreErrorCode::ProtocolViolation => "firestore/protocol-violation",
        }
    }

    /// Maps a numeric gRPC status code. Codes outside the canonical range map to `Unknown`.
    pub fn from_grpc_code(code: i32) -> Self {
        match code {
            1 => FirestoreErrorCode::Cancelled,
            3 => FirestoreErrorCode::InvalidArgument,
            4 => FirestoreErrorCode::DeadlineExceeded,
            5 => FirestoreErrorCode::NotFound,
            6 => FirestoreErrorCode::AlreadyExists,
            7 => FirestoreErrorCode::PermissionDenied,
            8 => FirestoreErrorCode::ResourceExhausted,
            9 => FirestoreErrorCode::FailedPrecondition,
            10 => FirestoreErrorCode::Aborted,
            11 => FirestoreErrorCode::OutOfRange,
            12 => FirestoreErrorCode::Unimplemented,
            13 => FirestoreErrorCode::Internal,
            14 => FirestoreErrorCode::Unavailable,
            15 => FirestoreErrorCode::DataLoss,
            16 => FirestoreErrorCode::Unauthenticated,
            _ => FirestoreErrorCode::Unknown,
        }
    }

    /// Numeric gRPC status for this code; crate-specific codes report `UNKNOWN`.
    pub fn grpc_code(&self) -> i32 {
        match self {
            FirestoreErrorCode::Cancelled => 1,
            FirestoreErrorCode::Unknown => 2,
            FirestoreErrorCode::InvalidArgument => 3,
            FirestoreErrorCode::DeadlineExceeded => 4,
            FirestoreErrorCode::NotFound => 5,
            FirestoreErrorCode::AlreadyExists => 6,
            FirestoreErrorCode::PermissionDenied => 7,
            FirestoreErrorCode::ResourceExhausted => 8,
            FirestoreErrorCode::FailedPrecondition => 9,
            FirestoreErrorCode::Aborted => 10,
            FirestoreErrorCode::OutOfRange => 11,
            FirestoreErrorCode::Unimplemented => 12,
            FirestoreErrorCode::Internal => 13,
            FirestoreErrorCode::Unavailable => 14,
            FirestoreErrorCode::DataLoss => 15,
            FirestoreErrorCode::Unauthenticated => 16,
            FirestoreErrorCode::MissingProjectId | FirestoreErrorCode::ProtocolViolation => 2,
        }
    }

    /// Maps the upper-case status name used by the JSON transcoding of `google.rpc.Status`.
    pub fn from_status_name(name: &str) -> Self {
        match name {
            "CANCELLED" => FirestoreErrorCode::Cancelled,
            "INVALID_ARGUMENT" => FirestoreErrorCode::InvalidArgument,
            "DEADLINE_EXCEEDED" => FirestoreErrorCode::DeadlineExceeded,
            "NOT_FOUND" => FirestoreErrorCode::NotFound,
            "ALREADY_EXISTS" => FirestoreErrorCode::AlreadyExists,
            "PERMISSION_DENIED" => FirestoreErrorCode::PermissionDenied,
            "RESOURCE_EXHAUSTED" => FirestoreErrorCode::ResourceExhausted,
            "FAILED_PRECONDITION" => FirestoreErrorCode::FailedPrecondition,
            "ABORTED" => FirestoreErrorCode::Aborted,
            "OUT_OF_RANGE" => FirestoreErrorCode::OutOfRange,
            "UNIMPLEMENTED" => FirestoreErrorCode::Unimplemented,
            "INTERNAL" => FirestoreErrorCode::Internal,
            "UNAVAILABLE" => FirestoreErrorCode::Unavailable,
            "DATA_LOSS" => FirestoreErrorCode::DataLoss,
            "UNAUTHENTICATED" => FirestoreErrorCode::Unauthenticated,
            _ => FirestoreErrorCode::Unknown,
        }
    }

    /// Whether a listen stream that terminated with this status may be reopened.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FirestoreErrorCode::Cancelled
                | FirestoreErrorCode::Unknown
                | FirestoreErrorCode::DeadlineExceeded
                | FirestoreErrorCode::ResourceExhausted
                | FirestoreErrorCode::Internal
                | FirestoreErrorCode::Unavailable
                | FirestoreErrorCode::Unauthenticated
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirestoreError {
    pub code: FirestoreErrorCode,
    message: String,
}

impl FirestoreError {
    pub fn new(code: FirestoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl Display for FirestoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl Error for FirestoreError {}

pub type FirestoreResult<T> = Result<T, FirestoreError>;

pub fn invalid_argument(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::InvalidArgument, message)
}

pub fn missing_project_id() -> FirestoreError {
    FirestoreError::new(
        FirestoreErrorCode::MissingProjectId,
        "Firebase options must include a project_id to use Firestore",
    )
}

pub fn internal_error(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Internal, message)
}

pub fn unknown_error(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Unknown, message)
}

pub fn cancelled(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Cancelled, message)
}

pub fn failed_precondition(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::FailedPrecondition, message)
}

pub fn permission_denied(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::PermissionDenied, message)
}

pub fn unauthenticated(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Unauthenticated, message)
}

pub fn unavailable(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Unavailable, message)
}

pub fn deadline_exceeded(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::DeadlineExceeded, message)
}

pub fn protocol_violation(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::ProtocolViolation, message)
}

/// Builds an error from a `google.rpc.Status` carried on the wire.
pub fn from_grpc_status(code: i32, message: Option<String>) -> FirestoreError {
    let code = FirestoreErrorCode::from_grpc_code(code);
    let message = message.unwrap_or_else(|| format!("listen stream failed: {}", code.as_str()));
    FirestoreError::new(code, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_set_matches_listen_policy() {
        let retryable = [
            FirestoreErrorCode::Cancelled,
            FirestoreErrorCode::Unknown,
            FirestoreErrorCode::DeadlineExceeded,
            FirestoreErrorCode::ResourceExhausted,
            FirestoreErrorCode::Internal,
            FirestoreErrorCode::Unavailable,
            FirestoreErrorCode::Unauthenticated,
        ];
        for code in retryable {
            assert!(code.is_retryable(), "{code:?} should be retryable");
        }

        let permanent = [
            FirestoreErrorCode::InvalidArgument,
            FirestoreErrorCode::NotFound,
            FirestoreErrorCode::PermissionDenied,
            FirestoreErrorCode::FailedPrecondition,
            FirestoreErrorCode::Aborted,
            FirestoreErrorCode::DataLoss,
            FirestoreErrorCode::ProtocolViolation,
        ];
        for code in permanent {
            assert!(!code.is_retryable(), "{code:?} should be permanent");
        }
    }

    #[test]
    fn grpc_codes_round_out_to_unknown() {
        assert_eq!(FirestoreErrorCode::from_grpc_code(14), FirestoreErrorCode::Unavailable);
        assert_eq!(FirestoreErrorCode::from_grpc_code(2), FirestoreErrorCode::Unknown);
        assert_eq!(FirestoreErrorCode::from_grpc_code(99), FirestoreErrorCode::Unknown);
        assert_eq!(
            FirestoreErrorCode::from_status_name("PERMISSION_DENIED"),
            FirestoreErrorCode::PermissionDenied
        );
    }

    #[test]
    fn status_without_message_gets_default_text() {
        let err = from_grpc_status(7, None);
        assert_eq!(err.code_str(), "firestore/permission-denied");
        assert!(err.message().contains("permission-denied"));
    }
}

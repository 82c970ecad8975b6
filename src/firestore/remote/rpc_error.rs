use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::firestore::error::{
    from_grpc_status, FirestoreError, FirestoreErrorCode,
};

/// How the listen driver reacts to a stream that ended with an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Terminate the session.
    Permanent,
    Retry {
        /// Grow the backoff bound beyond the usual step.
        advance_backoff: bool,
        /// Force a token refresh before reopening.
        invalidate_credentials: bool,
    },
}

pub fn classify_stream_error(error: &FirestoreError) -> RetryDecision {
    if !error.is_retryable() {
        return RetryDecision::Permanent;
    }
    RetryDecision::Retry {
        advance_backoff: error.code == FirestoreErrorCode::ResourceExhausted,
        invalidate_credentials: error.code == FirestoreErrorCode::Unauthenticated,
    }
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    #[serde(default)]
    code: Option<JsonValue>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Maps a `google.rpc.Status` in JSON form to an error. `code` may be numeric or the
/// upper-case status name; anything unparseable becomes `Unknown`.
pub fn map_status_payload(payload: &JsonValue) -> FirestoreError {
    let Ok(status) = serde_json::from_value::<StatusPayload>(payload.clone()) else {
        return from_grpc_status(2, Some(format!("Unparseable stream status: {payload}")));
    };

    let code = match (&status.code, status.status.as_deref()) {
        (Some(JsonValue::Number(number)), _) => {
            FirestoreErrorCode::from_grpc_code(number.as_i64().unwrap_or(2) as i32)
        }
        (Some(JsonValue::String(name)), _) => FirestoreErrorCode::from_status_name(name),
        (_, Some(name)) => FirestoreErrorCode::from_status_name(name),
        _ => FirestoreErrorCode::Unknown,
    };
    let message = status
        .message
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| format!("listen stream failed: {}", code.as_str()));
    FirestoreError::new(code, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::error::{unauthenticated, unavailable};
    use serde_json::json;

    #[test]
    fn classifies_retryable_statuses() {
        assert_eq!(
            classify_stream_error(&unavailable("down")),
            RetryDecision::Retry {
                advance_backoff: false,
                invalidate_credentials: false
            }
        );
        assert_eq!(
            classify_stream_error(&unauthenticated("expired")),
            RetryDecision::Retry {
                advance_backoff: false,
                invalidate_credentials: true
            }
        );
        assert_eq!(
            classify_stream_error(&FirestoreError::new(
                FirestoreErrorCode::ResourceExhausted,
                "quota"
            )),
            RetryDecision::Retry {
                advance_backoff: true,
                invalidate_credentials: false
            }
        );
        assert_eq!(
            classify_stream_error(&FirestoreError::new(
                FirestoreErrorCode::PermissionDenied,
                "no"
            )),
            RetryDecision::Permanent
        );
        assert_eq!(
            classify_stream_error(&FirestoreError::new(
                FirestoreErrorCode::ProtocolViolation,
                "bad"
            )),
            RetryDecision::Permanent
        );
    }

    #[test]
    fn maps_numeric_and_named_statuses() {
        let numeric = map_status_payload(&json!({ "code": 14, "message": "try later" }));
        assert_eq!(numeric.code, FirestoreErrorCode::Unavailable);
        assert_eq!(numeric.message(), "try later");

        let named = map_status_payload(&json!({ "status": "PERMISSION_DENIED" }));
        assert_eq!(named.code, FirestoreErrorCode::PermissionDenied);

        let garbage = map_status_payload(&json!("oops"));
        assert_eq!(garbage.code, FirestoreErrorCode::Unknown);
    }
}

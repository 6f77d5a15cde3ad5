//! Error taxonomy for the database layer
//!
//! Every failure that leaves this crate carries a closed taxonomy code and a
//! safe user-facing message. Raw driver errors are classified at the
//! boundary where they are first caught and never propagate to callers.

use serde::Serialize;
use std::error::Error as StdError;
use subtrack_core::Environment;
use thiserror::Error;

/// Result type alias for database operations
pub type DbResult<T> = Result<T, DbError>;

/// Closed enumeration of failure classes
///
/// Codes are stable identifiers decoupled from the driver's error types;
/// they serialize in SCREAMING_SNAKE_CASE on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConnectionFailed,
    ConnectionTimeout,
    InvalidUri,
    AuthFailed,
    QueryFailed,
    ValidationFailed,
    DuplicateKey,
    CreateFailed,
    UpdateFailed,
    DeleteFailed,
    Unknown,
}

impl ErrorCode {
    /// Stable string form of the code (matches the wire serialization)
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::ConnectionTimeout => "CONNECTION_TIMEOUT",
            ErrorCode::InvalidUri => "INVALID_URI",
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::QueryFailed => "QUERY_FAILED",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::DuplicateKey => "DUPLICATE_KEY",
            ErrorCode::CreateFailed => "CREATE_FAILED",
            ErrorCode::UpdateFailed => "UPDATE_FAILED",
            ErrorCode::DeleteFailed => "DELETE_FAILED",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }

    /// Fixed user-facing message for this code
    ///
    /// These strings are the only ones end users ever see; technical detail
    /// stays in logs and development-mode response bodies.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCode::ConnectionFailed => {
                "Unable to connect to the database. Please try again later."
            }
            ErrorCode::ConnectionTimeout => {
                "The database is taking too long to respond. Please try again."
            }
            ErrorCode::InvalidUri => "The database is misconfigured. Please contact support.",
            ErrorCode::AuthFailed => "Database authentication failed. Please contact support.",
            ErrorCode::QueryFailed => "The requested data could not be loaded.",
            ErrorCode::ValidationFailed => "The submitted data failed validation.",
            ErrorCode::DuplicateKey => "A record with these details already exists.",
            ErrorCode::CreateFailed => "The record could not be created.",
            ErrorCode::UpdateFailed => "The record could not be updated.",
            ErrorCode::DeleteFailed => "The record could not be deleted.",
            ErrorCode::Unknown => "An unexpected error occurred. Please try again.",
        }
    }

    /// HTTP status for API responses carrying this code
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::ConnectionFailed | ErrorCode::ConnectionTimeout => 503,
            ErrorCode::ValidationFailed => 400,
            ErrorCode::DuplicateKey => 409,
            _ => 500,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified database error
///
/// `message` is the internal, log-safe description; the user-facing string
/// comes from [`ErrorCode::user_message`] when building a response body.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct DbError {
    pub code: ErrorCode,
    pub message: String,
    pub cause: Option<String>,
}

impl DbError {
    pub fn new<M: Into<String>>(code: ErrorCode, message: M) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause<C: Into<String>>(mut self, cause: C) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Create a connection failure error
    pub fn connection_failed<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorCode::ConnectionFailed, message)
    }

    /// Create a connection timeout error with the fixed user-safe message
    pub fn timeout() -> Self {
        Self::new(
            ErrorCode::ConnectionTimeout,
            ErrorCode::ConnectionTimeout.user_message(),
        )
    }

    /// Create an invalid connection string error
    pub fn invalid_uri<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorCode::InvalidUri, message)
    }

    /// Create a validation error
    pub fn validation<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    /// Build the API response body for this error
    ///
    /// Technical detail is attached only in development.
    pub fn to_body(&self, environment: &Environment) -> ErrorBody {
        let details = if environment.is_development() {
            Some(serde_json::json!({
                "message": self.message,
                "cause": self.cause,
            }))
        } else {
            None
        };

        ErrorBody {
            success: false,
            error: self.code.user_message().to_string(),
            code: self.code,
            details,
        }
    }

    /// HTTP status for this error
    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }
}

/// API error response shape consumed by the HTTP handlers
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Kind of operation being executed, used to narrow generic failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Create,
    Update,
    Delete,
}

impl OperationKind {
    fn failure_code(&self) -> ErrorCode {
        match self {
            OperationKind::Read => ErrorCode::QueryFailed,
            OperationKind::Create => ErrorCode::CreateFailed,
            OperationKind::Update => ErrorCode::UpdateFailed,
            OperationKind::Delete => ErrorCode::DeleteFailed,
        }
    }
}

/// Classify an arbitrary error into the taxonomy
///
/// First match wins: already-classified errors pass through unchanged, then
/// duplicate-key, auth, timeout (checked before generic network failures),
/// network, malformed connection string, and validation signatures. Anything
/// left is `UNKNOWN`. A supplied `context` is prepended to the message,
/// except for timeouts, whose message is always the fixed user-safe
/// sentence.
pub fn classify(error: &(dyn StdError + 'static), context: Option<&str>) -> DbError {
    if let Some(classified) = error.downcast_ref::<DbError>() {
        return classified.clone();
    }

    let raw = error.to_string();
    let code = classify_message(&raw);

    if code == ErrorCode::ConnectionTimeout {
        return DbError::timeout().with_cause(raw);
    }

    let message = match context {
        Some(ctx) => format!("{}: {}", ctx, raw),
        None => raw.clone(),
    };

    DbError::new(code, message).with_cause(raw)
}

/// Classify and then narrow `UNKNOWN` to the operation's failure code
pub fn classify_operation(
    error: &(dyn StdError + 'static),
    kind: OperationKind,
    context: Option<&str>,
) -> DbError {
    let mut classified = classify(error, context);
    if classified.code == ErrorCode::Unknown {
        classified.code = kind.failure_code();
    }
    classified
}

/// Map an error message onto a taxonomy code by signature matching
///
/// Ordering matters: timeout indicators are checked before the generic
/// network signatures because driver timeout texts often mention the
/// network too.
fn classify_message(raw: &str) -> ErrorCode {
    let msg = raw.to_lowercase();

    let duplicate = ["duplicate key", "e11000", "duplicate entry"];
    if duplicate.iter().any(|s| msg.contains(s)) {
        return ErrorCode::DuplicateKey;
    }

    let auth = [
        "authentication failed",
        "auth failed",
        "not authorized",
        "unauthorized",
        "scram",
        "bad auth",
        "permission denied",
    ];
    if auth.iter().any(|s| msg.contains(s)) {
        return ErrorCode::AuthFailed;
    }

    let timeout = [
        "timed out",
        "etimedout",
        "esockettimedout",
        "timeout",
        "deadline has elapsed",
    ];
    if timeout.iter().any(|s| msg.contains(s)) {
        return ErrorCode::ConnectionTimeout;
    }

    let network = [
        "econnrefused",
        "connection refused",
        "connection reset",
        "connection closed",
        "no reachable servers",
        "failed to connect",
        "getaddrinfo",
        "dns error",
        "network",
    ];
    if network.iter().any(|s| msg.contains(s)) {
        return ErrorCode::ConnectionFailed;
    }

    let invalid_uri = [
        "invalid connection string",
        "connection string",
        "invalid uri",
        "unsupported scheme",
        "invalid scheme",
    ];
    if invalid_uri.iter().any(|s| msg.contains(s)) {
        return ErrorCode::InvalidUri;
    }

    let validation = ["validation failed", "failed validation", "invalid field", "required field"];
    if validation.iter().any(|s| msg.contains(s)) {
        return ErrorCode::ValidationFailed;
    }

    ErrorCode::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct FakeDriverError(String);

    impl fmt::Display for FakeDriverError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl StdError for FakeDriverError {}

    fn classify_text(text: &str) -> DbError {
        classify(&FakeDriverError(text.to_string()), None)
    }

    #[test]
    fn test_already_classified_passes_through() {
        let original = DbError::validation("price must be positive");
        let reclassified = classify(&original, Some("create subscription"));

        assert_eq!(reclassified.code, ErrorCode::ValidationFailed);
        assert_eq!(reclassified.message, "price must be positive");
    }

    #[test]
    fn test_duplicate_key_detection() {
        let err = classify_text("E11000 duplicate key error collection: subtrack.subscriptions");
        assert_eq!(err.code, ErrorCode::DuplicateKey);
    }

    #[test]
    fn test_auth_detection() {
        assert_eq!(
            classify_text("SCRAM failure: bad auth").code,
            ErrorCode::AuthFailed
        );
        assert_eq!(
            classify_text("command find not authorized on subtrack").code,
            ErrorCode::AuthFailed
        );
    }

    #[test]
    fn test_timeout_checked_before_network() {
        // Mentions the network but is a timeout; must classify as timeout.
        let err = classify_text("server selection timed out, no reachable servers");
        assert_eq!(err.code, ErrorCode::ConnectionTimeout);
    }

    #[test]
    fn test_timeout_message_is_fixed() {
        let err = classify_text("connection pool timed out waiting for socket 0x7f: ETIMEDOUT");
        assert_eq!(err.code, ErrorCode::ConnectionTimeout);
        assert_eq!(err.message, ErrorCode::ConnectionTimeout.user_message());
        assert!(err.cause.as_deref().unwrap().contains("ETIMEDOUT"));
    }

    #[test]
    fn test_network_detection() {
        assert_eq!(
            classify_text("ECONNREFUSED 127.0.0.1:27017").code,
            ErrorCode::ConnectionFailed
        );
        assert_eq!(
            classify_text("failed to connect to primary").code,
            ErrorCode::ConnectionFailed
        );
    }

    #[test]
    fn test_invalid_uri_detection() {
        assert_eq!(
            classify_text("invalid connection string: missing host").code,
            ErrorCode::InvalidUri
        );
    }

    #[test]
    fn test_validation_detection() {
        assert_eq!(
            classify_text("document failed validation").code,
            ErrorCode::ValidationFailed
        );
    }

    #[test]
    fn test_unknown_fallback_with_context() {
        let err = classify(
            &FakeDriverError("something odd happened".to_string()),
            Some("load subscriptions"),
        );
        assert_eq!(err.code, ErrorCode::Unknown);
        assert_eq!(err.message, "load subscriptions: something odd happened");
    }

    #[test]
    fn test_operation_narrowing() {
        let raw = FakeDriverError("something odd happened".to_string());

        assert_eq!(
            classify_operation(&raw, OperationKind::Create, None).code,
            ErrorCode::CreateFailed
        );
        assert_eq!(
            classify_operation(&raw, OperationKind::Update, None).code,
            ErrorCode::UpdateFailed
        );
        assert_eq!(
            classify_operation(&raw, OperationKind::Delete, None).code,
            ErrorCode::DeleteFailed
        );
        assert_eq!(
            classify_operation(&raw, OperationKind::Read, None).code,
            ErrorCode::QueryFailed
        );
    }

    #[test]
    fn test_operation_narrowing_keeps_specific_codes() {
        let raw = FakeDriverError("E11000 duplicate key error".to_string());
        let err = classify_operation(&raw, OperationKind::Create, None);
        assert_eq!(err.code, ErrorCode::DuplicateKey);
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorCode::ConnectionFailed.http_status(), 503);
        assert_eq!(ErrorCode::ConnectionTimeout.http_status(), 503);
        assert_eq!(ErrorCode::ValidationFailed.http_status(), 400);
        assert_eq!(ErrorCode::DuplicateKey.http_status(), 409);
        assert_eq!(ErrorCode::QueryFailed.http_status(), 500);
        assert_eq!(ErrorCode::Unknown.http_status(), 500);
    }

    #[test]
    fn test_error_body_hides_details_in_production() {
        let err = DbError::connection_failed("connect ECONNREFUSED 10.0.0.5:27017")
            .with_cause("io error");

        let prod = err.to_body(&Environment::Production);
        assert!(!prod.success);
        assert_eq!(prod.error, ErrorCode::ConnectionFailed.user_message());
        assert!(prod.details.is_none());

        let dev = err.to_body(&Environment::Development);
        assert!(dev.details.is_some());
    }

    #[test]
    fn test_code_wire_format() {
        let json = serde_json::to_string(&ErrorCode::ConnectionTimeout).unwrap();
        assert_eq!(json, "\"CONNECTION_TIMEOUT\"");
        assert_eq!(ErrorCode::DuplicateKey.as_str(), "DUPLICATE_KEY");
    }
}

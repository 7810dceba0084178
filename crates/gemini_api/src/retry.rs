use std::time::Duration;

use crate::error::{Endpoint, ErrorKind, GeminiError, KnownErrorCode};

/// Transparent retries allowed per top-level call (AUTH only).
pub const MAX_AUTH_RETRIES: u32 = 1;
/// Base delay before the first rotation backoff retry.
pub const BASE_DELAY_MS: u64 = 1000;
/// Ceiling for rotation backoff.
pub const MAX_DELAY: Duration = Duration::from_secs(30);

/// What the caller should do with a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Surface,
    RefreshAndRetry,
}

/// Retry discipline: only AUTH earns a refresh, and only once per call.
pub fn decide(kind: ErrorKind, retries_used: u32) -> RetryDecision {
    match kind {
        ErrorKind::Auth if retries_used < MAX_AUTH_RETRIES => RetryDecision::RefreshAndRetry,
        _ => RetryDecision::Surface,
    }
}

/// Classify an HTTP status; `None` means success.
pub fn classify_status(status: u16) -> Option<ErrorKind> {
    match status {
        200..=299 => None,
        401 => Some(ErrorKind::Auth),
        429 => Some(ErrorKind::RateLimit),
        500..=599 => Some(ErrorKind::Network),
        _ => Some(ErrorKind::Unknown),
    }
}

/// Classify a code decoded from the inner error slot.
pub fn classify_inner_code(code: i64) -> ErrorKind {
    match KnownErrorCode::from_code(code) {
        KnownErrorCode::UsageLimit => ErrorKind::RateLimit,
        KnownErrorCode::ModelInconsistent | KnownErrorCode::ModelHeaderInvalid => {
            ErrorKind::ModelInvalid
        }
        KnownErrorCode::IpBlocked => ErrorKind::Network,
        KnownErrorCode::AntibotChallenge => ErrorKind::Antibot,
        KnownErrorCode::Unknown(_) => ErrorKind::Unknown,
    }
}

/// Build the error for an inner code with a message naming the cause.
pub fn inner_code_error(endpoint: Endpoint, code: i64) -> GeminiError {
    let message = match KnownErrorCode::from_code(code) {
        KnownErrorCode::UsageLimit => "usage limit reached for the selected model".to_owned(),
        KnownErrorCode::ModelInconsistent => {
            "model is inconsistent with this conversation".to_owned()
        }
        KnownErrorCode::ModelHeaderInvalid => "model selection header was rejected".to_owned(),
        KnownErrorCode::IpBlocked => "requests from this IP address are blocked".to_owned(),
        KnownErrorCode::AntibotChallenge => {
            "anti-bot verification token required by the service".to_owned()
        }
        KnownErrorCode::Unknown(code) => format!("service returned error code {code}"),
    };
    GeminiError::new(classify_inner_code(code), endpoint, message).with_code(code)
}

/// Build the error for a non-success HTTP status.
pub fn status_error(endpoint: Endpoint, status: u16, body: &str) -> GeminiError {
    let kind = classify_status(status).unwrap_or(ErrorKind::Unknown);
    let message = match kind {
        ErrorKind::Auth => "request rejected as unauthenticated".to_owned(),
        ErrorKind::RateLimit => "too many requests".to_owned(),
        _ => format!("unexpected HTTP status {status}"),
    };
    GeminiError::new(kind, endpoint, message)
        .with_status(status)
        .with_body(body)
}

/// Rotation keeps its cadence but backs off on throttling and server faults.
pub fn is_retryable_rotation_status(status: u16) -> bool {
    matches!(status, 429 | 500..=599)
}

/// Compute exponential backoff delay for a retry attempt, capped at [`MAX_DELAY`].
pub fn retry_delay(attempt: u32) -> Duration {
    let exponent = attempt.min(30);
    let delay = Duration::from_millis(BASE_DELAY_MS.saturating_mul(2u64.saturating_pow(exponent)));
    delay.min(MAX_DELAY)
}

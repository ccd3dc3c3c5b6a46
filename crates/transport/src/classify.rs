//! Failure classification for backend responses
//!
//! Separates credentials that are out of credit (429/402 with a quota message)
//! from generic rate limiting and from credentials the backend refuses
//! outright. The dispatcher rotates on every failure regardless; the
//! classification feeds logs, metrics, and telemetry.

use crate::ErrorClassification;

/// Message fragments that mark a credential's credit or quota as used up.
const QUOTA_PATTERNS: &[&str] = &[
    "quota",
    "insufficient credit",
    "out of credits",
    "not enough credits",
    "usage limit",
    "insufficient balance",
];

/// Classify a 429 body as quota exhaustion or a transient rate limit.
pub fn classify_429(body: &str) -> ErrorClassification {
    let lower = body.to_lowercase();
    for pattern in QUOTA_PATTERNS {
        if lower.contains(pattern) {
            return ErrorClassification::QuotaExceeded;
        }
    }
    ErrorClassification::Transient
}

/// Classify a failed response by HTTP status and body.
///
/// 401/403 reject the credential, 402 is always a quota problem, 429 depends
/// on the body, everything else is transient.
pub fn classify_status(status: u16, body: &str) -> ErrorClassification {
    match status {
        401 | 403 => ErrorClassification::Rejected,
        402 => ErrorClassification::QuotaExceeded,
        429 => classify_429(body),
        _ => ErrorClassification::Transient,
    }
}

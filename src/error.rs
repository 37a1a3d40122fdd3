use std::time::Duration;

use axum::http::StatusCode;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("record {0} not found")]
    NotFound(Uuid),
    #[error("a capture placeholder is already pending")]
    PlaceholderPending,
    #[error("ledger io: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger serialization: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Why a capture did not produce records.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("another capture is still being analyzed")]
    Busy,
    #[error("food analysis timed out after {0:?}")]
    InferenceTimeout(Duration),
    #[error("food analysis failed: {0:#}")]
    InferenceTransport(anyhow::Error),
    #[error("no food detected")]
    InferenceEmptyResult,
    #[error("capture task aborted: {0}")]
    Aborted(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl CaptureError {
    /// A successful analysis that found nothing, as opposed to a failure.
    pub fn is_not_detected(&self) -> bool {
        matches!(self, CaptureError::InferenceEmptyResult)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            CaptureError::Busy => StatusCode::CONFLICT,
            CaptureError::InferenceTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CaptureError::InferenceTransport(_) => StatusCode::BAD_GATEWAY,
            CaptureError::InferenceEmptyResult => StatusCode::UNPROCESSABLE_ENTITY,
            CaptureError::Aborted(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CaptureError::Ledger(e) => e.status(),
        }
    }
}

impl LedgerError {
    pub fn status(&self) -> StatusCode {
        match self {
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::PlaceholderPending => StatusCode::CONFLICT,
            LedgerError::Io(_) | LedgerError::Serialize(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Handler-side mapping, matching the `(StatusCode, String)` rejection shape.
pub fn ledger_rejection(e: LedgerError) -> (StatusCode, String) {
    if matches!(e, LedgerError::Io(_) | LedgerError::Serialize(_)) {
        tracing::error!(error = %e, "ledger operation failed");
    }
    (e.status(), e.to_string())
}

pub fn capture_rejection(e: CaptureError) -> (StatusCode, String) {
    (e.status(), e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_statuses_are_distinct_from_not_detected() {
        let not_detected = CaptureError::InferenceEmptyResult;
        assert!(not_detected.is_not_detected());
        assert_eq!(not_detected.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let timeout = CaptureError::InferenceTimeout(Duration::from_secs(30));
        assert!(!timeout.is_not_detected());
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);

        let transport = CaptureError::InferenceTransport(anyhow::anyhow!("tls handshake"));
        assert_eq!(transport.status(), StatusCode::BAD_GATEWAY);
        assert!(transport.to_string().contains("tls handshake"));
    }

    #[test]
    fn ledger_errors_map_through() {
        let id = Uuid::new_v4();
        let e = CaptureError::from(LedgerError::NotFound(id));
        assert_eq!(e.status(), StatusCode::NOT_FOUND);
        assert!(e.to_string().contains(&id.to_string()));
    }
}

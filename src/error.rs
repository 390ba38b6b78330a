//! Error taxonomy for the coordinator (spec §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("host is unreachable: {0}")]
    HostUnreachable(String),

    #[error("host rejected the contract: {0}")]
    HostBusinessRejection(String),

    #[error("host did not reply within the timeout window")]
    HostTimeout,

    #[error("local signature failed: {0}")]
    LocalSignFailure(String),

    #[error("missing configuration: {0}")]
    ConfigMissing(String),

    #[error("peer public key could not be decoded: {0}")]
    InvalidPeerKey(String),

    #[error("host pool exhausted")]
    HostPoolExhausted,

    #[error("escrow RPC failed: {0}")]
    EscrowRpcFailure(String),

    #[error("escrow signature did not verify")]
    EscrowSignatureInvalid,

    #[error("guard RPC failed: {0}")]
    GuardRpcFailure(String),

    #[error("illegal session state transition: {from:?} -> {to:?}")]
    BadState { from: String, to: String },

    #[error("session cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl UploadError {
    /// Whether the shard-worker retry envelope should retry this error
    /// against a fresh host, per spec §7's recovery table.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UploadError::HostUnreachable(_)
                | UploadError::HostBusinessRejection(_)
                | UploadError::HostTimeout
        )
    }

    /// Errors that are locally swallowed and never surfaced to the user.
    pub fn is_silent(&self) -> bool {
        matches!(self, UploadError::BadState { .. } | UploadError::Cancelled)
    }
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Error type for the status/metrics HTTP surface (§2 ambient additions).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Upload(#[from] UploadError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Upload(e) => {
                tracing::error!(error = %e, "status API: upload error");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };

        let body = json!({
            "error": {
                "code": status.as_u16(),
                "message": message,
            }
        });

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

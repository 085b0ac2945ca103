//! HTTP error surface of the proxy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors surfaced to buyers over HTTP.
///
/// Each variant maps to a status code and a stable machine-readable code
/// in the JSON body: `{ "error": { "code", "message" } }`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProxyError {
    /// `POST /mcp` without a `target` query parameter.
    #[error("missing target query parameter")]
    MissingTarget,

    /// The target does not parse as an absolute URL.
    #[error("target is not a valid absolute URL")]
    InvalidUrl,

    /// The target URL uses a scheme other than http/https.
    #[error("target protocol must be http or https")]
    InvalidProtocol,

    /// A non-initialize message arrived without a session id header.
    #[error("missing mcp-session-id header")]
    MissingSession,

    /// The session id does not name a live session.
    #[error("unknown session id")]
    SessionNotFound,

    /// The session closed while the request was in flight.
    #[error("session closed")]
    SessionClosed,

    /// Anything unexpected.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingTarget => "MISSING_TARGET",
            Self::InvalidUrl => "INVALID_URL",
            Self::InvalidProtocol => "INVALID_PROTOCOL",
            Self::MissingSession => "MISSING_SESSION",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::SessionClosed => "SESSION_CLOSED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    const fn status(&self) -> StatusCode {
        match self {
            Self::MissingTarget
            | Self::InvalidUrl
            | Self::InvalidProtocol
            | Self::MissingSession => StatusCode::BAD_REQUEST,
            Self::SessionNotFound => StatusCode::NOT_FOUND,
            Self::SessionClosed | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": { "code": self.code(), "message": self.to_string() }
        });
        (self.status(), axum::Json(body)).into_response()
    }
}

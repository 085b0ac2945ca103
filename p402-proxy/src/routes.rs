//! Axum handlers for the proxy's HTTP surface.
//!
//! - `POST /mcp?target=<upstream-url>` — send an MCP message. The first
//!   message of a session must be `initialize`; the response carries the
//!   proxy-issued `mcp-session-id` header, which the buyer echoes on every
//!   later message.
//! - `DELETE /mcp` — explicit session termination.
//! - `GET /health` — liveness probe.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use serde::Deserialize;
use serde_json::Value;

use p402_bridge::{
    Bridge, ServerHttpTransport, ServerReply, TransportError, UpstreamHttpTransport,
    X402Middleware,
};
use p402_proto::jsonrpc;
use p402_treasurer::Treasurer;

use crate::SESSION_ID_HEADER;
use crate::error::ProxyError;
use crate::session::{Session, SessionRegistry};
use crate::validation::validate_target_url;

/// Shared application state.
pub struct AppState {
    /// Process-wide session registry.
    pub registry: SessionRegistry,
    /// Treasurer shared by all bridges.
    pub treasurer: Arc<dyn Treasurer>,
    /// Per-bridge in-flight request ceiling.
    pub max_pending: usize,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("sessions", &self.registry.len())
            .field("max_pending", &self.max_pending)
            .finish_non_exhaustive()
    }
}

/// Shared state handle.
pub type SharedState = Arc<AppState>;

/// Builds the proxy router.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/mcp", routing::post(post_mcp).delete(delete_mcp))
        .route("/health", routing::get(health))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
struct McpQuery {
    target: Option<String>,
}

/// `POST /mcp` — dispatch one MCP message into its session, creating the
/// session on `initialize`.
async fn post_mcp(
    State(state): State<SharedState>,
    Query(query): Query<McpQuery>,
    headers: HeaderMap,
    Json(message): Json<Value>,
) -> Result<Response, ProxyError> {
    let header_session = headers
        .get(SESSION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    // Existing session: hand the message to its bridge.
    if let Some(session_id) = &header_session
        && let Some(session) = state.registry.get(session_id)
    {
        let reply = session.transport.handle_message(message).await;
        return respond(reply, Some(session_id.clone()));
    }

    // No (live) session. Only an initialize may open one; a stale session
    // id on a non-initialize message is the buyer's error.
    if jsonrpc::method(&message) != Some("initialize") {
        return Err(if header_session.is_some() {
            ProxyError::SessionNotFound
        } else {
            ProxyError::MissingSession
        });
    }

    let target = query.target.ok_or(ProxyError::MissingTarget)?;
    let target = validate_target_url(&target)?;
    tracing::info!(target = %target, "creating session");

    let transport = Arc::new(ServerHttpTransport::new());
    let upstream = Arc::new(
        UpstreamHttpTransport::new(target).map_err(|e| ProxyError::Internal(e.to_string()))?,
    );
    let middleware = X402Middleware::new(state.treasurer.clone());
    let bridge = Bridge::with_max_pending(
        transport.clone(),
        upstream,
        middleware,
        state.max_pending,
    );

    // Register the session the moment the transport issues its id, and
    // deregister whenever the bridge closes (explicit DELETE, upstream
    // close, or error escalation).
    {
        let registry = state.registry.clone();
        let bridge = bridge.clone();
        let session_transport = transport.clone();
        transport.on_session_initialized(move |session_id| {
            bridge.middleware().set_session_id(session_id.clone());
            {
                let registry = registry.clone();
                let session_id = session_id.clone();
                bridge.set_on_close(move || {
                    registry.remove(&session_id);
                    tracing::info!(session_id, "session closed");
                });
            }
            registry.insert(
                session_id,
                Session {
                    bridge: bridge.clone(),
                    transport: session_transport,
                },
            );
        });
    }

    bridge
        .start()
        .await
        .map_err(|e| ProxyError::Internal(e.to_string()))?;

    let reply = transport.handle_message(message).await;
    respond(reply, transport.session_id())
}

/// `DELETE /mcp` — terminate a session.
async fn delete_mcp(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Response, ProxyError> {
    let session_id = headers
        .get(SESSION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(ProxyError::MissingSession)?;

    let session = state
        .registry
        .remove(session_id)
        .ok_or(ProxyError::SessionNotFound)?;

    session.bridge.close().await;
    tracing::info!(session_id, "session deleted");
    Ok(StatusCode::OK.into_response())
}

fn respond(
    reply: Result<ServerReply, TransportError>,
    session_id: Option<String>,
) -> Result<Response, ProxyError> {
    match reply {
        Ok(ServerReply::Response(body)) => {
            let mut response = (StatusCode::OK, Json(body)).into_response();
            if let Some(session_id) = session_id
                && let Ok(value) = HeaderValue::from_str(&session_id)
            {
                response.headers_mut().insert(SESSION_ID_HEADER, value);
            }
            Ok(response)
        }
        Ok(ServerReply::Accepted) => Ok(StatusCode::ACCEPTED.into_response()),
        Err(TransportError::Closed) => Err(ProxyError::SessionClosed),
        Err(e) => Err(ProxyError::Internal(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use p402_proto::{BoxFuture, PaymentRequirements};
    use p402_treasurer::{Authorization, PaymentContext, PaymentStatus, TreasurerError};

    struct DeclineAll;

    impl Treasurer for DeclineAll {
        fn on_payment_required(
            &self,
            _accepts: &[PaymentRequirements],
            _context: &PaymentContext,
        ) -> BoxFuture<'_, Result<Option<Authorization>, TreasurerError>> {
            Box::pin(async { Ok(None) })
        }

        fn on_status(
            &self,
            _status: PaymentStatus,
            _authorization: &Authorization,
            _context: &PaymentContext,
        ) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
    }

    fn test_router() -> Router {
        router(Arc::new(AppState {
            registry: SessionRegistry::new(),
            treasurer: Arc::new(DeclineAll),
            max_pending: 16,
        }))
    }

    fn post(uri: &str, headers: &[(&str, &str)], body: Value) -> Request<Body> {
        let mut request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        request.body(Body::from(body.to_string())).unwrap()
    }

    async fn error_code(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        value["error"]["code"].as_str().unwrap().to_owned()
    }

    fn initialize() -> Value {
        serde_json::json!({"jsonrpc": "2.0", "id": 0, "method": "initialize", "params": {}})
    }

    #[tokio::test]
    async fn test_post_without_target_is_400() {
        let response = test_router()
            .oneshot(post("/mcp", &[], initialize()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "MISSING_TARGET");
    }

    #[tokio::test]
    async fn test_post_with_bad_protocol_is_400() {
        let response = test_router()
            .oneshot(post("/mcp?target=ftp://example.com", &[], initialize()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "INVALID_PROTOCOL");
    }

    #[tokio::test]
    async fn test_post_with_unparseable_target_is_400() {
        let response = test_router()
            .oneshot(post("/mcp?target=not%20a%20url", &[], initialize()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "INVALID_URL");
    }

    #[tokio::test]
    async fn test_non_initialize_without_session_is_400() {
        let message =
            serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {}});
        let response = test_router()
            .oneshot(post("/mcp?target=http://localhost:9", &[], message))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "MISSING_SESSION");
    }

    #[tokio::test]
    async fn test_stale_session_id_is_404() {
        let message =
            serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {}});
        let response = test_router()
            .oneshot(post(
                "/mcp?target=http://localhost:9",
                &[(SESSION_ID_HEADER, "deadbeef")],
                message,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(error_code(response).await, "SESSION_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_delete_without_header_is_400() {
        let request = Request::builder()
            .method("DELETE")
            .uri("/mcp")
            .body(Body::empty())
            .unwrap();
        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_unknown_session_is_404() {
        let request = Request::builder()
            .method("DELETE")
            .uri("/mcp")
            .header(SESSION_ID_HEADER, "no-such-session")
            .body(Body::empty())
            .unwrap();
        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health() {
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

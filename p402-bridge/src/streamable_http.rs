//! Upstream-facing streamable-HTTP client transport.
//!
//! Each JSON-RPC message is POSTed to the target URL. The upstream may
//! answer with a single JSON body, an SSE body carrying one or more
//! messages, or 202 Accepted for notifications. The upstream's
//! `mcp-session-id` is captured from the first response and echoed on
//! every subsequent request; `close` sends a best-effort DELETE with it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use url::Url;

use p402_proto::BoxFuture;

use crate::transport::{Transport, TransportError, TransportEvents};

const SESSION_ID_HEADER: &str = "mcp-session-id";
const ACCEPT_TYPES: &str = "application/json, text/event-stream";
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client transport toward the upstream MCP server.
pub struct UpstreamHttpTransport {
    http: reqwest::Client,
    target: Url,
    session_id: Mutex<Option<String>>,
    events: Mutex<Option<Arc<dyn TransportEvents>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for UpstreamHttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamHttpTransport")
            .field("target", &self.target.as_str())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl UpstreamHttpTransport {
    /// Creates a transport POSTing to `target`.
    ///
    /// No overall request timeout is set: upstream tool calls may
    /// legitimately run long, and upstream-imposed timeouts propagate as
    /// error responses.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Http`] if the HTTP client cannot be built.
    pub fn new(target: Url) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            target,
            session_id: Mutex::new(None),
            events: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// The upstream-issued session id, once one has been captured.
    #[must_use]
    pub fn upstream_session_id(&self) -> Option<String> {
        self.session_id.lock().expect("session id lock poisoned").clone()
    }

    fn events(&self) -> Option<Arc<dyn TransportEvents>> {
        self.events.lock().expect("events lock poisoned").clone()
    }

    async fn dispatch(&self, message: Value) {
        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!("dropping upstream message on closed transport");
            return;
        }
        if let Some(events) = self.events() {
            events.on_message(message).await;
        }
    }
}

impl Transport for UpstreamHttpTransport {
    fn start(&self, events: Arc<dyn TransportEvents>) -> BoxFuture<'_, Result<(), TransportError>> {
        *self.events.lock().expect("events lock poisoned") = Some(events);
        Box::pin(async { Ok(()) })
    }

    fn send(&self, message: Value) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }

            let mut request = self
                .http
                .post(self.target.clone())
                .header(reqwest::header::ACCEPT, ACCEPT_TYPES)
                .json(&message);
            if let Some(session_id) = self.upstream_session_id() {
                request = request.header(SESSION_ID_HEADER, session_id);
            }

            let response = request.send().await?;

            if let Some(session_id) = response
                .headers()
                .get(SESSION_ID_HEADER)
                .and_then(|value| value.to_str().ok())
            {
                let mut slot = self.session_id.lock().expect("session id lock poisoned");
                if slot.as_deref() != Some(session_id) {
                    tracing::debug!(session_id, "captured upstream session id");
                    *slot = Some(session_id.to_owned());
                }
            }

            let status = response.status();
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_owned();
            let body = response.text().await?;

            if !status.is_success() {
                // Some servers deliver JSON-RPC errors on HTTP error
                // statuses; those still belong to the message flow.
                if let Ok(value) = serde_json::from_str::<Value>(&body)
                    && value.get("jsonrpc").is_some()
                {
                    self.dispatch(value).await;
                    return Ok(());
                }
                return Err(TransportError::Status {
                    status: status.as_u16(),
                    message: body,
                });
            }

            if content_type.starts_with("text/event-stream") {
                for message in parse_sse_messages(&body) {
                    self.dispatch(message).await;
                }
            } else if !body.trim().is_empty() {
                let value = serde_json::from_str::<Value>(&body)
                    .map_err(|e| TransportError::Malformed(e.to_string()))?;
                self.dispatch(value).await;
            }
            // 202/empty body: notification accepted, nothing to dispatch.

            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            *self.events.lock().expect("events lock poisoned") = None;

            // Best effort: tell the upstream its session is over.
            if let Some(session_id) = self.upstream_session_id() {
                let result = self
                    .http
                    .delete(self.target.clone())
                    .header(SESSION_ID_HEADER, &session_id)
                    .timeout(CLOSE_TIMEOUT)
                    .send()
                    .await;
                if let Err(e) = result {
                    tracing::debug!(error = %e, "upstream session delete failed");
                }
            }
        })
    }
}

/// Extracts JSON messages from an SSE body.
///
/// Only `data:` fields matter here; event names and ids are ignored.
/// Multi-line data within one event is joined with newlines, as the
/// event-stream format requires, before parsing.
fn parse_sse_messages(body: &str) -> Vec<Value> {
    let mut messages = Vec::new();
    let mut data = String::new();

    let mut flush = |data: &mut String| {
        if data.is_empty() {
            return;
        }
        match serde_json::from_str::<Value>(data) {
            Ok(value) => messages.push(value),
            Err(e) => tracing::debug!(error = %e, "skipping non-JSON SSE event"),
        }
        data.clear();
    };

    for line in body.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
        } else if line.is_empty() {
            flush(&mut data);
        }
    }
    flush(&mut data);

    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_single_sse_event() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n";
        let messages = parse_sse_messages(body);
        assert_eq!(messages, vec![json!({"jsonrpc": "2.0", "id": 1, "result": {}})]);
    }

    #[test]
    fn test_parse_multiple_sse_events() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"ok\":true}}\n\n";
        let messages = parse_sse_messages(body);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["id"], 2);
    }

    #[test]
    fn test_parse_multiline_data() {
        let body = "data: {\"jsonrpc\":\"2.0\",\ndata: \"id\":3,\"result\":{}}\n\n";
        let messages = parse_sse_messages(body);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["id"], 3);
    }

    #[test]
    fn test_non_json_events_are_skipped() {
        let body = "data: ping\n\ndata: {\"jsonrpc\":\"2.0\",\"id\":4,\"result\":{}}\n\n";
        let messages = parse_sse_messages(body);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["id"], 4);
    }

    #[test]
    fn test_unterminated_final_event_is_flushed() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"id\":5,\"result\":{}}";
        let messages = parse_sse_messages(body);
        assert_eq!(messages.len(), 1);
    }
}

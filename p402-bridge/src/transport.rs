//! The message-dispatch interface between a bridge and its transports.
//!
//! A transport moves opaque JSON-RPC messages between the bridge and one
//! peer (buyer client or upstream server). The bridge registers a
//! [`TransportEvents`] sink via [`Transport::start`]; the transport holds
//! that sink as its only back-reference and clears it on close, so
//! transports never own their bridge.

use std::sync::Arc;

use serde_json::Value;

use p402_proto::BoxFuture;

/// Errors surfaced by transports.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The transport was closed (or never started).
    #[error("transport is closed")]
    Closed,

    /// The underlying HTTP request failed.
    #[error("transport I/O error: {0}")]
    Http(String),

    /// The peer answered with a non-success HTTP status and no JSON-RPC body.
    #[error("peer returned HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, verbatim.
        message: String,
    },

    /// The peer sent something that is not a JSON-RPC message.
    #[error("malformed message: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

/// Event sink a transport delivers into.
///
/// Implemented by the bridge (one sink per direction). All callbacks are
/// fire-and-forget from the transport's perspective; a sink that needs to
/// reject a message does so by sending an error back through the
/// transport, not by failing the callback.
pub trait TransportEvents: Send + Sync {
    /// A complete JSON-RPC message arrived from the peer.
    fn on_message(&self, message: Value) -> BoxFuture<'_, ()>;

    /// The transport hit an error it could not attribute to a single
    /// message. The transport stays open; the sink decides what to do.
    fn on_error(&self, error: TransportError) -> BoxFuture<'_, ()>;

    /// The transport is closed and will deliver no further messages.
    fn on_close(&self) -> BoxFuture<'_, ()>;
}

/// One side of a bridge.
pub trait Transport: Send + Sync {
    /// Registers the event sink and makes the transport live.
    ///
    /// Calling `start` twice replaces the sink; transports are started
    /// exactly once by their bridge.
    fn start(&self, events: Arc<dyn TransportEvents>) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Sends one JSON-RPC message to the peer.
    fn send(&self, message: Value) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Closes the transport. Idempotent; drops the event sink.
    fn close(&self) -> BoxFuture<'_, ()>;
}

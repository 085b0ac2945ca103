//! Session bridging for the p402 payment proxy.
//!
//! A [`Bridge`] pairs a buyer-facing transport with an upstream-facing
//! transport and forwards JSON-RPC messages in both directions. Responses
//! flow through the [`X402Middleware`], which turns 402 payment-required
//! errors into signed payment retries and correlates settlement reports
//! back to the treasurer. The buyer never sees the payment machinery: 402s
//! that get paid are suppressed, retries run under synthetic ids, and
//! replies are re-keyed to the buyer's original ids before delivery.
//!
//! # Modules
//!
//! - [`transport`] — The message-dispatch interface both sides implement
//! - [`middleware`] — 402 detection, payment creation, settle correlation
//! - [`bridge`] — Pending-request tracking, retry ids, close/error plumbing
//! - [`streamable_http`] — Upstream-facing HTTP client transport
//! - [`server_transport`] — Buyer-facing transport fed by the HTTP server

pub mod bridge;
pub mod middleware;
pub mod server_transport;
pub mod streamable_http;
pub mod transport;

pub use bridge::{BACKPRESSURE_ERROR_CODE, Bridge, DEFAULT_MAX_PENDING};
pub use middleware::{MiddlewareError, X402Middleware};
pub use server_transport::{ServerHttpTransport, ServerReply};
pub use streamable_http::UpstreamHttpTransport;
pub use transport::{Transport, TransportError, TransportEvents};

//! Wire format types for the p402 payment proxy.
//!
//! This crate defines the serialization-level data structures of the x402
//! payment flow as it appears inside MCP JSON-RPC traffic, plus the envelope
//! utilities the proxy needs to bridge messages between a buyer client and
//! an upstream server. It has minimal dependencies (only `serde` and
//! `serde_json`) and is the shared "lingua franca" across the p402 stack.
//!
//! # Modules
//!
//! - [`types`] — Payment types (`PaymentRequirements`, `PaymentPayload`, `SettleResponse`, …)
//! - [`jsonrpc`] — JSON-RPC 2.0 envelope accessors, `_meta` helpers, response classification
//! - [`timestamp`] — String-serialized Unix timestamps for authorization windows

pub mod jsonrpc;
pub mod timestamp;
pub mod types;

pub use jsonrpc::{MessageClass, RequestId};
pub use types::{
    ExactAuthorization, ExactPayload, PaymentPayload, PaymentRequired, PaymentRequirements,
    SettleResponse,
};

/// Protocol version emitted in every payment payload.
pub const X402_VERSION: u32 = 1;

/// The only payment scheme the proxy can satisfy.
pub const EXACT_SCHEME: &str = "exact";

/// JSON-RPC error code for payment required (x402).
pub const PAYMENT_REQUIRED_CODE: i64 = 402;

/// Request `_meta` key carrying a payment payload (buyer → upstream).
pub const PAYMENT_META_KEY: &str = "x402/payment";

/// Result `_meta` key carrying a settlement response (upstream → buyer).
pub const PAYMENT_RESPONSE_META_KEY: &str = "x402/payment-response";

/// Proxy-private request `_meta` key binding a retry to its authorization.
pub const PAYMENT_ID_META_KEY: &str = "p402/paymentId";

/// Proxy-private request `_meta` key holding the buyer's original JSON-RPC id
/// while a payment retry is in flight.
pub const ORIGINAL_ID_META_KEY: &str = "p402/original-id";

/// Prefix of JSON-RPC ids minted for payment retries. A well-behaved client
/// never produces ids with this prefix.
pub const RETRY_ID_PREFIX: &str = "retry_with_payment__";

/// Boxed future used by the dyn-compatible traits across the p402 stack.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

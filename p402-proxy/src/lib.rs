//! Transparent x402 payment proxy for MCP servers.
//!
//! The proxy sits between a buyer agent and any MCP server. The buyer
//! speaks plain MCP over streamable HTTP to `POST /mcp?target=<upstream>`;
//! the proxy forwards traffic to the upstream, and when the upstream
//! demands payment with an x402 402 error, the proxy signs a payment,
//! retries the call, and hands the buyer the final result. The buyer never
//! sees a payment artefact.
//!
//! # Modules
//!
//! - [`config`] — Environment configuration and wallet/treasurer wiring
//! - [`validation`] — Target URL validation
//! - [`session`] — Process-wide session registry
//! - [`routes`] — Axum handlers for `POST /mcp` and `DELETE /mcp`
//! - [`error`] — HTTP error surface with machine-readable codes

pub mod config;
pub mod error;
pub mod routes;
pub mod session;
pub mod validation;

pub use config::ProxyConfig;
pub use error::ProxyError;
pub use routes::{AppState, router};
pub use session::{Session, SessionRegistry};

/// Header carrying the MCP session id on both surfaces of the proxy.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

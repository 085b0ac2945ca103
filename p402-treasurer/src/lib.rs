//! Payment policy layer for the p402 payment proxy.
//!
//! A [`Treasurer`] decides *whether* to pay when an upstream demands
//! payment, and *which* of the offered requirements to satisfy. Payload
//! creation is delegated to a [`Wallet`](p402_wallet::Wallet); the
//! treasurer only applies policy and tracks lifecycle status.
//!
//! Two implementations ship with the proxy:
//!
//! - [`NaiveTreasurer`] — auto-approves the first offered requirement.
//! - [`RemoteTreasurer`] — asks a remote policy service which requirements
//!   are within budget and reports payment lifecycle events back to it.
//!
//! One treasurer instance is shared by every bridge in the process, so
//! implementations must be thread-safe.

pub mod api;
pub mod naive;
pub mod remote;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use p402_proto::{BoxFuture, PaymentPayload, PaymentRequirements};
use p402_wallet::WalletError;

pub use api::{ApiClient, ApiError};
pub use naive::NaiveTreasurer;
pub use remote::RemoteTreasurer;

/// A created payment bound to an opaque id.
///
/// The id travels with the retried request (under the proxy's private
/// `_meta` key) so the eventual settle-response can be correlated back to
/// this payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    /// Opaque id, unique within the proxy process.
    pub authorization_id: String,

    /// The signed payment.
    pub payment: PaymentPayload,
}

/// Lifecycle status of a payment, reported to the treasurer best-effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    /// The payment is about to be sent upstream.
    Sending,
    /// The upstream settled the payment successfully.
    Accepted,
    /// The upstream rejected the payment.
    Rejected,
    /// The treasurer itself declined to pay.
    Declined,
    /// The payment failed for a non-settlement reason.
    Error,
}

/// Context accompanying treasurer calls.
///
/// Everything here is advisory; remote policy services use it for audit
/// trails and spend attribution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentContext {
    /// The MCP session this payment belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// JSON-RPC method of the request that triggered the payment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Tool name, when the request is a `tools/call`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// Failure reason, set on `Rejected`/`Error` status reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Errors a treasurer can surface.
///
/// The bridge middleware treats every treasurer error as a decline; these
/// exist so implementations can log precisely what went wrong.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TreasurerError {
    /// The wallet could not create the payment.
    #[error(transparent)]
    Wallet(#[from] WalletError),

    /// The remote policy service failed.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Decides whether and how to satisfy a payment demand.
pub trait Treasurer: Send + Sync {
    /// Called when an upstream responded 402 with the given payment options.
    ///
    /// Returns `Ok(None)` to decline; the buyer then sees the original 402.
    ///
    /// # Errors
    ///
    /// Errors are treated as declines by the caller. Implementations with
    /// their own timeouts should return `Ok(None)` on timeout rather than
    /// an error.
    fn on_payment_required(
        &self,
        accepts: &[PaymentRequirements],
        context: &PaymentContext,
    ) -> BoxFuture<'_, Result<Option<Authorization>, TreasurerError>>;

    /// Best-effort lifecycle notification for a previously created
    /// authorization. Must be idempotent and tolerate out-of-order calls;
    /// must never fail the payment flow.
    fn on_status(
        &self,
        status: PaymentStatus,
        authorization: &Authorization,
        context: &PaymentContext,
    ) -> BoxFuture<'_, ()>;
}

impl<T: Treasurer + ?Sized> Treasurer for Arc<T> {
    fn on_payment_required(
        &self,
        accepts: &[PaymentRequirements],
        context: &PaymentContext,
    ) -> BoxFuture<'_, Result<Option<Authorization>, TreasurerError>> {
        self.as_ref().on_payment_required(accepts, context)
    }

    fn on_status(
        &self,
        status: PaymentStatus,
        authorization: &Authorization,
        context: &PaymentContext,
    ) -> BoxFuture<'_, ()> {
        self.as_ref().on_status(status, authorization, context)
    }
}

/// Mints an authorization id (32 lowercase hex chars).
#[must_use]
pub fn new_authorization_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

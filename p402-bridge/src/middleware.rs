//! x402 middleware: response classification and payment retries.
//!
//! The middleware is a per-bridge message transformer. It never sends
//! anything itself: given an original request and the upstream's response,
//! it either produces a retry request for the bridge to send (payment
//! required and the treasurer approved), resolves an outstanding
//! authorization (settle-response), or stays out of the way.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use serde_json::{Value, json};

use p402_proto::jsonrpc::{self, MessageClass};
use p402_proto::{PAYMENT_ID_META_KEY, PAYMENT_META_KEY};
use p402_treasurer::{Authorization, PaymentContext, PaymentStatus, Treasurer};

/// Errors raised by [`X402Middleware::on_message`].
///
/// These are protocol violations in the payment flow; the bridge reacts by
/// forwarding the original response to the buyer and logging.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MiddlewareError {
    /// A settle-response arrived for a request that carries no payment id.
    #[error("settle-response for a request with no payment id attached")]
    MissingPaymentId,

    /// A settle-response references an authorization this middleware never
    /// issued (or already resolved).
    #[error("settle-response references unknown authorization {0}")]
    UnknownAuthorization(String),

    /// The original request cannot carry `_meta` (params is not an object).
    #[error("request cannot carry _meta")]
    MalformedRequest,

    /// Payment payload serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-bridge payment middleware.
///
/// Holds the authorizations whose settlement reports are still pending,
/// keyed by authorization id. The treasurer is shared process-wide; the
/// pending map is exclusive to this middleware's bridge.
pub struct X402Middleware {
    treasurer: Arc<dyn Treasurer>,
    session_id: OnceLock<String>,
    pending_authorizations: Mutex<HashMap<String, Authorization>>,
}

impl std::fmt::Debug for X402Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X402Middleware")
            .field("session_id", &self.session_id.get())
            .finish_non_exhaustive()
    }
}

impl X402Middleware {
    /// Creates a middleware paying through `treasurer`.
    #[must_use]
    pub fn new(treasurer: Arc<dyn Treasurer>) -> Self {
        Self {
            treasurer,
            session_id: OnceLock::new(),
            pending_authorizations: Mutex::new(HashMap::new()),
        }
    }

    /// Records the MCP session id once it has been issued. Later calls are
    /// ignored; a session id never changes.
    pub fn set_session_id(&self, session_id: String) {
        let _ = self.session_id.set(session_id);
    }

    /// Number of authorizations awaiting settlement.
    #[must_use]
    pub fn pending_authorizations(&self) -> usize {
        self.pending_authorizations
            .lock()
            .expect("authorization map lock poisoned")
            .len()
    }

    /// Discards all outstanding authorizations.
    ///
    /// Called on bridge close; in-flight payments are abandoned without
    /// further status callbacks.
    pub fn drain(&self) -> usize {
        let mut map = self
            .pending_authorizations
            .lock()
            .expect("authorization map lock poisoned");
        let dropped = map.len();
        map.clear();
        dropped
    }

    /// Fails an authorization whose retry never reached the upstream.
    ///
    /// Pops the authorization and reports [`PaymentStatus::Error`] to the
    /// treasurer. A no-op for unknown (already resolved) ids.
    pub async fn fail_authorization(&self, authorization_id: &str, reason: String) {
        let authorization = self
            .pending_authorizations
            .lock()
            .expect("authorization map lock poisoned")
            .remove(authorization_id);
        let Some(authorization) = authorization else {
            return;
        };
        let context = PaymentContext {
            session_id: self.session_id.get().cloned(),
            reason: Some(reason),
            ..PaymentContext::default()
        };
        self.treasurer
            .on_status(PaymentStatus::Error, &authorization, &context)
            .await;
    }

    /// Transforms an upstream response relative to its originating request.
    ///
    /// Returns `Ok(Some(retry))` when the response demanded payment and the
    /// treasurer approved: `retry` is the original request with the signed
    /// payment and the authorization id placed in `params._meta`. The
    /// caller assigns the retry's JSON-RPC id and must not forward the 402
    /// to the buyer. Returns `Ok(None)` when the response should continue
    /// to the buyer as-is.
    ///
    /// # Errors
    ///
    /// Returns [`MiddlewareError`] on payment-flow protocol violations; the
    /// caller forwards the original response and logs.
    pub async fn on_message(
        &self,
        original: &Value,
        response: &Value,
    ) -> Result<Option<Value>, MiddlewareError> {
        match jsonrpc::classify_response(response) {
            MessageClass::Settled(settle) => {
                let payment_id = jsonrpc::request_meta(original)
                    .and_then(|meta| meta.get(PAYMENT_ID_META_KEY))
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .ok_or(MiddlewareError::MissingPaymentId)?;

                let authorization = self
                    .pending_authorizations
                    .lock()
                    .expect("authorization map lock poisoned")
                    .remove(&payment_id)
                    .ok_or(MiddlewareError::UnknownAuthorization(payment_id))?;

                let (status, reason) = if settle.success {
                    (PaymentStatus::Accepted, None)
                } else {
                    (PaymentStatus::Rejected, settle.error_reason.clone())
                };
                tracing::info!(
                    authorization_id = %authorization.authorization_id,
                    accepted = settle.success,
                    transaction = settle.transaction,
                    "payment settled"
                );
                let context = self.context_for(original, reason);
                self.treasurer
                    .on_status(status, &authorization, &context)
                    .await;

                Ok(None)
            }

            MessageClass::PaymentRequired(required) => {
                // Never pay twice for one buyer request: if the originating
                // request already carried a payment, this 402 goes to the
                // buyer untouched.
                if jsonrpc::request_meta(original)
                    .is_some_and(|meta| meta.contains_key(PAYMENT_META_KEY))
                {
                    tracing::warn!(
                        session_id = self.session_id.get(),
                        "payment retry was answered with another 402, not paying again"
                    );
                    return Ok(None);
                }

                let context = self.context_for(original, None);
                let authorization = match self
                    .treasurer
                    .on_payment_required(&required.accepts, &context)
                    .await
                {
                    Ok(Some(authorization)) => authorization,
                    Ok(None) => {
                        tracing::info!(
                            session_id = self.session_id.get(),
                            offered = required.accepts.len(),
                            "treasurer declined payment"
                        );
                        return Ok(None);
                    }
                    Err(e) => {
                        tracing::warn!(
                            session_id = self.session_id.get(),
                            error = %e,
                            "treasurer failed, treating as decline"
                        );
                        return Ok(None);
                    }
                };

                let payment = serde_json::to_value(&authorization.payment)?;

                let mut retry = original.clone();
                let meta =
                    jsonrpc::request_meta_mut(&mut retry).ok_or(MiddlewareError::MalformedRequest)?;
                meta.insert(PAYMENT_META_KEY.to_owned(), payment);
                meta.insert(
                    PAYMENT_ID_META_KEY.to_owned(),
                    json!(authorization.authorization_id),
                );

                self.pending_authorizations
                    .lock()
                    .expect("authorization map lock poisoned")
                    .insert(authorization.authorization_id.clone(), authorization.clone());

                self.treasurer
                    .on_status(PaymentStatus::Sending, &authorization, &context)
                    .await;

                Ok(Some(retry))
            }

            MessageClass::Ordinary => Ok(None),
        }
    }

    fn context_for(&self, original: &Value, reason: Option<String>) -> PaymentContext {
        let method = jsonrpc::method(original).map(str::to_owned);
        let tool_name = (method.as_deref() == Some("tools/call"))
            .then(|| {
                original
                    .get("params")
                    .and_then(|params| params.get("name"))
                    .and_then(Value::as_str)
                    .map(str::to_owned)
            })
            .flatten();

        PaymentContext {
            session_id: self.session_id.get().cloned(),
            method,
            tool_name,
            reason,
        }
    }
}

//! HTTP client for the remote payment policy service.
//!
//! The service authenticates agents with a Sign-In-With-Ethereum style
//! handshake: fetch a nonce, sign a login message with the agent key, and
//! exchange it for a short-lived bearer token. Authenticated endpoints
//! cover payment authorization and lifecycle event reporting.

use std::collections::HashMap;
use std::time::Duration;

use alloy_primitives::hex;
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use url::Url;

use p402_proto::types::{PaymentPayload, PaymentRequirements};

use crate::PaymentContext;

/// Seconds of slack before token expiry at which we re-authenticate.
const TOKEN_EXPIRY_SKEW_SECS: i64 = 60;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the policy service.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ApiError {
    /// The service answered with a non-success status.
    #[error("policy API returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, verbatim.
        message: String,
    },

    /// The request never completed (connect failure, timeout, bad TLS).
    #[error("policy API transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The agent key could not sign the login message.
    #[error("login signing failed: {0}")]
    Signing(String),
}

/// A payment authorization request.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizeRequest<'a> {
    /// Every requirement offered by the upstream, in offer order.
    pub requirements: &'a [PaymentRequirements],
    /// Session/method context for audit trails.
    pub context: &'a PaymentContext,
}

/// A single authorized requirement with remaining spend limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizedRequirement {
    /// The requirement the service is willing to fund.
    pub requirement: PaymentRequirements,
    /// Remaining limits after this payment (`dailyRemaining`, `monthlyRemaining`).
    #[serde(default)]
    pub limits: HashMap<String, String>,
}

/// A single rejected requirement with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRequirement {
    /// The rejected requirement.
    pub requirement: PaymentRequirements,
    /// Why it was rejected.
    pub reason: String,
}

/// The authorized subset of an offer, with a recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizedResponse {
    /// Index into `requirements` of the recommended (cheapest) option.
    #[serde(default)]
    pub recommended: Option<usize>,
    /// Authorized requirements. Empty if none were approved.
    #[serde(default)]
    pub requirements: Vec<AuthorizedRequirement>,
}

/// Response from the authorize endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    /// Authorized requirements with recommendation.
    pub authorized: AuthorizedResponse,
    /// Rejected requirements with reasons.
    #[serde(default)]
    pub rejected: Vec<RejectedRequirement>,
}

/// A payment lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PaymentEvent {
    /// Payment is being sent.
    Sending,
    /// Payment was accepted.
    Accepted,
    /// Payment was rejected by the upstream.
    Rejected {
        /// Rejection reason.
        reason: String,
    },
    /// Payment processing failed.
    Error {
        /// Failure reason.
        reason: String,
    },
}

#[derive(Debug, Serialize)]
struct EventRequest<'a> {
    id: &'a str,
    payment: &'a PaymentPayload,
    event: &'a PaymentEvent,
}

/// Acknowledgement from the events endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct EventResponse {
    /// Whether the event was recorded.
    pub received: bool,
    /// Internal payment record id, if one was created.
    #[serde(default, rename = "paymentId")]
    pub payment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NonceResponse {
    nonce: String,
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Serialize)]
struct LoginRequest {
    message: String,
    signature: String,
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    token: String,
    #[allow(dead_code)]
    agent_address: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct AuthState {
    token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl AuthState {
    fn valid_token(&self) -> Option<&str> {
        let token = self.token.as_deref()?;
        let expires_at = self.expires_at?;
        if expires_at - Utc::now() > chrono::Duration::seconds(TOKEN_EXPIRY_SKEW_SECS) {
            Some(token)
        } else {
            None
        }
    }
}

/// Authenticated client for the policy service.
///
/// The auth state sits behind a [`tokio::sync::Mutex`] held across the
/// whole login round-trip, so concurrent callers share a single
/// authentication instead of racing.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    signer: PrivateKeySigner,
    auth: Mutex<AuthState>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Creates a client for the service at `base_url`, authenticating with
    /// `signer`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] if the HTTP client cannot be built.
    pub fn new(base_url: Url, signer: PrivateKeySigner, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url,
            signer,
            auth: Mutex::new(AuthState::default()),
        })
    }

    /// Asks the service which of the offered requirements it will fund.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport or service failure. The caller
    /// treats any error as a decline.
    pub async fn authorize_payment(
        &self,
        requirements: &[PaymentRequirements],
        context: &PaymentContext,
    ) -> Result<AuthorizeResponse, ApiError> {
        let body = AuthorizeRequest {
            requirements,
            context,
        };
        self.post_authenticated("agent/payments/authorize", &body)
            .await
    }

    /// Reports a payment lifecycle event.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport or service failure. Callers log
    /// and swallow these; event reporting never blocks the payment flow.
    pub async fn report_payment_event(
        &self,
        id: &str,
        payment: &PaymentPayload,
        event: &PaymentEvent,
    ) -> Result<EventResponse, ApiError> {
        let body = EventRequest { id, payment, event };
        self.post_authenticated("agent/payments/events", &body).await
    }

    /// Posts to an authenticated endpoint, logging in as needed and
    /// retrying once on a 401 (expired/revoked token).
    async fn post_authenticated<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ApiError> {
        let token = self.bearer_token().await?;
        match self.post_json(path, body, Some(&token)).await {
            Err(ApiError::Status { status: 401, .. }) => {
                self.auth.lock().await.token = None;
                let token = self.bearer_token().await?;
                self.post_json(path, body, Some(&token)).await
            }
            other => other,
        }
    }

    /// Returns a valid bearer token, performing the SIWE login if the
    /// cached one is missing or expiring.
    async fn bearer_token(&self) -> Result<String, ApiError> {
        let mut auth = self.auth.lock().await;
        if let Some(token) = auth.valid_token() {
            return Ok(token.to_owned());
        }

        let nonce: NonceResponse = self.get_json("auth/nonce").await?;
        let message = self.login_message(&nonce.nonce);
        let signature = self
            .signer
            .sign_message(message.as_bytes())
            .await
            .map_err(|e| ApiError::Signing(e.to_string()))?;

        let login: LoginResponse = self
            .post_json(
                "auth/login",
                &LoginRequest {
                    message,
                    signature: hex::encode_prefixed(signature.as_bytes()),
                    session_id: nonce.session_id,
                },
                None,
            )
            .await?;

        tracing::debug!(
            agent = %self.signer.address(),
            expires_at = %login.expires_at,
            "authenticated with policy API"
        );

        auth.token = Some(login.token.clone());
        auth.expires_at = Some(login.expires_at);
        Ok(login.token)
    }

    fn login_message(&self, nonce: &str) -> String {
        let host = self.base_url.host_str().unwrap_or("localhost");
        format!(
            "{host} wants you to sign in with your Ethereum account:\n\
             {address}\n\n\
             Authenticate agent with the payment policy service\n\n\
             URI: {uri}\n\
             Version: 1\n\
             Nonce: {nonce}\n\
             Issued At: {issued_at}",
            address = self.signer.address(),
            uri = self.base_url,
            issued_at = Utc::now().to_rfc3339(),
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.as_str().trim_end_matches('/'))
    }

    async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, ApiError> {
        let response = self.http.get(self.endpoint(path)).send().await?;
        Self::decode(response).await
    }

    async fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        token: Option<&str>,
    ) -> Result<R, ApiError> {
        let mut request = self.http.post(self.endpoint(path)).json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        Self::decode(request.send().await?).await
    }

    async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

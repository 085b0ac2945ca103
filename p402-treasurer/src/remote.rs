//! Treasurer backed by a remote payment policy service.

use std::sync::Arc;

use p402_proto::{BoxFuture, PaymentRequirements};
use p402_wallet::Wallet;

use crate::api::{ApiClient, AuthorizeResponse, AuthorizedRequirement, PaymentEvent};
use crate::{
    Authorization, PaymentContext, PaymentStatus, Treasurer, TreasurerError, new_authorization_id,
};

/// Asks a remote policy service before paying and reports lifecycle
/// events back to it.
///
/// The service decides which of the offered requirements fit the agent's
/// spend limits and recommends one; the wallet then signs the recommended
/// (else first authorized) requirement. Policy-service failures are
/// declines, never errors: a broken policy service must not take paid
/// upstreams down with it.
pub struct RemoteTreasurer {
    api: ApiClient,
    wallet: Arc<dyn Wallet>,
}

impl std::fmt::Debug for RemoteTreasurer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTreasurer")
            .field("api", &self.api)
            .finish_non_exhaustive()
    }
}

impl RemoteTreasurer {
    /// Creates a treasurer that consults `api` and pays from `wallet`.
    #[must_use]
    pub fn new(api: ApiClient, wallet: Arc<dyn Wallet>) -> Self {
        Self { api, wallet }
    }
}

/// Picks the requirement to pay from an authorize response.
///
/// `recommended` defaults to 0; an out-of-bounds index is treated as a
/// refusal (the service contradicted itself, which is not the buyer's
/// problem).
fn select_authorized(response: &AuthorizeResponse) -> Option<&AuthorizedRequirement> {
    if response.authorized.requirements.is_empty() {
        return None;
    }
    let index = response.authorized.recommended.unwrap_or(0);
    response.authorized.requirements.get(index)
}

impl Treasurer for RemoteTreasurer {
    fn on_payment_required(
        &self,
        accepts: &[PaymentRequirements],
        context: &PaymentContext,
    ) -> BoxFuture<'_, Result<Option<Authorization>, TreasurerError>> {
        let accepts = accepts.to_vec();
        let context = context.clone();
        Box::pin(async move {
            let session_id = context.session_id.clone();

            let response = match self.api.authorize_payment(&accepts, &context).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "authorization request failed, declining");
                    return Ok(None);
                }
            };

            let Some(authorized) = select_authorized(&response) else {
                if response.authorized.requirements.is_empty() {
                    let reasons = response
                        .rejected
                        .iter()
                        .map(|r| format!("{}: {}", r.requirement.resource, r.reason))
                        .collect::<Vec<_>>()
                        .join(", ");
                    tracing::info!(session_id, reasons, "no requirements authorized, declining");
                } else {
                    tracing::error!(
                        session_id,
                        recommended = response.authorized.recommended,
                        authorized = response.authorized.requirements.len(),
                        "recommended index out of bounds, declining"
                    );
                }
                return Ok(None);
            };

            let payment = self.wallet.create_payment(&authorized.requirement).await?;
            let authorization_id = new_authorization_id();
            tracing::info!(
                session_id,
                authorization_id,
                network = %authorized.requirement.network,
                amount = %authorized.requirement.max_amount_required,
                "policy service approved payment"
            );

            Ok(Some(Authorization {
                authorization_id,
                payment,
            }))
        })
    }

    fn on_status(
        &self,
        status: PaymentStatus,
        authorization: &Authorization,
        context: &PaymentContext,
    ) -> BoxFuture<'_, ()> {
        let event = match status {
            PaymentStatus::Sending => Some(PaymentEvent::Sending),
            PaymentStatus::Accepted => Some(PaymentEvent::Accepted),
            PaymentStatus::Rejected => Some(PaymentEvent::Rejected {
                reason: context
                    .reason
                    .clone()
                    .unwrap_or_else(|| "Payment rejected by server".to_owned()),
            }),
            PaymentStatus::Error => Some(PaymentEvent::Error {
                reason: context
                    .reason
                    .clone()
                    .unwrap_or_else(|| "Payment processing failed".to_owned()),
            }),
            // A decline never created an authorization upstream, so there
            // is nothing to report against.
            PaymentStatus::Declined => None,
        };
        let authorization = authorization.clone();

        Box::pin(async move {
            let Some(event) = event else { return };
            if let Err(e) = self
                .api
                .report_payment_event(&authorization.authorization_id, &authorization.payment, &event)
                .await
            {
                tracing::warn!(
                    authorization_id = %authorization.authorization_id,
                    error = %e,
                    "failed to report payment event"
                );
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AuthorizedResponse;

    fn requirement() -> PaymentRequirements {
        serde_json::from_value(serde_json::json!({
            "scheme": "exact",
            "network": "base-sepolia",
            "maxAmountRequired": "1000000",
            "resource": "test-resource",
            "payTo": "0x9876543210987654321098765432109876543210",
            "maxTimeoutSeconds": 3600,
            "asset": "0x036CbD53842c5426634e7929541eC2318f3dCF7e"
        }))
        .unwrap()
    }

    fn authorized(requirements: Vec<AuthorizedRequirement>, recommended: Option<usize>) -> AuthorizeResponse {
        AuthorizeResponse {
            authorized: AuthorizedResponse {
                recommended,
                requirements,
            },
            rejected: vec![],
        }
    }

    fn entry() -> AuthorizedRequirement {
        AuthorizedRequirement {
            requirement: requirement(),
            limits: std::collections::HashMap::new(),
        }
    }

    #[test]
    fn test_select_empty_is_refusal() {
        assert!(select_authorized(&authorized(vec![], None)).is_none());
    }

    #[test]
    fn test_select_defaults_to_first() {
        let mut second = entry();
        second.requirement.max_amount_required = "2".to_owned();
        let response = authorized(vec![entry(), second], None);
        let picked = select_authorized(&response).unwrap();
        assert_eq!(picked.requirement.max_amount_required, "1000000");
    }

    #[test]
    fn test_select_honors_recommended() {
        let mut second = entry();
        second.requirement.max_amount_required = "2".to_owned();
        let response = authorized(vec![entry(), second], Some(1));
        let picked = select_authorized(&response).unwrap();
        assert_eq!(picked.requirement.max_amount_required, "2");
    }

    #[test]
    fn test_select_out_of_bounds_is_refusal() {
        let response = authorized(vec![entry()], Some(3));
        assert!(select_authorized(&response).is_none());
    }
}

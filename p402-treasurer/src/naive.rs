//! Wallet-only treasurer that approves everything.

use std::sync::Arc;

use p402_proto::{BoxFuture, PaymentRequirements};
use p402_wallet::Wallet;

use crate::{
    Authorization, PaymentContext, PaymentStatus, Treasurer, TreasurerError, new_authorization_id,
};

/// Auto-approves the first offered requirement.
///
/// Useful for development and for deployments where spend control lives
/// entirely in the upstream pricing. There is no budget enforcement here.
pub struct NaiveTreasurer {
    wallet: Arc<dyn Wallet>,
}

impl std::fmt::Debug for NaiveTreasurer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NaiveTreasurer").finish_non_exhaustive()
    }
}

impl NaiveTreasurer {
    /// Creates a treasurer paying from the given wallet.
    #[must_use]
    pub fn new(wallet: Arc<dyn Wallet>) -> Self {
        Self { wallet }
    }
}

impl Treasurer for NaiveTreasurer {
    fn on_payment_required(
        &self,
        accepts: &[PaymentRequirements],
        context: &PaymentContext,
    ) -> BoxFuture<'_, Result<Option<Authorization>, TreasurerError>> {
        let first = accepts.first().cloned();
        let session_id = context.session_id.clone();
        Box::pin(async move {
            let Some(requirements) = first else {
                tracing::info!(session_id, "no payment requirements offered, declining");
                return Ok(None);
            };

            let payment = self.wallet.create_payment(&requirements).await?;
            let authorization_id = new_authorization_id();
            tracing::info!(
                session_id,
                authorization_id,
                network = %requirements.network,
                amount = %requirements.max_amount_required,
                resource = %requirements.resource,
                "approved payment"
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
        tracing::info!(
            authorization_id = %authorization.authorization_id,
            status = ?status,
            reason = context.reason,
            "payment status"
        );
        Box::pin(async {})
    }
}

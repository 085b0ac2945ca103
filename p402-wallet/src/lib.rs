//! Payment signing for the p402 payment proxy.
//!
//! A [`Wallet`] turns a [`PaymentRequirements`] offered by an upstream
//! server into a signed [`PaymentPayload`] ready to attach to a retried
//! MCP request. Two variants exist:
//!
//! - [`EoaWallet`] — an externally-owned account signing the ERC-3009
//!   EIP-712 digest directly with its private key.
//! - [`SmartAccountWallet`] — an ERC-4337 smart account whose session key
//!   signs the digest; the signature is wrapped for ERC-1271 validation
//!   through an ownable-validator module.
//!
//! Only the `"exact"` scheme is supported. Everything else fails with
//! [`WalletError::UnsupportedScheme`].

pub mod eoa;
pub mod erc3009;
pub mod networks;
pub mod smart_account;

use std::sync::Arc;

use alloy_primitives::Address;
use p402_proto::{BoxFuture, PaymentPayload, PaymentRequirements};

pub use eoa::EoaWallet;
pub use smart_account::{DEFAULT_CHAIN_ID, OWNABLE_VALIDATOR, SmartAccountWallet};

/// Errors that can occur while creating a payment payload.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WalletError {
    /// The requirement asks for a scheme this wallet cannot satisfy.
    #[error("Unsupported payment scheme: {0}")]
    UnsupportedScheme(String),

    /// The requirement is malformed (bad address, amount, or network).
    #[error("Invalid payment requirements: {0}")]
    InvalidRequirements(String),

    /// The underlying signer failed.
    #[error("Failed to sign payment: {0}")]
    SigningFailed(String),
}

/// Produces signed payment payloads from payment requirements.
///
/// The trait is dyn-compatible so treasurers can hold wallets as
/// `Arc<dyn Wallet>`. Implementations are deterministic except for the
/// replay-protection nonce and the validity window timestamps.
pub trait Wallet: Send + Sync {
    /// The paying account address as it will appear in
    /// `payload.authorization.from`.
    fn address(&self) -> Address;

    /// Signs a payment satisfying `requirements`.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::UnsupportedScheme`] for schemes other than
    /// `"exact"`, [`WalletError::InvalidRequirements`] for malformed
    /// requirements, and [`WalletError::SigningFailed`] if signing fails.
    fn create_payment(
        &self,
        requirements: &PaymentRequirements,
    ) -> BoxFuture<'_, Result<PaymentPayload, WalletError>>;
}

impl<T: Wallet> Wallet for Arc<T> {
    fn address(&self) -> Address {
        self.as_ref().address()
    }

    fn create_payment(
        &self,
        requirements: &PaymentRequirements,
    ) -> BoxFuture<'_, Result<PaymentPayload, WalletError>> {
        self.as_ref().create_payment(requirements)
    }
}

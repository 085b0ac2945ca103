//! Externally-owned account wallet.

use alloy_primitives::{Address, hex};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;

use p402_proto::{BoxFuture, PaymentPayload, PaymentRequirements};

use crate::erc3009;
use crate::{Wallet, WalletError};

/// A wallet backed by a plain private key.
///
/// The ERC-3009 EIP-712 digest is signed directly; the raw 65-byte
/// signature becomes the payment signature.
#[derive(Debug)]
pub struct EoaWallet {
    signer: PrivateKeySigner,
}

impl EoaWallet {
    /// Creates a wallet from an existing signer.
    #[must_use]
    pub const fn new(signer: PrivateKeySigner) -> Self {
        Self { signer }
    }

    /// Creates a wallet from a 0x-prefixed hex private key.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::InvalidRequirements`] if the key does not
    /// parse.
    pub fn from_private_key(key: &str) -> Result<Self, WalletError> {
        let signer: PrivateKeySigner = key
            .trim()
            .parse()
            .map_err(|_| WalletError::InvalidRequirements("bad private key".to_owned()))?;
        Ok(Self::new(signer))
    }
}

impl Wallet for EoaWallet {
    fn address(&self) -> Address {
        self.signer.address()
    }

    fn create_payment(
        &self,
        requirements: &PaymentRequirements,
    ) -> BoxFuture<'_, Result<PaymentPayload, WalletError>> {
        let parsed = erc3009::parse_requirements(requirements);
        Box::pin(async move {
            let parsed = parsed?;
            let (authorization, digest) = erc3009::build_authorization(self.signer.address(), &parsed);

            let signature = self
                .signer
                .sign_hash(&digest)
                .await
                .map_err(|e| WalletError::SigningFailed(e.to_string()))?;

            Ok(erc3009::payment_payload(
                parsed.network,
                hex::encode_prefixed(signature.as_bytes()),
                authorization,
            ))
        })
    }
}

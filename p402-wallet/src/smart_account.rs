//! ERC-4337 smart-account wallet with ERC-1271 signature wrapping.
//!
//! The smart account itself never signs. A session key signs the ERC-3009
//! digest, and the signature is wrapped so the account contract can
//! validate it through ERC-1271: ERC-7579 accounts route
//! `isValidSignature` to a validator module identified by the first 20
//! bytes of the signature, and the ownable validator's single-owner
//! envelope (threshold 1) is the bare 65-byte owner signature.
//!
//! Only Safe-style ERC-7579 accounts with the ownable validator are
//! supported.

use alloy_primitives::{Address, address, hex};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;

use p402_proto::{BoxFuture, PaymentPayload, PaymentRequirements};

use crate::erc3009;
use crate::{Wallet, WalletError};

/// OwnableValidator module address, shared by most ERC-7579 account
/// deployments.
pub const OWNABLE_VALIDATOR: Address = address!("0x000000000013fdB5234E4E3162a810F54d9f7E98");

/// Default chain id (Base Sepolia).
pub const DEFAULT_CHAIN_ID: u64 = 84_532;

/// A wallet paying from an ERC-4337 smart account.
#[derive(Debug)]
pub struct SmartAccountWallet {
    account: Address,
    session_key: PrivateKeySigner,
    validator: Address,
    chain_id: u64,
}

impl SmartAccountWallet {
    /// Creates a smart-account wallet with the default validator and chain.
    #[must_use]
    pub const fn new(account: Address, session_key: PrivateKeySigner) -> Self {
        Self {
            account,
            session_key,
            validator: OWNABLE_VALIDATOR,
            chain_id: DEFAULT_CHAIN_ID,
        }
    }

    /// Overrides the validator module address.
    #[must_use]
    pub const fn with_validator(mut self, validator: Address) -> Self {
        self.validator = validator;
        self
    }

    /// Overrides the chain id.
    #[must_use]
    pub const fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// The session signer's address (the registered owner on the
    /// validator module).
    #[must_use]
    pub fn session_key_address(&self) -> Address {
        self.session_key.address()
    }
}

impl Wallet for SmartAccountWallet {
    fn address(&self) -> Address {
        self.account
    }

    fn create_payment(
        &self,
        requirements: &PaymentRequirements,
    ) -> BoxFuture<'_, Result<PaymentPayload, WalletError>> {
        let parsed = erc3009::parse_requirements(requirements);
        Box::pin(async move {
            let parsed = parsed?;
            if parsed.chain_id != self.chain_id {
                return Err(WalletError::InvalidRequirements(format!(
                    "network {} is chain {} but the smart account lives on chain {}",
                    parsed.network, parsed.chain_id, self.chain_id
                )));
            }

            // `from` is the smart account; the session key only produces
            // the inner signature.
            let (authorization, digest) = erc3009::build_authorization(self.account, &parsed);

            let owner_signature = self
                .session_key
                .sign_hash(&digest)
                .await
                .map_err(|e| WalletError::SigningFailed(e.to_string()))?;

            let mut wrapped = Vec::with_capacity(20 + 65);
            wrapped.extend_from_slice(self.validator.as_slice());
            wrapped.extend_from_slice(&owner_signature.as_bytes());

            Ok(erc3009::payment_payload(
                parsed.network,
                hex::encode_prefixed(&wrapped),
                authorization,
            ))
        })
    }
}

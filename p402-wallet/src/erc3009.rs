//! Shared ERC-3009 `TransferWithAuthorization` construction.
//!
//! Both wallet variants sign the same EIP-712 digest; they differ only in
//! how the signature bytes are produced and wrapped. This module owns
//! requirement validation, the typed-data struct, the validity window, and
//! the replay-protection nonce.

use alloy_primitives::{Address, B256, FixedBytes, U256, hex};
use alloy_sol_types::{SolStruct, eip712_domain, sol};
use rand::Rng;

use p402_proto::timestamp::UnixTimestamp;
use p402_proto::types::{ExactAuthorization, PaymentPayload, PaymentRequirements};
use p402_proto::{EXACT_SCHEME, X402_VERSION};

use crate::WalletError;
use crate::networks::chain_id_for_network;

sol! {
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

/// Grace period subtracted from `validAfter` so the payment is immediately
/// valid even across clock skew between proxy and facilitator.
pub const VALID_AFTER_GRACE_SECS: u64 = 600;

/// A [`PaymentRequirements`] validated and parsed for the "exact" scheme.
#[derive(Debug, Clone)]
pub struct ExactRequirements {
    /// Token contract address (EIP-712 verifying contract).
    pub asset: Address,
    /// Recipient address.
    pub pay_to: Address,
    /// Transfer amount.
    pub value: U256,
    /// Validity window length in seconds.
    pub max_timeout_seconds: u64,
    /// EIP-155 chain id resolved from the network name.
    pub chain_id: u64,
    /// Network name, echoed into the payment payload.
    pub network: String,
    /// EIP-712 domain name.
    pub domain_name: String,
    /// EIP-712 domain version.
    pub domain_version: String,
}

/// Validates a raw requirement and parses its addresses and amount.
///
/// # Errors
///
/// Returns [`WalletError::UnsupportedScheme`] for schemes other than
/// `"exact"` and [`WalletError::InvalidRequirements`] for malformed
/// addresses, amounts, or unknown networks.
pub fn parse_requirements(
    requirements: &PaymentRequirements,
) -> Result<ExactRequirements, WalletError> {
    if requirements.scheme != EXACT_SCHEME {
        return Err(WalletError::UnsupportedScheme(requirements.scheme.clone()));
    }

    let asset: Address = requirements
        .asset
        .parse()
        .map_err(|_| invalid(format!("bad asset address: {}", requirements.asset)))?;
    let pay_to: Address = requirements
        .pay_to
        .parse()
        .map_err(|_| invalid(format!("bad payTo address: {}", requirements.pay_to)))?;
    let value = U256::from_str_radix(requirements.max_amount_required.trim(), 10)
        .map_err(|_| invalid(format!("bad amount: {}", requirements.max_amount_required)))?;
    let chain_id = chain_id_for_network(&requirements.network)
        .ok_or_else(|| invalid(format!("unknown network: {}", requirements.network)))?;

    // ERC-3009 tokens default to the USDC domain; servers may override via
    // `extra.name` / `extra.version`.
    let mut domain_name = "USDC".to_owned();
    let mut domain_version = "2".to_owned();
    if let Some(extra) = &requirements.extra {
        if let Some(name) = extra.get("name").and_then(serde_json::Value::as_str) {
            domain_name = name.to_owned();
        }
        if let Some(version) = extra.get("version").and_then(serde_json::Value::as_str) {
            domain_version = version.to_owned();
        }
    }

    Ok(ExactRequirements {
        asset,
        pay_to,
        value,
        max_timeout_seconds: requirements.max_timeout_seconds,
        chain_id,
        network: requirements.network.clone(),
        domain_name,
        domain_version,
    })
}

/// Builds a fresh authorization and the EIP-712 digest to sign.
///
/// `validAfter` is backdated by [`VALID_AFTER_GRACE_SECS`];
/// `validBefore = now + maxTimeoutSeconds`. The nonce is 32 bytes of OS
/// entropy, unique per call.
#[must_use]
pub fn build_authorization(
    from: Address,
    requirements: &ExactRequirements,
) -> (ExactAuthorization, B256) {
    let now = UnixTimestamp::now();
    let valid_after = now.saturating_sub(VALID_AFTER_GRACE_SECS);
    let valid_before = now + requirements.max_timeout_seconds;
    let nonce: [u8; 32] = rand::rng().random();

    let domain = eip712_domain! {
        name: requirements.domain_name.clone(),
        version: requirements.domain_version.clone(),
        chain_id: requirements.chain_id,
        verifying_contract: requirements.asset,
    };

    // The facilitator reconstructs this struct from the wire authorization
    // to verify the signature, so both MUST agree field-for-field.
    let message = TransferWithAuthorization {
        from,
        to: requirements.pay_to,
        value: requirements.value,
        validAfter: U256::from(valid_after.as_secs()),
        validBefore: U256::from(valid_before.as_secs()),
        nonce: FixedBytes(nonce),
    };
    let digest = message.eip712_signing_hash(&domain);

    let authorization = ExactAuthorization {
        from: from.to_string(),
        to: requirements.pay_to.to_string(),
        value: requirements.value.to_string(),
        valid_after,
        valid_before,
        nonce: hex::encode_prefixed(nonce),
    };

    (authorization, digest)
}

/// Assembles the wire payload from a signature and its authorization.
#[must_use]
pub fn payment_payload(
    network: String,
    signature: String,
    authorization: ExactAuthorization,
) -> PaymentPayload {
    PaymentPayload {
        x402_version: X402_VERSION,
        scheme: EXACT_SCHEME.to_owned(),
        network,
        payload: p402_proto::types::ExactPayload {
            signature,
            authorization,
        },
    }
}

fn invalid(message: String) -> WalletError {
    WalletError::InvalidRequirements(message)
}

//! Payment types for the x402 flow over MCP.
//!
//! These are the x402Version 1 shapes: network name strings and a flat
//! payload structure, matching what upstream MCP servers emit inside a
//! 402 JSON-RPC error and inside `result._meta`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::timestamp::UnixTimestamp;

/// A single payment option offered by an upstream server.
///
/// # JSON Format
///
/// ```json
/// {
///   "scheme": "exact",
///   "network": "base-sepolia",
///   "maxAmountRequired": "10000",
///   "resource": "weather",
///   "payTo": "0x...",
///   "maxTimeoutSeconds": 300,
///   "asset": "0x..."
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    /// Payment scheme identifier (e.g., "exact").
    pub scheme: String,

    /// Network name (e.g., "base-sepolia").
    pub network: String,

    /// Maximum amount in the asset's smallest unit, as a decimal string.
    pub max_amount_required: String,

    /// The resource being paid for.
    pub resource: String,

    /// Optional resource description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Optional MIME type of the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// Recipient address.
    pub pay_to: String,

    /// Maximum validity window of the payment, in seconds.
    pub max_timeout_seconds: u64,

    /// Token contract address.
    pub asset: String,

    /// Optional output schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,

    /// Additional scheme-specific data (EIP-712 domain overrides live here).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

/// The `error.data` body of a 402 payment-required JSON-RPC error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    /// Protocol version (always 1).
    #[serde(default = "default_version")]
    pub x402_version: u32,

    /// Optional error message from the upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// List of accepted payment requirements.
    #[serde(default)]
    pub accepts: Vec<PaymentRequirements>,

    /// Settlement response for a previously attached payment, if the
    /// upstream rejected it.
    #[serde(
        default,
        rename = "x402/payment-response",
        skip_serializing_if = "Option::is_none"
    )]
    pub payment_response: Option<SettleResponse>,
}

/// An ERC-3009 `transferWithAuthorization` message, pre-signature.
///
/// Field-for-field equal to the typed data that was signed; the upstream's
/// facilitator reconstructs this struct to verify the signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactAuthorization {
    /// Paying account (EOA or smart account).
    pub from: String,

    /// Recipient address.
    pub to: String,

    /// Transfer amount in the asset's smallest unit, as a decimal string.
    pub value: String,

    /// Earliest time the authorization can be executed.
    pub valid_after: UnixTimestamp,

    /// Latest time the authorization remains valid.
    pub valid_before: UnixTimestamp,

    /// 32-byte replay-protection nonce, 0x-prefixed hex.
    pub nonce: String,
}

/// Scheme-specific payload for the "exact" scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExactPayload {
    /// Signature over the EIP-712 digest of [`ExactAuthorization`],
    /// 0x-prefixed hex. For smart accounts this is the ERC-1271 wrapper,
    /// not a bare 65-byte signature.
    pub signature: String,

    /// The signed authorization.
    pub authorization: ExactAuthorization,
}

/// A signed payment, attached to a retried request under
/// [`crate::PAYMENT_META_KEY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    /// Protocol version (always 1).
    #[serde(default = "default_version")]
    pub x402_version: u32,

    /// Payment scheme identifier.
    pub scheme: String,

    /// Network name.
    pub network: String,

    /// Scheme-specific payload data.
    pub payload: ExactPayload,
}

/// Settlement outcome reported by the upstream under
/// [`crate::PAYMENT_RESPONSE_META_KEY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    /// Whether settlement was successful.
    pub success: bool,

    /// Machine-readable reason for failure (if `success` is false).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,

    /// Transaction hash/identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,

    /// Network where settlement occurred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    /// The payer's address (if known).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

const fn default_version() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirements_json() -> &'static str {
        r#"{
            "scheme": "exact",
            "network": "base-sepolia",
            "maxAmountRequired": "10000",
            "resource": "weather",
            "description": "d",
            "mimeType": "application/json",
            "payTo": "0x9876543210987654321098765432109876543210",
            "maxTimeoutSeconds": 300,
            "asset": "0x036CbD53842c5426634e7929541eC2318f3dCF7e"
        }"#
    }

    #[test]
    fn test_requirements_roundtrip() {
        let req: PaymentRequirements = serde_json::from_str(requirements_json()).unwrap();
        assert_eq!(req.scheme, "exact");
        assert_eq!(req.max_amount_required, "10000");
        assert_eq!(req.max_timeout_seconds, 300);

        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["maxAmountRequired"], "10000");
        assert_eq!(value["payTo"], "0x9876543210987654321098765432109876543210");
        let back: PaymentRequirements = serde_json::from_value(value).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn test_payment_required_defaults_version() {
        let pr: PaymentRequired =
            serde_json::from_str(&format!(r#"{{"accepts": [{}]}}"#, requirements_json())).unwrap();
        assert_eq!(pr.x402_version, 1);
        assert_eq!(pr.accepts.len(), 1);
        assert!(pr.payment_response.is_none());
    }

    #[test]
    fn test_payload_authorization_roundtrip() {
        let payload = PaymentPayload {
            x402_version: 1,
            scheme: "exact".to_owned(),
            network: "base-sepolia".to_owned(),
            payload: ExactPayload {
                signature: "0xabcd".to_owned(),
                authorization: ExactAuthorization {
                    from: "0x1111111111111111111111111111111111111111".to_owned(),
                    to: "0x2222222222222222222222222222222222222222".to_owned(),
                    value: "10000".to_owned(),
                    valid_after: UnixTimestamp::from_secs(100),
                    valid_before: UnixTimestamp::from_secs(700),
                    nonce: format!("0x{}", "00".repeat(32)),
                },
            },
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["payload"]["authorization"]["validAfter"], "100");
        assert_eq!(value["payload"]["authorization"]["validBefore"], "700");

        let back: PaymentPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_settle_response_optional_fields() {
        let settle: SettleResponse =
            serde_json::from_str(r#"{"success": true, "transaction": "0xTX"}"#).unwrap();
        assert!(settle.success);
        assert_eq!(settle.transaction.as_deref(), Some("0xTX"));
        assert!(settle.error_reason.is_none());

        let value = serde_json::to_value(&settle).unwrap();
        assert!(value.get("errorReason").is_none());
    }
}

//! JSON-RPC 2.0 envelope utilities for message bridging.
//!
//! The proxy treats MCP traffic as opaque JSON-RPC messages: it never
//! interprets MCP semantics beyond the envelope (`id`, `method`, `error`)
//! and the x402 extension points inside `params._meta` / `result._meta`.
//! All helpers here operate on [`serde_json::Value`] so any MCP framing
//! can sit on either side.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::types::{PaymentRequired, SettleResponse};
use crate::{PAYMENT_REQUIRED_CODE, PAYMENT_RESPONSE_META_KEY};

/// A JSON-RPC request id.
///
/// JSON-RPC 2.0 allows string and numeric ids; fractional and null ids
/// are not produced by MCP clients and are treated as absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Number(i64),
    /// String id.
    String(String),
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl RequestId {
    /// Converts the id back to a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => json!(n),
            Self::String(s) => json!(s),
        }
    }
}

/// Extracts the `id` of a message, if it carries one.
#[must_use]
pub fn request_id(message: &Value) -> Option<RequestId> {
    match message.get("id")? {
        Value::Number(n) => n.as_i64().map(RequestId::Number),
        Value::String(s) => Some(RequestId::String(s.clone())),
        _ => None,
    }
}

/// Overwrites the `id` of a message.
pub fn set_request_id(message: &mut Value, id: &RequestId) {
    if let Some(obj) = message.as_object_mut() {
        obj.insert("id".to_owned(), id.to_value());
    }
}

/// Returns the `method` of a request or notification.
#[must_use]
pub fn method(message: &Value) -> Option<&str> {
    message.get("method")?.as_str()
}

/// `true` if the message is a request (has both `method` and `id`).
#[must_use]
pub fn is_request(message: &Value) -> bool {
    method(message).is_some() && request_id(message).is_some()
}

/// `true` if the message is a notification (has `method` but no `id`).
#[must_use]
pub fn is_notification(message: &Value) -> bool {
    method(message).is_some() && request_id(message).is_none()
}

/// `true` if the message is a response (has `id` and either `result` or `error`).
#[must_use]
pub fn is_response(message: &Value) -> bool {
    method(message).is_none()
        && request_id(message).is_some()
        && (message.get("result").is_some() || message.get("error").is_some())
}

/// Returns the `error.code` of an error response.
#[must_use]
pub fn error_code(message: &Value) -> Option<i64> {
    message.get("error")?.get("code")?.as_i64()
}

/// Returns the `params._meta` map of a request, if present.
#[must_use]
pub fn request_meta(message: &Value) -> Option<&Map<String, Value>> {
    message.get("params")?.get("_meta")?.as_object()
}

/// Returns the `params._meta` map of a request, creating `params` and
/// `_meta` objects as needed.
///
/// Returns `None` only if `params` exists and is not an object (a malformed
/// message the proxy leaves untouched).
pub fn request_meta_mut(message: &mut Value) -> Option<&mut Map<String, Value>> {
    let obj = message.as_object_mut()?;
    let params = obj
        .entry("params")
        .or_insert_with(|| Value::Object(Map::new()));
    let params = params.as_object_mut()?;
    let meta = params
        .entry("_meta")
        .or_insert_with(|| Value::Object(Map::new()));
    meta.as_object_mut()
}

/// Returns the `result._meta` map of a success response, if present.
#[must_use]
pub fn result_meta(message: &Value) -> Option<&Map<String, Value>> {
    message.get("result")?.get("_meta")?.as_object()
}

/// Builds a JSON-RPC error response.
#[must_use]
pub fn error_response(id: &RequestId, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id.to_value(),
        "error": { "code": code, "message": message },
    })
}

/// How an upstream response relates to the x402 payment flow.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageClass {
    /// A 402 error whose `data` carries payment requirements.
    PaymentRequired(Box<PaymentRequired>),
    /// A success response whose `result._meta` carries a settlement outcome.
    Settled(SettleResponse),
    /// Anything else; forwarded untouched.
    Ordinary,
}

/// Classifies an upstream response.
///
/// A payment-required response is a JSON-RPC error with code 402 whose
/// `data` parses as [`PaymentRequired`] (the `accepts` list may be empty;
/// deciding what to do with it is the treasurer's job). A settle-response
/// is a success whose `result._meta` carries a parseable
/// [`SettleResponse`]. Malformed payment data classifies as
/// [`MessageClass::Ordinary`] so the message passes through unmodified.
#[must_use]
pub fn classify_response(response: &Value) -> MessageClass {
    if error_code(response) == Some(PAYMENT_REQUIRED_CODE)
        && let Some(data) = response.get("error").and_then(|e| e.get("data"))
        && data.get("x402Version").is_some()
        && let Ok(required) = serde_json::from_value::<PaymentRequired>(data.clone())
    {
        return MessageClass::PaymentRequired(Box::new(required));
    }

    if let Some(meta) = result_meta(response)
        && let Some(raw) = meta.get(PAYMENT_RESPONSE_META_KEY)
        && let Ok(settle) = serde_json::from_value::<SettleResponse>(raw.clone())
    {
        return MessageClass::Settled(settle);
    }

    MessageClass::Ordinary
}

//! Request validation and recipient normalization.
//!
//! Inbound bodies are decoded into the permissive [`RawMessage`] / [`RawCall`]
//! shapes first, then checked for required fields and normalized into
//! [`OutboundMessageRequest`] / [`OutboundCallRequest`]. No phone number syntax
//! checks are made beyond the international prefix.
//!
//! Field values stay untyped JSON until validation, where `null`, `""`, `0`
//! and `false` count as absent. A recipient that is present but not a string
//! is a [`ValidationError::UnsupportedField`].

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// Country prefix prepended to recipients that lack a leading `+`.
pub const DEFAULT_COUNTRY_PREFIX: &str = "+91";

const MESSAGE_FIELDS_REQUIRED: &str = "Message and recipient number are required.";
const RECIPIENT_REQUIRED: &str = "Recipient number is required.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A required field is absent or empty; carries the client-facing description.
    #[error("{0}")]
    MissingField(&'static str),
    /// A field is present with a JSON type the gateway cannot send.
    #[error("field `{field}` holds {found}, not a string")]
    UnsupportedField {
        field: &'static str,
        found: &'static str,
    },
}

/// A body the gateway cannot interpret at all. Raised before admission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BodyError {
    #[error("body is not valid JSON: {0}")]
    Undecodable(String),
    #[error("body is a JSON {0}, expected an object")]
    NotAnObject(&'static str),
}

/// `/send-sms` body as received.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessage {
    pub message: Option<Value>,
    pub to: Option<Value>,
}

/// `/make-call` body as received.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCall {
    pub to: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessageRequest {
    pub body: String,
    pub recipient: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCallRequest {
    pub recipient: String,
}

/// Decode a JSON body. An empty body reads as `{}` and an array as an object
/// without any of the named fields; other top-level values are refused.
pub fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, BodyError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    let value: Value =
        serde_json::from_slice(body).map_err(|e| BodyError::Undecodable(e.to_string()))?;
    if value.is_object() {
        serde_json::from_value(value).map_err(|e| BodyError::Undecodable(e.to_string()))
    } else if value.is_array() {
        Ok(T::default())
    } else {
        Err(BodyError::NotAnObject(json_type(&value)))
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Brings recipients into international format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneNormalizer {
    default_prefix: String,
}

impl PhoneNormalizer {
    pub fn new(default_prefix: impl Into<String>) -> Self {
        Self {
            default_prefix: default_prefix.into(),
        }
    }

    pub fn default_prefix(&self) -> &str {
        &self.default_prefix
    }

    /// Numbers already starting with `+` pass through untouched.
    pub fn normalize(&self, recipient: &str) -> String {
        if recipient.starts_with('+') {
            recipient.to_string()
        } else {
            format!("{}{}", self.default_prefix, recipient)
        }
    }
}

impl Default for PhoneNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_COUNTRY_PREFIX)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestValidator {
    normalizer: PhoneNormalizer,
}

impl RequestValidator {
    pub fn new(normalizer: PhoneNormalizer) -> Self {
        Self { normalizer }
    }

    pub fn normalizer(&self) -> &PhoneNormalizer {
        &self.normalizer
    }

    pub fn validate_message(
        &self,
        raw: RawMessage,
    ) -> Result<OutboundMessageRequest, ValidationError> {
        match (present(raw.message), present(raw.to)) {
            (Some(body), Some(to)) => Ok(OutboundMessageRequest {
                body: scalar_text("message", body)?,
                recipient: self.normalizer.normalize(&recipient(to)?),
            }),
            _ => Err(ValidationError::MissingField(MESSAGE_FIELDS_REQUIRED)),
        }
    }

    pub fn validate_call(&self, raw: RawCall) -> Result<OutboundCallRequest, ValidationError> {
        let to = present(raw.to).ok_or(ValidationError::MissingField(RECIPIENT_REQUIRED))?;
        Ok(OutboundCallRequest {
            recipient: self.normalizer.normalize(&recipient(to)?),
        })
    }
}

fn present(field: Option<Value>) -> Option<Value> {
    field.filter(|value| match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    })
}

fn recipient(value: Value) -> Result<String, ValidationError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(ValidationError::UnsupportedField {
            field: "to",
            found: json_type(&other),
        }),
    }
}

fn scalar_text(field: &'static str, value: Value) -> Result<String, ValidationError> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(ValidationError::UnsupportedField {
            field,
            found: json_type(&other),
        }),
    }
}

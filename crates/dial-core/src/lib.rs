//! # Dial Core
//!
//! Core traits and types for the dialgate SMS and voice gateway.
//!
//! This crate provides the building blocks shared by every other crate:
//! - [`CommsClient`] trait for sending messages and placing calls through a provider
//! - [`AdmissionControl`] trait for per-client request throttling
//! - Request validation and recipient normalization ([`validate`])
//! - The uniform [`GatewayResponse`] contract and the error taxonomy
//!
//! ## Example
//!
//! ```rust,ignore
//! use dial_core::{CommsClient, MessageRequest};
//!
//! // Any provider implements CommsClient
//! let response = client.send_message(MessageRequest {
//!     to: "+919876543210",
//!     from: "+15005550006",
//!     body: "Hello world!"
//! }).await?;
//! ```

pub mod validate;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use time::OffsetDateTime;

pub use validate::{
    BodyError, OutboundCallRequest, OutboundMessageRequest, PhoneNormalizer, RawCall, RawMessage,
    RequestValidator, ValidationError, DEFAULT_COUNTRY_PREFIX, parse_body,
};

/// Client-facing text for failures that must not leak internals.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal Server Error";

/// Client-facing text when the provider could not be reached or answered nonsense.
pub const UPSTREAM_UNAVAILABLE_MESSAGE: &str = "Upstream provider unavailable";

/// Errors returned by a communications provider
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The request never produced a provider answer (connect, TLS, timeout, body read)
    #[error("http error: {0}")]
    Http(String),
    /// The provider answered with an error payload
    #[error("provider error ({status}): {message}")]
    Upstream {
        message: String,
        status: u16,
        code: Option<i64>,
    },
    /// Unexpected error occurred
    #[error("unexpected: {0}")]
    Unexpected(String),
}

impl ProviderError {
    /// The message without the variant prefix used for logging.
    pub fn message(&self) -> &str {
        match self {
            ProviderError::Http(msg) | ProviderError::Unexpected(msg) => msg,
            ProviderError::Upstream { message, .. } => message,
        }
    }

    /// What a caller may see. Only a message written by the provider itself is
    /// passed through; transport and decoding failures stay in the logs.
    pub fn client_message(&self) -> &str {
        match self {
            ProviderError::Upstream { message, .. } => message,
            ProviderError::Http(_) | ProviderError::Unexpected(_) => UPSTREAM_UNAVAILABLE_MESSAGE,
        }
    }
}

/// Everything that can end a gateway request without a provider identifier.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("quota exceeded: {message}")]
    QuotaExceeded {
        message: String,
        retry_after: Duration,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Upstream(#[from] ProviderError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<BodyError> for GatewayError {
    fn from(e: BodyError) -> Self {
        GatewayError::Internal(e.to_string())
    }
}

impl GatewayError {
    pub fn status(&self) -> HttpStatus {
        match self {
            GatewayError::QuotaExceeded { .. } => HttpStatus::TooManyRequests,
            GatewayError::Validation(ValidationError::MissingField(_)) => HttpStatus::BadRequest,
            GatewayError::Validation(ValidationError::UnsupportedField { .. })
            | GatewayError::Upstream(_)
            | GatewayError::Internal(_) => HttpStatus::InternalServerError,
        }
    }

    /// Convert into the uniform response; internal details are replaced by a generic message.
    pub fn into_response(self) -> GatewayResponse {
        match self {
            GatewayError::QuotaExceeded {
                message,
                retry_after,
            } => GatewayResponse::quota_exceeded(&message, retry_after),
            GatewayError::Validation(e @ ValidationError::MissingField(_)) => {
                GatewayResponse::error(HttpStatus::BadRequest, &e.to_string())
            }
            GatewayError::Upstream(e) => {
                GatewayResponse::error(HttpStatus::InternalServerError, e.client_message())
            }
            GatewayError::Validation(ValidationError::UnsupportedField { .. })
            | GatewayError::Internal(_) => GatewayResponse::internal_error(),
        }
    }
}

/// HTTP status code for gateway responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpStatus {
    Ok = 200,
    BadRequest = 400,
    NotFound = 404,
    MethodNotAllowed = 405,
    PayloadTooLarge = 413,
    TooManyRequests = 429,
    InternalServerError = 500,
}

impl HttpStatus {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Request category used to key limiter configuration independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointClass {
    Sms,
    Call,
}

impl EndpointClass {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointClass::Sms => "sms",
            EndpointClass::Call => "call",
        }
    }
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the caller as seen by the limiter, derived from the request origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_ip(ip: IpAddr) -> Self {
        Self(ip.to_string())
    }

    /// Shared bucket for requests whose origin could not be determined.
    pub fn unknown() -> Self {
        Self("unknown".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied {
        /// Client-facing explanation
        message: String,
        /// Time until the current window resets
        retry_after: Duration,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

/// Per-client throttling seam. Implementations must apply the
/// read-modify-write of a window atomically.
pub trait AdmissionControl: Send + Sync {
    fn admit(&self, identity: &ClientIdentity, class: EndpointClass) -> Admission;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRequest<'a> {
    pub to: &'a str,
    pub from: &'a str,
    pub body: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest<'a> {
    pub to: &'a str,
    pub from: &'a str,
    /// Where the provider fetches the call instructions from.
    pub instructions_url: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderResponse {
    pub id: String,
    /// Name of the backend/provider that produced the response, e.g. "twilio".
    pub provider: &'static str,
    /// Creation time reported by the provider, when it sends one.
    pub created_at: Option<OffsetDateTime>,
    /// Raw provider payload for debugging / audit.
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait CommsClient: Send + Sync {
    /// Stable provider key, e.g. "twilio".
    fn provider(&self) -> &'static str;

    /// Send a single text message.
    async fn send_message(&self, req: MessageRequest<'_>) -> Result<ProviderResponse, ProviderError>;

    /// Place a single outbound voice call.
    async fn place_call(&self, req: CallRequest<'_>) -> Result<ProviderResponse, ProviderError>;
}

/// Lightweight header representation to avoid tying the core to any HTTP framework.
pub type Headers = Vec<(String, String)>;

/// JSON shape shared by every endpoint outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_sid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_sid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Framework-agnostic response that can be converted to any framework's response type
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: HttpStatus,
    pub body: String,
    pub content_type: String,
    /// Seconds until the client may retry, set on quota rejections.
    pub retry_after: Option<u64>,
}

impl GatewayResponse {
    fn json(status: HttpStatus, reply: &GatewayReply) -> Self {
        Self {
            status,
            body: serde_json::to_string(reply)
                .unwrap_or_else(|_| r#"{"success":false}"#.to_string()),
            content_type: "application/json".to_string(),
            retry_after: None,
        }
    }

    pub fn message_sent(sid: impl Into<String>) -> Self {
        Self::json(
            HttpStatus::Ok,
            &GatewayReply {
                success: true,
                message_sid: Some(sid.into()),
                ..Default::default()
            },
        )
    }

    pub fn call_placed(sid: impl Into<String>) -> Self {
        Self::json(
            HttpStatus::Ok,
            &GatewayReply {
                success: true,
                call_sid: Some(sid.into()),
                ..Default::default()
            },
        )
    }

    pub fn error(status: HttpStatus, message: &str) -> Self {
        Self::json(
            status,
            &GatewayReply {
                success: false,
                error: Some(message.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn quota_exceeded(message: &str, retry_after: Duration) -> Self {
        let mut response = Self::error(HttpStatus::TooManyRequests, message);
        // Round up so a client never retries inside the window.
        let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
        response.retry_after = Some(secs.max(1));
        response
    }

    pub fn internal_error() -> Self {
        Self::error(HttpStatus::InternalServerError, INTERNAL_ERROR_MESSAGE)
    }

    /// Decode the body back into the shared JSON shape.
    pub fn reply(&self) -> Option<GatewayReply> {
        serde_json::from_str(&self.body).ok()
    }
}

//! # Twilio Provider
//!
//! Twilio REST implementation of [`CommsClient`] for dialgate.
//!
//! Messages are created through the `Messages` resource and calls through
//! the `Calls` resource of the 2010-04-01 API, both authenticated with the
//! account SID and auth token over HTTP basic auth.
//!
//! ## Example
//!
//! ```rust,ignore
//! use dial_core::{CommsClient, MessageRequest};
//! use dial_twilio::TwilioClient;
//!
//! let client = TwilioClient::new("ACxxxxxxxx", "auth_token");
//! let response = client.send_message(MessageRequest {
//!     to: "+919876543210",
//!     from: "+15005550006",
//!     body: "Hello from dialgate!"
//! }).await?;
//! ```

use async_trait::async_trait;
use dial_core::{CallRequest, CommsClient, MessageRequest, ProviderError, ProviderResponse};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc2822;
use tracing::{debug, info, warn};

const PROVIDER: &str = "twilio";
const DEFAULT_BASE_URL: &str = "https://api.twilio.com";
const API_VERSION: &str = "2010-04-01";

/// Twilio REST client.
#[derive(Clone)]
pub struct TwilioClient {
    /// Twilio Account SID (basic auth user).
    pub account_sid: String,
    auth_token: String,
    /// API base URL; override for testing/mocking.
    pub base_url: String,
    http: reqwest::Client,
}

impl fmt::Debug for TwilioClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwilioClient")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl TwilioClient {
    pub fn new<S: Into<String>>(account_sid: S, auth_token: S) -> Self {
        Self::with_base_url(account_sid, auth_token, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url<S: Into<String>>(account_sid: S, auth_token: S, base_url: String) -> Self {
        Self {
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            base_url,
            http: reqwest::Client::new(),
        }
    }

    /// Bound every provider round trip; this is the only timeout on delegated requests.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ProviderError> {
        self.http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Unexpected(format!("http client: {}", e)))?;
        Ok(self)
    }

    fn resource_url(&self, resource: &str) -> String {
        format!(
            "{}/{}/Accounts/{}/{}.json",
            self.base_url.trim_end_matches('/'),
            API_VERSION,
            self.account_sid,
            resource
        )
    }

    async fn create(
        &self,
        resource: &str,
        form: &[(&str, &str)],
    ) -> Result<ProviderResponse, ProviderError> {
        let res = self
            .http
            .post(self.resource_url(resource))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(form)
            .send()
            .await
            .map_err(|e| transport_error(resource, e))?;

        let status = res.status();
        let raw_text = res.text().await.map_err(|e| transport_error(resource, e))?;

        if !status.is_success() {
            let err = decode_error(status.as_u16(), &raw_text);
            if let ProviderError::Upstream { message, code, .. } = &err {
                warn!(resource, status = status.as_u16(), ?code, %message, "Twilio rejected request");
            }
            return Err(err);
        }

        let created = decode_created(&raw_text)?;
        debug!(resource, id = %created.id, created_at = ?created.created_at, "Twilio resource created");
        Ok(created)
    }
}

/// Success payload fields we care about; the rest stays in `raw`.
#[derive(Debug, Deserialize)]
struct TwilioResource {
    sid: Option<String>,
    date_created: Option<String>,
}

/// Error payload returned on non-2xx responses.
#[derive(Debug, Deserialize)]
struct TwilioErrorBody {
    code: Option<i64>,
    message: String,
}

/// The request URL carries the account SID, so it is dropped from the error.
fn transport_error(resource: &str, e: reqwest::Error) -> ProviderError {
    let e = e.without_url();
    warn!(resource, error = %e, "Twilio request did not complete");
    ProviderError::Http(e.to_string())
}

fn decode_created(raw_text: &str) -> Result<ProviderResponse, ProviderError> {
    let raw_json: serde_json::Value = serde_json::from_str(raw_text).map_err(|e| {
        ProviderError::Unexpected(format!("provider response was not JSON: {}", e))
    })?;
    let resource: TwilioResource = serde_json::from_value(raw_json.clone())
        .map_err(|e| ProviderError::Unexpected(format!("provider response: {}", e)))?;

    let id = resource
        .sid
        .filter(|sid| !sid.is_empty())
        .ok_or_else(|| ProviderError::Unexpected("provider response had no sid".into()))?;
    let created_at = resource
        .date_created
        .as_deref()
        .and_then(|s| OffsetDateTime::parse(s, &Rfc2822).ok());

    Ok(ProviderResponse {
        id,
        provider: PROVIDER,
        created_at,
        raw: raw_json,
    })
}

fn decode_error(status: u16, raw_text: &str) -> ProviderError {
    match serde_json::from_str::<TwilioErrorBody>(raw_text) {
        Ok(body) => ProviderError::Upstream {
            message: body.message,
            status,
            code: body.code,
        },
        Err(_) => ProviderError::Upstream {
            message: format!("HTTP {}: {}", status, raw_text),
            status,
            code: None,
        },
    }
}

#[async_trait]
impl CommsClient for TwilioClient {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    async fn send_message(&self, req: MessageRequest<'_>) -> Result<ProviderResponse, ProviderError> {
        info!(to = req.to, "Sending SMS via Twilio");
        self.create(
            "Messages",
            &[("Body", req.body), ("From", req.from), ("To", req.to)],
        )
        .await
    }

    async fn place_call(&self, req: CallRequest<'_>) -> Result<ProviderResponse, ProviderError> {
        info!(to = req.to, "Placing call via Twilio");
        self.create(
            "Calls",
            &[("From", req.from), ("To", req.to), ("Url", req.instructions_url)],
        )
        .await
    }
}

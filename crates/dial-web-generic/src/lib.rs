use dial_core::{
    Admission, AdmissionControl, CallRequest, ClientIdentity, CommsClient, EndpointClass,
    GatewayError, GatewayResponse, Headers, MessageRequest, RawCall, RawMessage,
    RequestValidator, ValidationError, parse_body,
};
use futures::FutureExt;
use std::any::Any;
use std::net::IpAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

/// Provider-side settings the pipeline needs for every delegated request.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Provider-owned number every message and call originates from.
    pub from_number: String,
    /// Instructions fetched by the provider when a call connects.
    pub call_instructions_url: String,
}

/// Framework-agnostic processor that runs decode → limiter → validator → provider for each request.
///
/// A body that is not JSON at all is refused before the limiter, so it never
/// uses quota; everything after admission counts.
#[derive(Clone)]
pub struct GatewayProcessor {
    limiter: Arc<dyn AdmissionControl>,
    validator: RequestValidator,
    client: Arc<dyn CommsClient>,
    settings: Arc<DispatchSettings>,
}

impl GatewayProcessor {
    pub fn new(
        limiter: Arc<dyn AdmissionControl>,
        validator: RequestValidator,
        client: Arc<dyn CommsClient>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            limiter,
            validator,
            client,
            settings: Arc::new(settings),
        }
    }

    /// Handle a `/send-sms` request body and return a framework-agnostic response
    pub async fn send_sms(&self, identity: &ClientIdentity, body: &[u8]) -> GatewayResponse {
        let outcome = self.guard(self.send_sms_internal(identity, body)).await;
        match outcome {
            Ok(sid) => GatewayResponse::message_sent(sid),
            Err(e) => self.error_to_response(EndpointClass::Sms, identity, e),
        }
    }

    /// Handle a `/make-call` request body and return a framework-agnostic response
    pub async fn make_call(&self, identity: &ClientIdentity, body: &[u8]) -> GatewayResponse {
        let outcome = self.guard(self.make_call_internal(identity, body)).await;
        match outcome {
            Ok(sid) => GatewayResponse::call_placed(sid),
            Err(e) => self.error_to_response(EndpointClass::Call, identity, e),
        }
    }

    async fn send_sms_internal(
        &self,
        identity: &ClientIdentity,
        body: &[u8],
    ) -> Result<String, GatewayError> {
        let raw: RawMessage = parse_body(body)?;
        self.admit(identity, EndpointClass::Sms)?;
        let request = self.validator.validate_message(raw)?;

        let response = self
            .client
            .send_message(MessageRequest {
                to: &request.recipient,
                from: &self.settings.from_number,
                body: &request.body,
            })
            .await?;
        debug!(
            %identity,
            sid = %response.id,
            provider = response.provider,
            created_at = ?response.created_at,
            "message accepted"
        );
        Ok(response.id)
    }

    async fn make_call_internal(
        &self,
        identity: &ClientIdentity,
        body: &[u8],
    ) -> Result<String, GatewayError> {
        let raw: RawCall = parse_body(body)?;
        self.admit(identity, EndpointClass::Call)?;
        let request = self.validator.validate_call(raw)?;

        let response = self
            .client
            .place_call(CallRequest {
                to: &request.recipient,
                from: &self.settings.from_number,
                instructions_url: &self.settings.call_instructions_url,
            })
            .await?;
        debug!(
            %identity,
            sid = %response.id,
            provider = response.provider,
            created_at = ?response.created_at,
            "call accepted"
        );
        Ok(response.id)
    }

    fn admit(&self, identity: &ClientIdentity, class: EndpointClass) -> Result<(), GatewayError> {
        match self.limiter.admit(identity, class) {
            Admission::Allowed => Ok(()),
            Admission::Denied {
                message,
                retry_after,
            } => Err(GatewayError::QuotaExceeded {
                message,
                retry_after,
            }),
        }
    }

    /// Turn a panic anywhere below into an internal error for this request only.
    async fn guard<F>(&self, pipeline: F) -> Result<String, GatewayError>
    where
        F: Future<Output = Result<String, GatewayError>>,
    {
        match AssertUnwindSafe(pipeline).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => Err(GatewayError::Internal(panic_message(panic.as_ref()))),
        }
    }

    fn error_to_response(
        &self,
        class: EndpointClass,
        identity: &ClientIdentity,
        error: GatewayError,
    ) -> GatewayResponse {
        match &error {
            GatewayError::QuotaExceeded { .. } => {
                debug!(%identity, %class, "request rejected by limiter");
            }
            GatewayError::Validation(e @ ValidationError::MissingField(_)) => {
                debug!(%identity, %class, error = %e, "request rejected as invalid");
            }
            GatewayError::Validation(e) => {
                error!(%identity, %class, error = %e, "request body could not be used");
            }
            GatewayError::Upstream(e) => {
                error!(%class, provider = self.client.provider(), error = %e, "provider request failed");
            }
            GatewayError::Internal(detail) => {
                error!(%class, detail = %detail, "internal error while handling request");
            }
        }
        error.into_response()
    }
}

pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Derives the limiter key from the request origin.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver {
    trust_forwarded_headers: bool,
}

impl IdentityResolver {
    pub fn new(trust_forwarded_headers: bool) -> Self {
        Self {
            trust_forwarded_headers,
        }
    }

    /// Peer address by default; proxy headers only when they are trusted.
    pub fn resolve(&self, headers: &Headers, peer: Option<IpAddr>) -> ClientIdentity {
        let forwarded = if self.trust_forwarded_headers {
            forwarded_ip(headers)
        } else {
            None
        };
        forwarded
            .or(peer)
            .map(ClientIdentity::from_ip)
            .unwrap_or_else(ClientIdentity::unknown)
    }
}

fn forwarded_ip(headers: &Headers) -> Option<IpAddr> {
    // Look for common proxy headers, in order of preference.
    // X-Forwarded-For uses its last hop: the one appended by the trusted proxy.
    for wanted in ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"] {
        let value = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
            .map(|(_, value)| value);
        if let Some(ip) = value.and_then(|v| v.rsplit(',').next()?.trim().parse().ok()) {
            return Some(ip);
        }
    }
    None
}

/// Helper trait for framework adapters to convert headers
pub trait HeaderConverter {
    type HeaderType;

    fn to_generic_headers(headers: &Self::HeaderType) -> Headers;
}

/// Helper trait for framework adapters to convert responses
pub trait ResponseConverter {
    type ResponseType;

    fn from_gateway_response(response: GatewayResponse) -> Self::ResponseType;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dial_core::{HttpStatus, ProviderError, ProviderResponse};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct AllowFirst {
        remaining: AtomicU32,
    }

    impl AdmissionControl for AllowFirst {
        fn admit(&self, _identity: &ClientIdentity, class: EndpointClass) -> Admission {
            let left = self.remaining.load(Ordering::SeqCst);
            if left == 0 {
                return Admission::Denied {
                    message: format!("Too many {} requests", class),
                    retry_after: Duration::from_secs(30),
                };
            }
            self.remaining.store(left - 1, Ordering::SeqCst);
            Admission::Allowed
        }
    }

    fn allow(n: u32) -> Arc<dyn AdmissionControl> {
        Arc::new(AllowFirst {
            remaining: AtomicU32::new(n),
        })
    }

    enum Behaviour {
        Succeed,
        Reject(&'static str),
        Unreachable,
        Panic,
    }

    struct StubClient {
        behaviour: Behaviour,
        calls: Mutex<Vec<(String, String, String)>>,
    }

    impl StubClient {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn respond(&self, id: &str) -> Result<ProviderResponse, ProviderError> {
            match self.behaviour {
                Behaviour::Succeed => Ok(ProviderResponse {
                    id: id.to_string(),
                    provider: "stub",
                    created_at: None,
                    raw: serde_json::Value::Null,
                }),
                Behaviour::Reject(message) => Err(ProviderError::Upstream {
                    message: message.to_string(),
                    status: 400,
                    code: None,
                }),
                Behaviour::Unreachable => Err(ProviderError::Http(
                    "error sending request for url (http://stub/Accounts/ACsecret)".into(),
                )),
                Behaviour::Panic => panic!("stub exploded"),
            }
        }
    }

    #[async_trait]
    impl CommsClient for StubClient {
        fn provider(&self) -> &'static str {
            "stub"
        }

        async fn send_message(
            &self,
            req: MessageRequest<'_>,
        ) -> Result<ProviderResponse, ProviderError> {
            self.calls
                .lock()
                .unwrap()
                .push((req.from.into(), req.to.into(), req.body.into()));
            self.respond("SM123")
        }

        async fn place_call(&self, req: CallRequest<'_>) -> Result<ProviderResponse, ProviderError> {
            self.calls.lock().unwrap().push((
                req.from.into(),
                req.to.into(),
                req.instructions_url.into(),
            ));
            self.respond("CA123")
        }
    }

    fn processor(limiter: Arc<dyn AdmissionControl>, client: Arc<StubClient>) -> GatewayProcessor {
        GatewayProcessor::new(
            limiter,
            RequestValidator::default(),
            client,
            DispatchSettings {
                from_number: "+15005550006".into(),
                call_instructions_url: "http://example.test/voice.xml".into(),
            },
        )
    }

    fn identity() -> ClientIdentity {
        ClientIdentity::new("127.0.0.1")
    }

    #[tokio::test]
    async fn sms_success_returns_message_sid() {
        let client = StubClient::new(Behaviour::Succeed);
        let processor = processor(allow(10), client.clone());

        let response = processor
            .send_sms(&identity(), br#"{"message":"hi","to":"9876543210"}"#)
            .await;

        assert_eq!(response.status, HttpStatus::Ok);
        assert_eq!(response.body, r#"{"success":true,"messageSid":"SM123"}"#);
        let calls = client.calls.lock().unwrap();
        assert_eq!(
            calls[0],
            (
                "+15005550006".to_string(),
                "+919876543210".to_string(),
                "hi".to_string()
            )
        );
    }

    #[tokio::test]
    async fn call_uses_configured_instructions_url() {
        let client = StubClient::new(Behaviour::Succeed);
        let processor = processor(allow(10), client.clone());

        let response = processor
            .make_call(&identity(), br#"{"to":"+447700900000"}"#)
            .await;

        assert_eq!(response.status, HttpStatus::Ok);
        assert_eq!(response.reply().unwrap().call_sid.as_deref(), Some("CA123"));
        let calls = client.calls.lock().unwrap();
        assert_eq!(calls[0].1, "+447700900000");
        assert_eq!(calls[0].2, "http://example.test/voice.xml");
    }

    #[tokio::test]
    async fn missing_fields_never_reach_provider() {
        let client = StubClient::new(Behaviour::Succeed);
        let processor = processor(allow(10), client.clone());

        let response = processor.send_sms(&identity(), br#"{"to":"9876543210"}"#).await;

        assert_eq!(response.status, HttpStatus::BadRequest);
        assert_eq!(
            response.reply().unwrap().error.as_deref(),
            Some("Message and recipient number are required.")
        );
        assert!(client.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn quota_is_checked_before_validation() {
        let client = StubClient::new(Behaviour::Succeed);
        let processor = processor(allow(0), client.clone());

        // Missing fields are answered with the quota rejection.
        let response = processor.make_call(&identity(), b"{}").await;

        assert_eq!(response.status, HttpStatus::TooManyRequests);
        assert_eq!(response.retry_after, Some(30));
        assert_eq!(
            response.reply().unwrap().error.as_deref(),
            Some("Too many call requests")
        );
        assert!(client.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn undecodable_body_is_internal_error_and_keeps_quota() {
        let client = StubClient::new(Behaviour::Succeed);
        let processor = processor(allow(1), client.clone());

        let response = processor.send_sms(&identity(), b"{oops").await;
        assert_eq!(response.status, HttpStatus::InternalServerError);
        assert_eq!(
            response.body,
            r#"{"success":false,"error":"Internal Server Error"}"#
        );

        let response = processor
            .send_sms(&identity(), br#"{"message":"hi","to":"1"}"#)
            .await;
        assert_eq!(response.status, HttpStatus::Ok);
        assert_eq!(client.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn non_string_recipient_uses_quota_and_fails_generically() {
        let client = StubClient::new(Behaviour::Succeed);
        let processor = processor(allow(1), client.clone());

        let response = processor.make_call(&identity(), br#"{"to":9876543210}"#).await;
        assert_eq!(response.status, HttpStatus::InternalServerError);
        assert_eq!(
            response.reply().unwrap().error.as_deref(),
            Some("Internal Server Error")
        );

        let response = processor.make_call(&identity(), br#"{"to":"1"}"#).await;
        assert_eq!(response.status, HttpStatus::TooManyRequests);
        assert!(client.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_hides_its_detail() {
        let client = StubClient::new(Behaviour::Unreachable);
        let processor = processor(allow(10), client);

        let response = processor
            .send_sms(&identity(), br#"{"message":"hi","to":"123"}"#)
            .await;

        assert_eq!(response.status, HttpStatus::InternalServerError);
        assert_eq!(
            response.body,
            r#"{"success":false,"error":"Upstream provider unavailable"}"#
        );
    }

    #[tokio::test]
    async fn provider_failure_surfaces_its_message() {
        let client = StubClient::new(Behaviour::Reject("Invalid phone number"));
        let processor = processor(allow(10), client);

        let response = processor
            .send_sms(&identity(), br#"{"message":"hi","to":"123"}"#)
            .await;

        assert_eq!(response.status, HttpStatus::InternalServerError);
        assert_eq!(
            response.body,
            r#"{"success":false,"error":"Invalid phone number"}"#
        );
    }

    #[tokio::test]
    async fn provider_panic_becomes_generic_internal_error() {
        let client = StubClient::new(Behaviour::Panic);
        let processor = processor(allow(10), client);

        let response = processor.make_call(&identity(), br#"{"to":"123"}"#).await;

        assert_eq!(response.status, HttpStatus::InternalServerError);
        assert_eq!(
            response.body,
            r#"{"success":false,"error":"Internal Server Error"}"#
        );
    }

    #[test]
    fn resolver_ignores_forwarded_headers_by_default() {
        let headers: Headers = vec![("X-Forwarded-For".into(), "10.0.0.1".into())];
        let peer = "192.168.1.5".parse().ok();

        let identity = IdentityResolver::default().resolve(&headers, peer);
        assert_eq!(identity.as_str(), "192.168.1.5");
    }

    #[test]
    fn resolver_uses_proxy_appended_address_when_trusted() {
        let resolver = IdentityResolver::new(true);
        let headers: Headers = vec![
            ("x-real-ip".into(), "10.9.9.9".into()),
            ("X-Forwarded-For".into(), "10.0.0.1, 172.16.0.1".into()),
        ];

        // The leftmost entry is whatever the caller sent; the proxy appends the last one.
        let identity = resolver.resolve(&headers, "192.168.1.5".parse().ok());
        assert_eq!(identity.as_str(), "172.16.0.1");
    }

    #[test]
    fn resolver_skips_unparseable_headers() {
        let resolver = IdentityResolver::new(true);
        let headers: Headers = vec![
            ("x-forwarded-for".into(), "garbage".into()),
            ("cf-connecting-ip".into(), "2001:db8::1".into()),
        ];
        assert_eq!(resolver.resolve(&headers, None).as_str(), "2001:db8::1");
        assert_eq!(resolver.resolve(&vec![], None), ClientIdentity::unknown());
    }
}

use crate::config::AppConfig;
use crate::rate_limiter::{Clock, RateLimiter};
use axum::Router;
use dial_core::{CommsClient, PhoneNormalizer, ProviderError, RequestValidator};
use dial_twilio::TwilioClient;
use dial_web_axum::AppState;
use dial_web_generic::{DispatchSettings, GatewayProcessor, IdentityResolver};
use std::sync::Arc;
use std::time::Duration;

/// Twilio client built from the validated provider settings.
pub fn twilio_client(config: &AppConfig) -> Result<TwilioClient, ProviderError> {
    let twilio = &config.providers.twilio;
    TwilioClient::with_base_url(
        twilio.account_sid.clone(),
        twilio.auth_token.clone(),
        twilio.base_url.clone(),
    )
    .with_timeout(Duration::from_secs(twilio.request_timeout_seconds))
}

/// Wire limiter, validator and provider into the HTTP router.
pub fn gateway_router(
    config: &AppConfig,
    client: Arc<dyn CommsClient>,
    clock: Arc<dyn Clock>,
) -> Router {
    let limiter = Arc::new(RateLimiter::with_clock(config.rate_limit.clone(), clock));
    let validator = RequestValidator::new(PhoneNormalizer::new(
        config.gateway.default_country_prefix.clone(),
    ));
    let processor = GatewayProcessor::new(
        limiter,
        validator,
        client,
        DispatchSettings {
            from_number: config.providers.twilio.phone_number.clone(),
            call_instructions_url: config.gateway.call_instructions_url.clone(),
        },
    );
    let state = AppState {
        processor,
        resolver: IdentityResolver::new(config.security.trust_forwarded_headers),
    };
    dial_web_axum::router(state, config.security.max_body_size)
}

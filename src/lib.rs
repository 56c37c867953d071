//! # dialgate
//!
//! A small, rate-limited HTTP gateway that sends SMS and places voice calls
//! through Twilio.
//!
//! ## Features
//!
//! - **Two endpoints**: `POST /send-sms` and `POST /make-call`, plus a liveness `GET /`
//! - **Per-client throttling**: fixed-window limits per endpoint class, keyed by origin address
//! - **Recipient normalization**: numbers without `+` get a configurable country prefix
//! - **Uniform responses**: `{success, messageSid | callSid | error}` for every outcome
//! - **Layered configuration**: defaults, config files, `DIALGATE__*` and plain `TWILIO_*` variables
//! - **Observability**: structured logging through `tracing`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dialgate::prelude::*;
//! use std::sync::Arc;
//!
//! let config = AppConfig::load()?;
//! config.validate()?;
//! let client = Arc::new(twilio_client(&config)?);
//! let app = gateway_router(&config, client, Arc::new(SystemClock));
//! ```
//!
//! ## Configuration
//!
//! ```rust,ignore
//! use dialgate::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! println!("SMS limit: {} requests per {}s",
//!          config.rate_limit.sms.max_requests,
//!          config.rate_limit.sms.window_seconds);
//! ```

pub mod app;
pub mod config;
pub mod rate_limiter;
pub mod telemetry;

pub use app::{gateway_router, twilio_client};
pub use crate::config::*;

/// Common imports for dialgate usage
pub mod prelude {
    pub use crate::app::{gateway_router, twilio_client};
    pub use crate::config::{
        AppConfig, GatewayConfig, LoggingConfig, ProvidersConfig, SecurityConfig, ServerConfig,
        TwilioConfig,
    };
    pub use crate::rate_limiter::{
        ClassLimit, Clock, ManualClock, RateLimitConfig, RateLimitStatus, RateLimiter, SystemClock,
    };
    pub use crate::telemetry::init_tracing;
    pub use dial_core::*;
}

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, DefaultBodyLimit, FromRequestParts, State, rejection::BytesRejection},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use dial_core::{GatewayResponse, Headers, HttpStatus};
use dial_web_generic::{
    GatewayProcessor, HeaderConverter, IdentityResolver, ResponseConverter, panic_message,
};
use std::any::Any;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Plain text answered on `GET /`.
pub const LIVENESS_TEXT: &str = "Hello user, server is running";

#[derive(Clone)]
pub struct AppState {
    pub processor: GatewayProcessor,
    pub resolver: IdentityResolver,
}

/// Axum-specific header converter
pub struct AxumHeaderConverter;

impl HeaderConverter for AxumHeaderConverter {
    type HeaderType = HeaderMap;

    fn to_generic_headers(headers: &Self::HeaderType) -> Headers {
        headers
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }
}

/// Axum-specific response converter
pub struct AxumResponseConverter;

impl ResponseConverter for AxumResponseConverter {
    type ResponseType = Response;

    fn from_gateway_response(response: GatewayResponse) -> Self::ResponseType {
        let status = StatusCode::from_u16(response.status.as_u16())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut res = (
            status,
            [(header::CONTENT_TYPE, response.content_type)],
            response.body,
        )
            .into_response();
        if let Some(secs) = response.retry_after {
            res.headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        res
    }
}

/// Socket peer address, present when the server was started with connect info.
#[derive(Debug, Clone, Copy)]
pub struct PeerAddr(pub Option<IpAddr>);

impl<S: Send + Sync> FromRequestParts<S> for PeerAddr {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(PeerAddr(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip()),
        ))
    }
}

/// Handler: GET /
pub async fn liveness() -> &'static str {
    LIVENESS_TEXT
}

/// Answer a body the framework refused to buffer in the uniform JSON shape.
fn body_rejection(rejection: BytesRejection) -> Response {
    let response = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        GatewayResponse::error(HttpStatus::PayloadTooLarge, "Request body is too large.")
    } else {
        error!(detail = %rejection.body_text(), "request body could not be read");
        GatewayResponse::internal_error()
    };
    AxumResponseConverter::from_gateway_response(response)
}

/// Handler: POST /send-sms
pub async fn send_sms(
    State(state): State<AppState>,
    PeerAddr(peer): PeerAddr,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => return body_rejection(rejection),
    };
    let identity = state
        .resolver
        .resolve(&AxumHeaderConverter::to_generic_headers(&headers), peer);
    let response = state.processor.send_sms(&identity, &body).await;
    AxumResponseConverter::from_gateway_response(response)
}

/// Handler: POST /make-call
pub async fn make_call(
    State(state): State<AppState>,
    PeerAddr(peer): PeerAddr,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => return body_rejection(rejection),
    };
    let identity = state
        .resolver
        .resolve(&AxumHeaderConverter::to_generic_headers(&headers), peer);
    let response = state.processor.make_call(&identity, &body).await;
    AxumResponseConverter::from_gateway_response(response)
}

async fn not_found() -> Response {
    AxumResponseConverter::from_gateway_response(GatewayResponse::error(
        HttpStatus::NotFound,
        "Not Found",
    ))
}

async fn method_not_allowed() -> Response {
    AxumResponseConverter::from_gateway_response(GatewayResponse::error(
        HttpStatus::MethodNotAllowed,
        "Method Not Allowed",
    ))
}

/// Last-resort boundary: a panic escaping any handler becomes the generic 500.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response<Body> {
    error!(detail = %panic_message(panic.as_ref()), "handler panicked");
    AxumResponseConverter::from_gateway_response(GatewayResponse::internal_error())
}

/// Build the gateway router with tracing, panic recovery, CORS and hardening headers.
pub fn router(state: AppState, max_body_size: usize) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/send-sms", post(send_sms))
        .route("/make-call", post(make_call))
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("no-referrer"),
        ))
        .with_state(state)
}

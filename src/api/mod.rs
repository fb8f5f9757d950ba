//! HTTP surface: router wiring, middleware stack and the serve loop.

use anyhow::Result;
use axum::{
    body::Body,
    extract::{Extension, MatchedPath},
    http::{HeaderName, HeaderValue, Method, Request},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, warn, Span};
use ulid::Ulid;

use crate::account::AccountCreator;
use crate::admission::AdmissionController;
use crate::notify::NotificationSink;
use crate::registry::{ReadMode, RegistryCache};

pub mod handlers;
mod openapi;

pub use openapi::openapi;

/// Everything the handlers need, shared behind one `Extension`.
pub struct GatewayState {
    pub admission: AdmissionController,
    pub registry: RegistryCache,
    pub creator: Arc<dyn AccountCreator>,
    pub notifier: Arc<dyn NotificationSink>,
}

/// Build the gateway router with the full middleware stack.
#[must_use]
pub fn router(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any)
        .max_age(Duration::from_secs(86_400));

    Router::new()
        .route(
            "/",
            get(handlers::stats::stats)
                .post(handlers::create::create)
                .options(handlers::create::preflight)
                .fallback(handlers::create::method_not_allowed),
        )
        .route(
            "/health",
            get(handlers::health::health).options(handlers::health::health),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(state)),
        )
}

/// Start the server.
/// # Errors
/// Returns an error if the listener cannot bind or the server fails.
pub async fn new(port: u16, state: Arc<GatewayState>) -> Result<()> {
    // Warm the registry snapshot; a failure here keeps /health red until a
    // later fetch succeeds, it does not stop the gateway.
    if let Err(err) = state.registry.get_users(ReadMode::Cached).await {
        warn!(error = %err, "startup registry warm-up failed");
    }

    let app = router(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Gracefully shutdown");
    })
    .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

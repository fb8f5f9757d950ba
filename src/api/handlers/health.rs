//! Health probe for the gateway.
//!
//! Reports build metadata and the registry dependency status. The registry
//! being down does not stop the statistics endpoint (it serves last-known
//! numbers), but orchestrators still want to see the dependency go red.

use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;
use utoipa::ToSchema;

use crate::api::GatewayState;
use crate::registry::ReadMode;
use crate::GIT_COMMIT_HASH;

const HEALTH_REGISTRY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    registry: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Registry dependency is reachable", body = Health),
        (status = 503, description = "Registry dependency is unreachable", body = Health)
    ),
    tag = "health",
)]
/// Report gateway health and registry dependency status.
pub async fn health(
    method: Method,
    Extension(state): Extension<Arc<GatewayState>>,
) -> impl IntoResponse {
    let registry_healthy = evaluate_registry_probe(&state).await;

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        registry: if registry_healthy {
            "ok".to_string()
        } else {
            "error".to_string()
        },
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        })
        .map_err(|err| {
            debug!("Failed to parse X-App header: {}", err);
        })
        .unwrap_or_else(|()| HeaderMap::new());

    if registry_healthy {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

/// Probe the registry through the cache under a short deadline; a fresh
/// snapshot answers instantly.
async fn evaluate_registry_probe(state: &GatewayState) -> bool {
    match timeout(
        HEALTH_REGISTRY_TIMEOUT,
        state.registry.get_users(ReadMode::Cached),
    )
    .await
    {
        Ok(Ok(_)) => true,
        Ok(Err(err)) => {
            debug!(error = %err, "registry probe failed");
            false
        }
        Err(_) => {
            debug!("registry probe timed out");
            false
        }
    }
}

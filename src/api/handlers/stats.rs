//! Read-only statistics endpoint.

use axum::{extract::Extension, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;
use utoipa::ToSchema;

use crate::api::GatewayState;
use crate::registry::RegistryStats;

#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub ok: bool,
    pub message: String,
    pub version: String,
    pub timestamp_ms: u64,
    pub stats: RegistryStats,
    pub limits: Limits,
}

/// Advertised admission limits so clients can pace themselves.
#[derive(Debug, Serialize, ToSchema)]
pub struct Limits {
    pub window_seconds: u64,
    pub window_max: usize,
    pub ban_seconds: u64,
    pub cooldown_seconds: u64,
}

#[utoipa::path(
    get,
    path= "/",
    responses (
        (status = 200, description = "Aggregate registry statistics", body = StatsResponse),
    ),
    tag = "gateway",
)]
/// Return aggregate user statistics sourced through the registry cache.
/// Never fails: on registry outage the last-known numbers are served.
pub async fn stats(Extension(state): Extension<Arc<GatewayState>>) -> impl IntoResponse {
    let stats = state.registry.stats().await;
    let policy = state.admission.policy();

    Json(StatsResponse {
        ok: true,
        message: "gerbang account gateway".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp_ms: now_ms(),
        stats,
        limits: Limits {
            window_seconds: policy.window().as_secs(),
            window_max: policy.window_max(),
            ban_seconds: policy.ban_duration().as_secs(),
            cooldown_seconds: policy.cooldown().as_secs(),
        },
    })
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

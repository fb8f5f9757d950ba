//! OpenAPI document for the gateway routes.

use utoipa::OpenApi;

use crate::api::handlers;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::stats::stats,
        handlers::create::create,
        handlers::health::health,
    ),
    tags(
        (name = "gateway", description = "Admission-controlled account provisioning"),
        (name = "health", description = "Liveness and dependency probes")
    )
)]
pub struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

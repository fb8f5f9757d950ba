//! Account creation endpoint.
//!
//! Flow Overview:
//! 1) Derive the client identity and run the admission checks (ban, sliding
//!    window, cooldown) before anything touches the network.
//! 2) Validate and normalize the requested username; structural failures feed
//!    the failure counter.
//! 3) Reconcile against the remote registry (cached read, then authoritative
//!    re-read on a hit) and fail closed on ambiguity.
//! 4) Forward the creation with generated credentials; only a full success
//!    starts the cooldown and resets the failure counter.

use axum::{
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use super::{client_identity, error_response};
use crate::account::AccountRequest;
use crate::api::GatewayState;
use crate::error::GateError;
use crate::notify;
use crate::registry::{reconcile, RegistryStats};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRequest {
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AccountData {
    pub username: String,
    pub password: String,
    pub role: String,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateResponse {
    pub ok: bool,
    pub message: String,
    pub data: AccountData,
    pub stats: RegistryStats,
    pub cooldown_until_ms: u64,
    #[schema(value_type = Object)]
    pub remote_response: serde_json::Value,
}

#[utoipa::path(
    post,
    path= "/",
    request_body = CreateRequest,
    responses (
        (status = 200, description = "Account created", body = CreateResponse),
        (status = 400, description = "Invalid input", body = super::ErrorBody),
        (status = 403, description = "Client banned", body = super::ErrorBody),
        (status = 409, description = "Username already exists", body = super::ErrorBody),
        (status = 429, description = "Rate limited or cooldown active", body = super::ErrorBody),
        (status = 502, description = "Upstream unreachable", body = super::ErrorBody),
    ),
    tag = "gateway",
)]
#[instrument(skip(state, headers, payload))]
pub async fn create(
    Extension(state): Extension<Arc<GatewayState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Option<Json<CreateRequest>>,
) -> Response {
    let identity = client_identity(&headers, connect_info.map(|ConnectInfo(addr)| addr));

    if let Err(err) = state.admission.admit(&identity).await {
        notify::dispatch(
            &state.notifier,
            notify::blocked_message(&identity, err.reason(), err.lifts_at_ms()),
        );
        return error_response(&err).into_response();
    }

    let Some(Json(request)) = payload else {
        let err = state
            .admission
            .record_invalid_input(&identity, "missing or invalid JSON body")
            .await;
        notify::dispatch(
            &state.notifier,
            notify::invalid_input_message(&identity, "missing or invalid JSON body"),
        );
        return error_response(&err).into_response();
    };

    let username = reconcile::normalize_username(&request.username);
    if username.is_empty() {
        let err = state
            .admission
            .record_invalid_input(&identity, "username is required")
            .await;
        notify::dispatch(
            &state.notifier,
            notify::invalid_input_message(&identity, "empty username"),
        );
        return error_response(&err).into_response();
    }

    if let Err(err) = reconcile::ensure_username_available(&state.registry, &username).await {
        if matches!(err, GateError::DuplicateUsername) {
            // Duplicate submissions are client-caused; upstream outages are not.
            state.admission.record_failure(&identity).await;
        }
        return error_response(&err).into_response();
    }

    let account = AccountRequest::generate(username, identity.clone());

    match state.creator.create(&account).await {
        Err(err) => {
            state.admission.record_failure(&identity).await;
            warn!(%identity, username = %account.username, error = %err, "creation failed");
            notify::dispatch(
                &state.notifier,
                notify::creation_failed_message(&identity, &account.username, &err.to_string()),
            );
            error_response(&err).into_response()
        }
        Ok(receipt) => {
            let cooldown_until_ms = state.admission.record_success(&identity).await;
            state.registry.bump_optimistic().await;
            let stats = state.registry.refresh_stats().await;

            info!(%identity, username = %account.username, "account created");
            notify::dispatch(
                &state.notifier,
                notify::created_message(
                    &identity,
                    &account.username,
                    &account.role,
                    account.expires_at_ms,
                    cooldown_until_ms,
                ),
            );

            (
                StatusCode::OK,
                Json(CreateResponse {
                    ok: true,
                    message: "account created".to_string(),
                    data: AccountData {
                        username: account.username,
                        password: account.password,
                        role: account.role,
                        created_at_ms: account.created_at_ms,
                        expires_at_ms: account.expires_at_ms,
                    },
                    stats,
                    cooldown_until_ms,
                    remote_response: receipt.remote_response,
                }),
            )
                .into_response()
        }
    }
}

/// Empty success for cross-origin preflight.
pub async fn preflight() -> StatusCode {
    StatusCode::OK
}

/// Explicit 405 envelope listing the allowed methods.
pub async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(serde_json::json!({
            "ok": false,
            "error": "method not allowed",
            "allowed": ["GET", "POST", "OPTIONS"],
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountCreator, CreationReceipt};
    use crate::admission::{AdmissionController, AdmissionPolicy, AdmissionStore};
    use crate::fetch::FetchError;
    use crate::notify::{LogSink, NotificationSink};
    use crate::registry::test_support::user;
    use crate::registry::{ReadMode, RegistryCache, RegistrySource, UserRecord};
    use axum::body::Body;
    use axum::http::Request;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// Source that always answers with the same user list.
    struct StaticSource {
        users: Vec<UserRecord>,
    }

    impl RegistrySource for StaticSource {
        fn fetch_users<'a>(
            &'a self,
            _mode: ReadMode,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<UserRecord>, FetchError>> + Send + 'a>>
        {
            let users = self.users.clone();
            Box::pin(async move { Ok(users) })
        }
    }

    /// Source that always fails.
    struct DownSource;

    impl RegistrySource for DownSource {
        fn fetch_users<'a>(
            &'a self,
            _mode: ReadMode,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<UserRecord>, FetchError>> + Send + 'a>>
        {
            Box::pin(async move { Err(FetchError::Transport("connection refused".to_string())) })
        }
    }

    #[derive(Default)]
    struct RecordingCreator {
        requests: Mutex<Vec<AccountRequest>>,
        fail: bool,
    }

    impl AccountCreator for RecordingCreator {
        fn create<'a>(
            &'a self,
            request: &'a AccountRequest,
        ) -> Pin<Box<dyn Future<Output = Result<CreationReceipt, GateError>> + Send + 'a>>
        {
            self.requests
                .lock()
                .expect("creator lock")
                .push(request.clone());
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    Err(GateError::UpstreamUnavailable("create endpoint down".to_string()))
                } else {
                    Ok(CreationReceipt {
                        remote_response: serde_json::json!({"status": "ok"}),
                    })
                }
            })
        }
    }

    fn state_with(
        source: Arc<dyn RegistrySource>,
        creator: Arc<RecordingCreator>,
    ) -> Arc<GatewayState> {
        let notifier: Arc<dyn NotificationSink> = Arc::new(LogSink);
        Arc::new(GatewayState {
            admission: AdmissionController::new(
                AdmissionPolicy::new(),
                Arc::new(AdmissionStore::new()),
            ),
            registry: RegistryCache::new(source),
            creator,
            notifier,
        })
    }

    fn post(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .header("x-real-ip", "203.0.113.50")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn post_creates_account_with_normalized_username() {
        let creator = Arc::new(RecordingCreator::default());
        let state = state_with(Arc::new(StaticSource { users: vec![] }), creator.clone());
        let app = crate::api::router(state);

        let response = app
            .oneshot(post(r#"{"username": "  Al ice  "}"#))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["ok"], serde_json::json!(true));
        assert_eq!(body["data"]["username"], serde_json::json!("Alice"));
        assert_eq!(body["data"]["role"], serde_json::json!("premium"));
        assert!(body["cooldown_until_ms"].as_u64().expect("cooldown") > 0);

        let forwarded = creator.requests.lock().expect("creator lock");
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].username, "Alice");
        assert_eq!(forwarded[0].created_by, "203.0.113.50");
    }

    #[tokio::test]
    async fn duplicate_username_is_conflict() {
        let creator = Arc::new(RecordingCreator::default());
        let state = state_with(
            Arc::new(StaticSource {
                users: vec![user("alice", "premium")],
            }),
            creator.clone(),
        );
        let app = crate::api::router(state);

        let response = app
            .oneshot(post(r#"{"username": "ALICE"}"#))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = body_json(response).await;
        assert_eq!(body["reason"], serde_json::json!("duplicate_username"));
        assert!(creator.requests.lock().expect("creator lock").is_empty());
    }

    #[tokio::test]
    async fn missing_body_is_invalid_input() {
        let creator = Arc::new(RecordingCreator::default());
        let state = state_with(Arc::new(StaticSource { users: vec![] }), creator);
        let app = crate::api::router(state);

        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header("x-real-ip", "203.0.113.51")
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["reason"], serde_json::json!("invalid_input"));
    }

    #[tokio::test]
    async fn empty_username_is_invalid_input() {
        let creator = Arc::new(RecordingCreator::default());
        let state = state_with(Arc::new(StaticSource { users: vec![] }), creator);
        let app = crate::api::router(state);

        let response = app
            .oneshot(post(r#"{"username": "   "}"#))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn registry_outage_is_bad_gateway() {
        let creator = Arc::new(RecordingCreator::default());
        let state = state_with(Arc::new(DownSource), creator.clone());
        let app = crate::api::router(state);

        let response = app
            .oneshot(post(r#"{"username": "alice"}"#))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = body_json(response).await;
        assert_eq!(body["reason"], serde_json::json!("upstream_unavailable"));
        assert!(creator.requests.lock().expect("creator lock").is_empty());
    }

    #[tokio::test]
    async fn failed_forwarding_is_bad_gateway_without_cooldown() {
        let creator = Arc::new(RecordingCreator {
            requests: Mutex::new(Vec::new()),
            fail: true,
        });
        let state = state_with(Arc::new(StaticSource { users: vec![] }), creator.clone());
        let app = crate::api::router(state.clone());

        let response = app
            .clone()
            .oneshot(post(r#"{"username": "alice"}"#))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        // No cooldown was set: an immediate retry reaches the creator again.
        let response = app
            .oneshot(post(r#"{"username": "alice"}"#))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(creator.requests.lock().expect("creator lock").len(), 2);
    }

    #[tokio::test]
    async fn rate_limit_escalates_to_ban() {
        let creator = Arc::new(RecordingCreator::default());
        let state = state_with(Arc::new(StaticSource { users: vec![] }), creator);
        let app = crate::api::router(state);

        // First request succeeds and starts the cooldown.
        let response = app
            .clone()
            .oneshot(post(r#"{"username": "alice"}"#))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        // Requests 2..=20 spend rate budget but bounce off the cooldown.
        for i in 2..=20 {
            let response = app
                .clone()
                .oneshot(post(r#"{"username": "bob"}"#))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS, "request {i}");
            let body = body_json(response).await;
            assert_eq!(body["reason"], serde_json::json!("cooldown_active"));
        }

        // The 21st request in the window trips the rate limiter and bans.
        let response = app
            .clone()
            .oneshot(post(r#"{"username": "bob"}"#))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = body_json(response).await;
        assert_eq!(body["reason"], serde_json::json!("rate_limited"));
        assert!(body["lifts_at_ms"].as_u64().expect("ban expiry") > 0);

        // From now on the client is banned outright.
        let response = app
            .oneshot(post(r#"{"username": "bob"}"#))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["reason"], serde_json::json!("banned"));
    }

    #[tokio::test]
    async fn get_returns_statistics_envelope() {
        let creator = Arc::new(RecordingCreator::default());
        let state = state_with(
            Arc::new(StaticSource {
                users: vec![user("alice", "premium"), user("bob", "free")],
            }),
            creator,
        );
        let app = crate::api::router(state);

        let request = Request::builder()
            .method("GET")
            .uri("/")
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["ok"], serde_json::json!(true));
        assert_eq!(body["stats"]["total_users"], serde_json::json!(2));
        assert_eq!(body["stats"]["premium_users"], serde_json::json!(1));
        assert_eq!(body["limits"]["window_max"], serde_json::json!(20));
    }

    #[tokio::test]
    async fn options_preflight_is_empty_success() {
        let creator = Arc::new(RecordingCreator::default());
        let state = state_with(Arc::new(StaticSource { users: vec![] }), creator);
        let app = crate::api::router(state);

        let request = Request::builder()
            .method("OPTIONS")
            .uri("/")
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn other_methods_get_405_with_allowed_list() {
        let creator = Arc::new(RecordingCreator::default());
        let state = state_with(Arc::new(StaticSource { users: vec![] }), creator);
        let app = crate::api::router(state);

        let request = Request::builder()
            .method("DELETE")
            .uri("/")
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let body = body_json(response).await;
        assert_eq!(
            body["allowed"],
            serde_json::json!(["GET", "POST", "OPTIONS"])
        );
    }
}

//! Credential generation and downstream account forwarding.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::time::SystemTime;
use tracing::{debug, info};

use crate::error::GateError;
use crate::fetch::{FetchError, FetchOptions, Fetcher};

pub const ROLE_PREMIUM: &str = "premium";

const PASSWORD_LENGTH: usize = 12;
const MIN_EXPIRE_DAYS: u64 = 31;
const MAX_EXPIRE_DAYS: u64 = 90;
const DAY_MS: u64 = 24 * 3600 * 1000;

const FORWARD_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);
const FORWARD_MAX_ATTEMPTS: u32 = 3;
const FORWARD_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

/// A fully prepared creation request, built per-request and never persisted.
#[derive(Clone, Debug, Serialize)]
pub struct AccountRequest {
    pub username: String,
    pub password: String,
    pub role: String,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
    pub created_by: String,
}

impl AccountRequest {
    /// Generate credentials for `username`, attributed to `created_by`.
    #[must_use]
    pub fn generate(username: String, created_by: String) -> Self {
        let created_at_ms = now_ms();
        Self {
            username,
            password: generate_password(),
            role: ROLE_PREMIUM.to_string(),
            created_at_ms,
            expires_at_ms: generate_expiry_ms(created_at_ms),
            created_by,
        }
    }
}

/// Outcome of a forwarded creation, carrying whatever the endpoint answered.
#[derive(Clone, Debug)]
pub struct CreationReceipt {
    pub remote_response: serde_json::Value,
}

/// Seam for the downstream creation endpoint so handler tests can stub it.
pub trait AccountCreator: Send + Sync {
    fn create<'a>(
        &'a self,
        request: &'a AccountRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CreationReceipt, GateError>> + Send + 'a>>;
}

/// Forwards creation requests to the remote endpoint over the resilient
/// fetch layer.
pub struct HttpAccountCreator {
    fetcher: Fetcher,
    create_url: String,
}

impl HttpAccountCreator {
    #[must_use]
    pub fn new(fetcher: Fetcher, create_url: String) -> Self {
        Self {
            fetcher,
            create_url,
        }
    }

    async fn forward(&self, request: &AccountRequest) -> Result<CreationReceipt, GateError> {
        let payload = serde_json::json!({
            "username": request.username,
            "password": request.password,
            "role": request.role,
            "expires": request.expires_at_ms,
            "createdBy": request.created_by,
            "timestamp": request.created_at_ms,
        });

        let options = FetchOptions::post(payload)
            .with_timeout(FORWARD_TIMEOUT)
            .with_max_attempts(FORWARD_MAX_ATTEMPTS)
            .with_retry_delay(FORWARD_RETRY_DELAY)
            .with_header("X-Forwarded-For", &request.created_by)
            .with_header("X-Client-IP", &request.created_by);

        debug!(username = %request.username, url = %self.create_url, "forwarding creation");

        let text = self
            .fetcher
            .fetch(&self.create_url, &options)
            .await
            .map_err(map_forward_error)?;

        // The endpoint's success criteria are undocumented; any 2xx body is
        // accepted, parseable or not.
        let remote_response = serde_json::from_str(&text)
            .unwrap_or_else(|_| serde_json::json!({ "raw": text }));

        info!(username = %request.username, "creation forwarded");
        Ok(CreationReceipt { remote_response })
    }
}

impl AccountCreator for HttpAccountCreator {
    fn create<'a>(
        &'a self,
        request: &'a AccountRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CreationReceipt, GateError>> + Send + 'a>> {
        Box::pin(self.forward(request))
    }
}

/// A final HTTP error means the endpoint answered and said no; anything else
/// means it could not be reached at all.
fn map_forward_error(err: FetchError) -> GateError {
    match &err {
        FetchError::Exhausted { last, .. } => {
            if let FetchError::Status { status, body } = last.as_ref() {
                let detail: String = body.trim().chars().take(200).collect();
                return GateError::UpstreamRejected(format!("HTTP {status}: {detail}"));
            }
            GateError::UpstreamUnavailable(err.to_string())
        }
        _ => GateError::UpstreamUnavailable(err.to_string()),
    }
}

#[must_use]
pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

/// Expiry between 31 and 90 days out, matching the upstream account policy.
#[must_use]
pub fn generate_expiry_ms(now_ms: u64) -> u64 {
    let days = rand::thread_rng().gen_range(MIN_EXPIRE_DAYS..=MAX_EXPIRE_DAYS);
    now_ms + days * DAY_MS
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_is_alphanumeric_and_fixed_length() {
        for _ in 0..32 {
            let password = generate_password();
            assert_eq!(password.len(), PASSWORD_LENGTH);
            assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn passwords_are_not_repeated() {
        let first = generate_password();
        let second = generate_password();
        assert_ne!(first, second);
    }

    #[test]
    fn expiry_stays_within_policy_bounds() {
        let now = 1_700_000_000_000;
        for _ in 0..32 {
            let expiry = generate_expiry_ms(now);
            assert!(expiry >= now + MIN_EXPIRE_DAYS * DAY_MS);
            assert!(expiry <= now + MAX_EXPIRE_DAYS * DAY_MS);
        }
    }

    #[test]
    fn generated_request_carries_identity_and_role() {
        let request = AccountRequest::generate("alice".to_string(), "203.0.113.9".to_string());
        assert_eq!(request.username, "alice");
        assert_eq!(request.role, ROLE_PREMIUM);
        assert_eq!(request.created_by, "203.0.113.9");
        assert!(request.expires_at_ms > request.created_at_ms);
    }

    #[test]
    fn final_http_error_maps_to_rejected() {
        let err = map_forward_error(FetchError::Exhausted {
            attempts: 3,
            last: Box::new(FetchError::Status {
                status: 422,
                body: "username policy violation".to_string(),
            }),
        });
        match err {
            GateError::UpstreamRejected(detail) => {
                assert!(detail.contains("422"));
                assert!(detail.contains("username policy violation"));
            }
            other => panic!("expected UpstreamRejected, got {other:?}"),
        }
    }

    #[test]
    fn transport_failure_maps_to_unavailable() {
        let err = map_forward_error(FetchError::Exhausted {
            attempts: 3,
            last: Box::new(FetchError::Timeout(FORWARD_TIMEOUT)),
        });
        assert!(matches!(err, GateError::UpstreamUnavailable(_)));
    }
}

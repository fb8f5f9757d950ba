//! Remote user registry: short-TTL snapshot cache over a resilient source.
//!
//! Flow Overview:
//! 1) `ReadMode::Cached` serves a fresh snapshot without touching the network;
//!    its only job is to collapse bursts of duplicate-check reads.
//! 2) `ReadMode::Authoritative` always bypasses the snapshot with a tighter
//!    timeout and fewer retries.
//! 3) The primary source gets a cache-busting query parameter when it sits
//!    behind an aggressive CDN; on total failure a content-addressed fallback
//!    representation of the same file is tried before giving up.
//! 4) Aggregate statistics are recomputed on every successful load and the
//!    last-known numbers are served when every read path fails.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;
use utoipa::ToSchema;

use crate::error::GateError;
use crate::fetch::{repair, FetchError, FetchOptions, Fetcher};

pub mod reconcile;

const SNAPSHOT_TTL: Duration = Duration::from_secs(5);

const CACHED_TIMEOUT: Duration = Duration::from_secs(10);
const CACHED_MAX_ATTEMPTS: u32 = 3;
const CACHED_RETRY_DELAY: Duration = Duration::from_millis(500);

const AUTHORITATIVE_TIMEOUT: Duration = Duration::from_secs(5);
const AUTHORITATIVE_MAX_ATTEMPTS: u32 = 2;
const AUTHORITATIVE_RETRY_DELAY: Duration = Duration::from_millis(250);

/// One record from the remote registry. Unknown fields are ignored; records
/// without a username are dropped during parsing.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    #[serde(default)]
    pub role: String,
}

/// How a registry read is allowed to be served.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadMode {
    /// Serve from a fresh snapshot when one exists.
    Cached,
    /// Bypass the snapshot; repair failures are errors, not empty lists.
    Authoritative,
}

/// Aggregate registry statistics, kept as last-known fallback for the
/// read-only statistics endpoint.
#[derive(Clone, Copy, Debug, Default, Serialize, ToSchema)]
pub struct RegistryStats {
    pub total_users: u64,
    pub premium_users: u64,
    pub last_updated_ms: u64,
}

/// Seam between the cache and the network so tests can script reads.
pub trait RegistrySource: Send + Sync {
    fn fetch_users<'a>(
        &'a self,
        mode: ReadMode,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<UserRecord>, FetchError>> + Send + 'a>>;
}

/// HTTP registry source reading a JSON array of user records.
pub struct HttpRegistrySource {
    fetcher: Fetcher,
    users_url: String,
}

impl HttpRegistrySource {
    #[must_use]
    pub fn new(fetcher: Fetcher, users_url: String) -> Self {
        Self { fetcher, users_url }
    }

    async fn fetch(&self, mode: ReadMode) -> Result<Vec<UserRecord>, FetchError> {
        let options = fetch_options(mode);
        let url = cache_busted_url(&self.users_url, now_ms());

        match self.fetcher.fetch(&url, &options).await {
            Ok(text) => parse_users(&text, mode),
            Err(primary_err) => {
                let Some(fallback_url) = contents_api_url(&self.users_url) else {
                    return Err(primary_err);
                };
                warn!(
                    error = %primary_err,
                    fallback = %fallback_url,
                    "primary registry read failed, trying contents fallback"
                );
                let text = self.fetcher.fetch(&fallback_url, &options).await?;
                let decoded = decode_contents_payload(&text)?;
                parse_users(&decoded, mode)
            }
        }
    }
}

impl RegistrySource for HttpRegistrySource {
    fn fetch_users<'a>(
        &'a self,
        mode: ReadMode,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<UserRecord>, FetchError>> + Send + 'a>> {
        Box::pin(self.fetch(mode))
    }
}

fn fetch_options(mode: ReadMode) -> FetchOptions {
    match mode {
        ReadMode::Cached => FetchOptions::get()
            .with_timeout(CACHED_TIMEOUT)
            .with_max_attempts(CACHED_MAX_ATTEMPTS)
            .with_retry_delay(CACHED_RETRY_DELAY),
        ReadMode::Authoritative => FetchOptions::get()
            .with_timeout(AUTHORITATIVE_TIMEOUT)
            .with_max_attempts(AUTHORITATIVE_MAX_ATTEMPTS)
            .with_retry_delay(AUTHORITATIVE_RETRY_DELAY),
    }
}

/// Append a `t=<millis>` parameter for sources behind an aggressive CDN.
fn cache_busted_url(users_url: &str, now_ms: u64) -> String {
    let Ok(mut parsed) = Url::parse(users_url) else {
        return users_url.to_string();
    };
    let needs_buster = parsed
        .host_str()
        .map_or(false, |host| host.ends_with("raw.githubusercontent.com"));
    if needs_buster {
        parsed
            .query_pairs_mut()
            .append_pair("t", &now_ms.to_string());
    }
    parsed.to_string()
}

/// Derive the contents-API representation of a raw GitHub file URL.
/// Returns `None` for sources without such an alternate read path.
fn contents_api_url(users_url: &str) -> Option<String> {
    let parsed = Url::parse(users_url).ok()?;
    if parsed.host_str() != Some("raw.githubusercontent.com") {
        return None;
    }

    let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();
    // raw URLs: /{owner}/{repo}/refs/heads/{branch}/{path...} or
    //           /{owner}/{repo}/{branch}/{path...}
    let (owner, repo, rest) = match segments.as_slice() {
        [owner, repo, rest @ ..] if rest.len() >= 2 => (*owner, *repo, rest),
        _ => return None,
    };
    let (branch, path) = match rest {
        ["refs", "heads", branch, path @ ..] if !path.is_empty() => (*branch, path),
        [branch, path @ ..] if !path.is_empty() => (*branch, path),
        _ => return None,
    };

    Some(format!(
        "https://api.github.com/repos/{owner}/{repo}/contents/{}?ref={branch}",
        path.join("/")
    ))
}

/// Decode a contents-API response: `{"content": "<base64>", "encoding": "base64"}`.
fn decode_contents_payload(text: &str) -> Result<String, FetchError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|err| FetchError::Payload(format!("contents response is not JSON: {err}")))?;
    let content = value
        .get("content")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| FetchError::Payload("contents response has no content field".to_string()))?;
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = BASE64_STANDARD
        .decode(compact.as_bytes())
        .map_err(|err| FetchError::Payload(format!("contents field is not base64: {err}")))?;
    String::from_utf8(bytes)
        .map_err(|err| FetchError::Payload(format!("decoded contents are not UTF-8: {err}")))
}

/// Parse a registry payload, repairing sloppy JSON first. In `Cached` mode an
/// unrecoverable payload degrades to an empty list; in `Authoritative` mode it
/// is an error so reconciliation can fail closed.
fn parse_users(text: &str, mode: ReadMode) -> Result<Vec<UserRecord>, FetchError> {
    let normalized = match repair::normalize_json(text) {
        Some(normalized) => normalized,
        None => match mode {
            ReadMode::Cached => {
                warn!("registry payload unrecoverable, treating as empty");
                return Ok(Vec::new());
            }
            ReadMode::Authoritative => {
                return Err(FetchError::Payload(
                    "registry payload is unrecoverable".to_string(),
                ))
            }
        },
    };

    let value: serde_json::Value = serde_json::from_str(&normalized)
        .map_err(|err| FetchError::Payload(format!("registry payload is not JSON: {err}")))?;
    let array = value
        .as_array()
        .ok_or_else(|| FetchError::Payload("registry payload is not an array".to_string()))?;

    Ok(array.iter().filter_map(record_from_value).collect())
}

fn record_from_value(value: &serde_json::Value) -> Option<UserRecord> {
    let object = value.as_object()?;
    let username = object
        .get("username")
        .and_then(serde_json::Value::as_str)?
        .to_string();
    let role = object
        .get("role")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some(UserRecord { username, role })
}

#[derive(Clone)]
struct Snapshot {
    users: Arc<Vec<UserRecord>>,
    fetched_at: Instant,
}

impl Snapshot {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Short-TTL cache in front of a `RegistrySource`.
///
/// The snapshot is replaced wholesale on refresh; in-flight readers keep the
/// `Arc` they already hold.
pub struct RegistryCache {
    source: Arc<dyn RegistrySource>,
    ttl: Duration,
    snapshot: RwLock<Option<Snapshot>>,
    stats: RwLock<RegistryStats>,
}

impl RegistryCache {
    #[must_use]
    pub fn new(source: Arc<dyn RegistrySource>) -> Self {
        Self::with_ttl(source, SNAPSHOT_TTL)
    }

    #[must_use]
    pub fn with_ttl(source: Arc<dyn RegistrySource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            snapshot: RwLock::new(None),
            stats: RwLock::new(RegistryStats::default()),
        }
    }

    /// Return the current user list per `mode`.
    ///
    /// # Errors
    /// Returns `GateError::UpstreamUnavailable` once every read path failed.
    pub async fn get_users(&self, mode: ReadMode) -> Result<Arc<Vec<UserRecord>>, GateError> {
        if mode == ReadMode::Cached {
            let guard = self.snapshot.read().await;
            if let Some(snapshot) = guard.as_ref() {
                if snapshot.is_fresh(self.ttl) {
                    debug!(users = snapshot.users.len(), "registry snapshot hit");
                    return Ok(snapshot.users.clone());
                }
            }
        }

        let users = self
            .source
            .fetch_users(mode)
            .await
            .map_err(|err| GateError::UpstreamUnavailable(err.to_string()))?;
        let users = Arc::new(users);

        let stats = compute_stats(&users, now_ms());
        {
            let mut guard = self.snapshot.write().await;
            *guard = Some(Snapshot {
                users: users.clone(),
                fetched_at: Instant::now(),
            });
        }
        {
            let mut guard = self.stats.write().await;
            *guard = stats;
        }
        info!(
            total = stats.total_users,
            premium = stats.premium_users,
            "registry snapshot refreshed"
        );

        Ok(users)
    }

    /// Aggregate statistics for the read-only endpoint. Never fails: when
    /// every read path is down the last-known numbers are served.
    pub async fn stats(&self) -> RegistryStats {
        match self.get_users(ReadMode::Cached).await {
            Ok(_) => *self.stats.read().await,
            Err(err) => {
                warn!(error = %err, "registry stats fetch failed, serving last-known");
                *self.stats.read().await
            }
        }
    }

    /// Optimistically bump the aggregates after a successful creation, before
    /// the fresh authoritative read lands.
    pub async fn bump_optimistic(&self) {
        let mut guard = self.stats.write().await;
        guard.total_users = guard.total_users.saturating_add(1);
        guard.premium_users = guard.premium_users.saturating_add(1);
        guard.last_updated_ms = now_ms();
    }

    /// Force a fresh read of the aggregates; the optimistic numbers stand if
    /// the read fails.
    pub async fn refresh_stats(&self) -> RegistryStats {
        match self.get_users(ReadMode::Authoritative).await {
            Ok(_) => *self.stats.read().await,
            Err(err) => {
                warn!(error = %err, "stats refresh failed, keeping optimistic numbers");
                *self.stats.read().await
            }
        }
    }
}

fn compute_stats(users: &[UserRecord], now_ms: u64) -> RegistryStats {
    RegistryStats {
        total_users: users.len() as u64,
        premium_users: users
            .iter()
            .filter(|user| user.role.eq_ignore_ascii_case("premium"))
            .count() as u64,
        last_updated_ms: now_ms,
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

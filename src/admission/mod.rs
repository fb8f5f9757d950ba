//! In-memory admission control: sliding-window rate limiting, escalating bans,
//! post-success cooldowns and failure accounting.
//!
//! Flow Overview:
//! 1) Ban check: a live ban rejects the request outright.
//! 2) Rate limiting: append-and-prune the per-client window; overflow promotes
//!    the client to a timed ban.
//! 3) Cooldown check: runs after rate limiting so cooldown polling still
//!    spends rate budget.
//! 4) Failure accounting: invalid input and downstream failures increment a
//!    counter; crossing the threshold promotes to a ban. Any success resets it.
//!
//! Every check for one client runs under a single lock acquisition, so
//! concurrent requests from the same identity observe a serialized view of
//! that identity's state. All state is process-lifetime only; a periodic sweep
//! prunes entries that have nothing live left.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::GateError;

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
const DEFAULT_WINDOW_MAX: usize = 20;
const DEFAULT_BAN_DURATION: Duration = Duration::from_secs(60 * 60);
const DEFAULT_FAILURE_THRESHOLD: u32 = 30;
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Tunables for the admission state machine.
#[derive(Clone, Copy, Debug)]
pub struct AdmissionPolicy {
    window: Duration,
    window_max: usize,
    ban_duration: Duration,
    failure_threshold: u32,
    cooldown: Duration,
}

impl AdmissionPolicy {
    /// Default policy: 20 requests per rolling minute, one hour bans,
    /// 30-failure ban threshold, five minute cooldown after success.
    #[must_use]
    pub fn new() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            window_max: DEFAULT_WINDOW_MAX,
            ban_duration: DEFAULT_BAN_DURATION,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
        }
    }

    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    #[must_use]
    pub fn with_window_max(mut self, window_max: usize) -> Self {
        self.window_max = window_max.max(1);
        self
    }

    #[must_use]
    pub fn with_ban_duration(mut self, ban_duration: Duration) -> Self {
        self.ban_duration = ban_duration;
        self
    }

    #[must_use]
    pub fn with_failure_threshold(mut self, failure_threshold: u32) -> Self {
        self.failure_threshold = failure_threshold.max(1);
        self
    }

    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    #[must_use]
    pub fn window_max(&self) -> usize {
        self.window_max
    }

    #[must_use]
    pub fn ban_duration(&self) -> Duration {
        self.ban_duration
    }

    #[must_use]
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-client admission state. An expiry at or before "now" is semantically
/// absent; nothing is actively deleted outside the sweep.
#[derive(Debug, Default)]
struct ClientState {
    window: VecDeque<u64>,
    ban_until_ms: u64,
    cooldown_until_ms: u64,
    failures: u32,
}

impl ClientState {
    fn prune_window(&mut self, now_ms: u64, window_ms: u64) {
        let cutoff = now_ms.saturating_sub(window_ms);
        while let Some(&front) = self.window.front() {
            if front <= cutoff {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn is_expired(&self, now_ms: u64, window_ms: u64) -> bool {
        self.ban_until_ms <= now_ms
            && self.cooldown_until_ms <= now_ms
            && self.failures == 0
            && self
                .window
                .back()
                .map_or(true, |&last| last <= now_ms.saturating_sub(window_ms))
    }
}

/// Owns the per-client admission maps. Injected into the controller so tests
/// can exercise it in isolation and a distributed backend can replace it later.
#[derive(Debug, Default)]
pub struct AdmissionStore {
    clients: Mutex<HashMap<String, ClientState>>,
}

impl AdmissionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked client identities (sweep diagnostics and tests).
    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }
}

/// Evaluates the admission state machine for every mutating request.
#[derive(Clone, Debug)]
pub struct AdmissionController {
    policy: AdmissionPolicy,
    store: Arc<AdmissionStore>,
}

impl AdmissionController {
    #[must_use]
    pub fn new(policy: AdmissionPolicy, store: Arc<AdmissionStore>) -> Self {
        Self { policy, store }
    }

    #[must_use]
    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    /// Run the ban / rate-limit / cooldown checks for one request.
    ///
    /// # Errors
    /// Returns the admission-layer `GateError` that terminates the request.
    pub async fn admit(&self, identity: &str) -> Result<(), GateError> {
        self.admit_at(identity, now_ms()).await
    }

    async fn admit_at(&self, identity: &str, now_ms: u64) -> Result<(), GateError> {
        let window_ms = duration_ms(self.policy.window);
        let mut clients = self.store.clients.lock().await;
        let state = clients.entry(identity.to_string()).or_default();

        if state.ban_until_ms > now_ms {
            debug!(identity, until_ms = state.ban_until_ms, "client is banned");
            return Err(GateError::Banned {
                until_ms: state.ban_until_ms,
            });
        }

        state.window.push_back(now_ms);
        state.prune_window(now_ms, window_ms);

        if state.window.len() > self.policy.window_max {
            let until_ms = now_ms + duration_ms(self.policy.ban_duration);
            state.ban_until_ms = until_ms;
            info!(identity, until_ms, "rate limit exceeded, client banned");
            return Err(GateError::RateLimited { until_ms });
        }

        if state.cooldown_until_ms > now_ms {
            debug!(
                identity,
                until_ms = state.cooldown_until_ms,
                "cooldown active"
            );
            return Err(GateError::CooldownActive {
                until_ms: state.cooldown_until_ms,
                remaining_ms: state.cooldown_until_ms - now_ms,
            });
        }

        Ok(())
    }

    /// Account for structurally invalid input and return the terminal error:
    /// `Banned` once the failure threshold is reached, `InvalidInput` before.
    pub async fn record_invalid_input(&self, identity: &str, reason: &str) -> GateError {
        self.record_invalid_input_at(identity, reason, now_ms())
            .await
    }

    async fn record_invalid_input_at(
        &self,
        identity: &str,
        reason: &str,
        now_ms: u64,
    ) -> GateError {
        let mut clients = self.store.clients.lock().await;
        let state = clients.entry(identity.to_string()).or_default();
        state.failures = state.failures.saturating_add(1);

        if state.failures >= self.policy.failure_threshold {
            let until_ms = now_ms + duration_ms(self.policy.ban_duration);
            state.ban_until_ms = until_ms;
            warn!(
                identity,
                failures = state.failures,
                until_ms,
                "failure threshold reached, client banned"
            );
            return GateError::Banned { until_ms };
        }

        debug!(identity, failures = state.failures, reason, "invalid input");
        GateError::InvalidInput(reason.to_string())
    }

    /// Record a downstream (forwarding) failure: bump the failure counter, no
    /// cooldown, so the client may retry bounded only by rate limiting.
    pub async fn record_failure(&self, identity: &str) {
        self.record_failure_at(identity, now_ms()).await;
    }

    async fn record_failure_at(&self, identity: &str, now_ms: u64) {
        let mut clients = self.store.clients.lock().await;
        let state = clients.entry(identity.to_string()).or_default();
        state.failures = state.failures.saturating_add(1);

        if state.failures >= self.policy.failure_threshold {
            let until_ms = now_ms + duration_ms(self.policy.ban_duration);
            state.ban_until_ms = until_ms;
            warn!(
                identity,
                failures = state.failures,
                until_ms,
                "failure threshold reached, client banned"
            );
        }
    }

    /// Record a fully successful creation: start the cooldown and reset the
    /// failure counter. Returns the cooldown expiry in epoch millis.
    pub async fn record_success(&self, identity: &str) -> u64 {
        self.record_success_at(identity, now_ms()).await
    }

    async fn record_success_at(&self, identity: &str, now_ms: u64) -> u64 {
        let until_ms = now_ms + duration_ms(self.policy.cooldown);
        let mut clients = self.store.clients.lock().await;
        let state = clients.entry(identity.to_string()).or_default();
        state.cooldown_until_ms = until_ms;
        state.failures = 0;
        debug!(identity, until_ms, "cooldown started, failures reset");
        until_ms
    }

    /// Drop clients whose bans and cooldowns have lapsed, whose windows are
    /// stale and whose failure counters are zero.
    pub async fn sweep(&self) -> usize {
        self.sweep_at(now_ms()).await
    }

    async fn sweep_at(&self, now_ms: u64) -> usize {
        let window_ms = duration_ms(self.policy.window);
        let mut clients = self.store.clients.lock().await;
        let before = clients.len();
        clients.retain(|_, state| !state.is_expired(now_ms, window_ms));
        let removed = before - clients.len();
        if removed > 0 {
            debug!(removed, remaining = clients.len(), "admission state swept");
        }
        removed
    }
}

/// Spawn a background task that periodically sweeps expired admission state.
pub fn spawn_sweep_worker(
    controller: AdmissionController,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(interval).await;
            controller.sweep().await;
        }
    })
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

//! Two-phase duplicate reconciliation.
//!
//! The snapshot cache is allowed to be stale in either direction, so a cached
//! hit is never trusted on its own: it triggers an authoritative re-read. When
//! that re-read cannot be completed the request is rejected — the cheap read
//! already signalled a conflict the system cannot disprove.

use tracing::{debug, warn};

use crate::error::GateError;
use crate::registry::{ReadMode, RegistryCache, UserRecord};

/// Canonical username form: trimmed with all internal whitespace removed.
#[must_use]
pub fn normalize_username(raw: &str) -> String {
    raw.split_whitespace().collect()
}

/// Decide whether a creation request for `username` is safe to forward.
///
/// `username` must already be normalized via [`normalize_username`].
///
/// # Errors
/// - `DuplicateUsername` when the authoritative read confirms the name, or
///   when a cached hit cannot be disproven because the re-read failed.
/// - `UpstreamUnavailable` when the initial read fails entirely.
pub async fn ensure_username_available(
    cache: &RegistryCache,
    username: &str,
) -> Result<(), GateError> {
    let cached = cache.get_users(ReadMode::Cached).await?;

    if !contains_username(&cached, username) {
        // Common case: no conflict in sight, skip the second round trip.
        return Ok(());
    }

    debug!(username, "cached read hit, confirming against authority");
    match cache.get_users(ReadMode::Authoritative).await {
        Ok(fresh) => {
            if contains_username(&fresh, username) {
                Err(GateError::DuplicateUsername)
            } else {
                debug!(username, "cached hit was stale, proceeding");
                Ok(())
            }
        }
        Err(err) => {
            // Fail closed: rejecting is recoverable, a double-create is not.
            warn!(
                username,
                error = %err,
                "authoritative re-read failed, rejecting as duplicate"
            );
            Err(GateError::DuplicateUsername)
        }
    }
}

fn contains_username(users: &[UserRecord], username: &str) -> bool {
    users
        .iter()
        .any(|user| normalize_username(&user.username).eq_ignore_ascii_case(username))
}

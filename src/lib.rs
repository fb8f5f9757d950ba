//! # Gerbang (Account Provisioning Gateway)
//!
//! `gerbang` sits between untrusted clients and a downstream account-creation
//! service. Every mutating request has to clear three gates before anything is
//! forwarded:
//!
//! 1. **Admission**: per-client sliding-window rate limiting, escalating bans
//!    and post-success cooldowns, all in-memory and checked before any network
//!    call so abusive traffic is shed as early as possible.
//! 2. **Reconciliation**: the requested username is checked against an
//!    eventually-consistent remote registry through a short-TTL cache, with an
//!    authoritative cache-bypassing re-read whenever the cheap read signals a
//!    conflict. When authority cannot be established the request is rejected
//!    rather than risking a duplicate creation.
//! 3. **Forwarding**: the creation request is relayed with generated
//!    credentials through a resilient fetch layer (per-attempt timeouts,
//!    bounded retries, exponential backoff).
//!
//! A best-effort notification sink reports admissions decisions and creation
//! outcomes; its failures never affect the response.
//!
//! Admission state lives for the process lifetime only. A periodic sweep task
//! prunes expired bans, cooldowns and stale rate windows so the per-client
//! maps do not grow without bound.

pub mod account;
pub mod admission;
pub mod api;
pub mod cli;
pub mod error;
pub mod fetch;
pub mod notify;
pub mod registry;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

//! Credential provider port (driven/secondary port)
//!
//! The monitoring core never acquires credentials itself; it asks this port
//! for the current bearer credential, lets it refresh when close to expiry,
//! and hands refreshed credentials back for persistence.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// OAuth-style bearer credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Bearer token for authenticating remote-store requests
    pub access_token: String,
    /// Token for refreshing the access token without user interaction
    pub refresh_token: Option<String>,
    /// When the access token expires
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Returns true if the access token has expired
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Returns true if the access token will expire within the given duration
    pub fn expires_within(&self, duration: Duration) -> bool {
        Utc::now() + duration >= self.expires_at
    }
}

/// The store refused the bearer token of a request
///
/// Adapters wrap this into the `anyhow::Error` of any call answered with an
/// authorization failure. The core drops its cached credential when it sees
/// one, so a token revoked before its expiry is reloaded on the next call.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Credential rejected by the document store")]
pub struct CredentialRejected;

/// Port trait for credential supply
///
/// ## Implementation Notes
///
/// - `get_credential` returns `Ok(None)` when no credential has ever been
///   stored; callers treat that as an authorization failure.
/// - `refresh_if_needed` returns the input unchanged when no refresh is due.
#[async_trait::async_trait]
pub trait ICredentialProvider: Send + Sync {
    /// Returns the currently stored credential, if any
    async fn get_credential(&self) -> anyhow::Result<Option<Credential>>;

    /// Refreshes the credential when it is expired or about to expire
    async fn refresh_if_needed(&self, credential: &Credential) -> anyhow::Result<Credential>;

    /// Persists a (refreshed) credential
    async fn persist(&self, credential: &Credential) -> anyhow::Result<()>;
}

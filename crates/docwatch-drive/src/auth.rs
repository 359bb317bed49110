//! OAuth2 credential handling for the Google APIs
//!
//! The daemon never runs an interactive login: an operator stores an initial
//! credential (access + refresh token) in the system keyring, and this module
//! keeps it fresh through the refresh-token grant.
//!
//! ## Components
//!
//! - [`KeyringTokenStorage`] - Secure credential storage using the system keyring
//! - [`RefreshFlow`] - OAuth2 refresh-token exchange against Google's token endpoint
//! - [`KeyringCredentialProvider`] - [`ICredentialProvider`] implementation

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use oauth2::{
    basic::BasicClient, ClientId, ClientSecret, EndpointNotSet, EndpointSet, RefreshToken,
    TokenResponse, TokenUrl,
};
use tracing::{debug, info, warn};

use docwatch_core::ports::credentials::{Credential, ICredentialProvider};

/// Google OAuth2 token endpoint
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Keyring service name for storing credentials
const KEYRING_SERVICE: &str = "docwatch";

/// Credentials expiring within this many seconds are refreshed
const REFRESH_MARGIN_SECS: i64 = 60;

// ============================================================================
// KeyringTokenStorage
// ============================================================================

/// Stores and retrieves credentials from the system keyring
///
/// Credentials are serialized as JSON under the service name "docwatch" with
/// the configured account as the username.
pub struct KeyringTokenStorage;

impl KeyringTokenStorage {
    /// Stores a credential for `account`
    pub fn store(account: &str, credential: &Credential) -> Result<()> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, account)
            .context("Failed to create keyring entry")?;

        let json = serde_json::to_string(credential).context("Failed to serialize credential")?;

        entry
            .set_password(&json)
            .context("Failed to store credential in keyring")?;

        debug!(account, "Stored credential in keyring");
        Ok(())
    }

    /// Loads the credential for `account`, if one was stored
    pub fn load(account: &str) -> Result<Option<Credential>> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, account)
            .context("Failed to create keyring entry")?;

        match entry.get_password() {
            Ok(json) => {
                let credential: Credential = serde_json::from_str(&json)
                    .context("Failed to deserialize credential from keyring")?;
                debug!(account, "Loaded credential from keyring");
                Ok(Some(credential))
            }
            Err(keyring::Error::NoEntry) => {
                debug!(account, "No credential found in keyring");
                Ok(None)
            }
            Err(e) => Err(anyhow::Error::new(e).context("Failed to read from keyring")),
        }
    }

    /// Removes the credential for `account`
    pub fn clear(account: &str) -> Result<()> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, account)
            .context("Failed to create keyring entry")?;

        match entry.delete_credential() {
            Ok(()) => {
                info!(account, "Cleared credential from keyring");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(anyhow::Error::new(e).context("Failed to delete from keyring")),
        }
    }
}

// ============================================================================
// RefreshFlow
// ============================================================================

/// OAuth2 refresh-token grant using the `oauth2` crate
pub struct RefreshFlow {
    client: BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>,
    http_client: reqwest::Client,
}

impl RefreshFlow {
    /// Creates a flow against Google's token endpoint
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Result<Self> {
        Self::with_token_url(client_id, client_secret, TOKEN_URL)
    }

    /// Creates a flow against a custom token endpoint (useful for testing)
    pub fn with_token_url(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Result<Self> {
        let client = BasicClient::new(ClientId::new(client_id.into()))
            .set_client_secret(ClientSecret::new(client_secret.into()))
            .set_token_uri(TokenUrl::new(token_url.into()).context("Invalid token URL")?);

        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to build OAuth2 HTTP client")?;

        Ok(Self {
            client,
            http_client,
        })
    }

    /// Exchanges a refresh token for a new credential
    ///
    /// Google usually omits the refresh token from the response; the input
    /// refresh token is carried over in that case.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Credential> {
        info!("Refreshing access token");

        let token_result = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http_client)
            .await
            .context("Failed to refresh token")?;

        let expires_at = token_result
            .expires_in()
            .map(|d| Utc::now() + Duration::seconds(d.as_secs() as i64))
            .unwrap_or_else(|| Utc::now() + Duration::hours(1));

        Ok(Credential {
            access_token: token_result.access_token().secret().to_string(),
            refresh_token: token_result
                .refresh_token()
                .map(|t| t.secret().to_string())
                .or_else(|| Some(refresh_token.to_string())),
            expires_at,
        })
    }
}

// ============================================================================
// KeyringCredentialProvider
// ============================================================================

/// [`ICredentialProvider`] backed by the system keyring
///
/// Without a [`RefreshFlow`] the stored access token is used as-is until it
/// expires, after which every call fails.
pub struct KeyringCredentialProvider {
    account: String,
    flow: Option<RefreshFlow>,
}

impl KeyringCredentialProvider {
    /// Creates a provider for `account`
    pub fn new(account: impl Into<String>, flow: Option<RefreshFlow>) -> Self {
        Self {
            account: account.into(),
            flow,
        }
    }

    /// Keyring username this provider reads and writes
    pub fn account(&self) -> &str {
        &self.account
    }
}

#[async_trait::async_trait]
impl ICredentialProvider for KeyringCredentialProvider {
    async fn get_credential(&self) -> Result<Option<Credential>> {
        let account = self.account.clone();
        tokio::task::spawn_blocking(move || KeyringTokenStorage::load(&account))
            .await
            .context("Keyring task failed")?
    }

    async fn refresh_if_needed(&self, credential: &Credential) -> Result<Credential> {
        if !credential.expires_within(Duration::seconds(REFRESH_MARGIN_SECS)) {
            return Ok(credential.clone());
        }

        let Some(flow) = &self.flow else {
            if credential.is_expired() {
                anyhow::bail!("Access token expired and no OAuth client is configured");
            }
            warn!(account = %self.account, "Access token about to expire; refresh disabled");
            return Ok(credential.clone());
        };

        let refresh_token = credential
            .refresh_token
            .as_deref()
            .context("Access token expired and no refresh token is stored")?;

        flow.refresh(refresh_token).await
    }

    async fn persist(&self, credential: &Credential) -> Result<()> {
        let account = self.account.clone();
        let credential = credential.clone();
        tokio::task::spawn_blocking(move || KeyringTokenStorage::store(&account, &credential))
            .await
            .context("Keyring task failed")?
    }
}

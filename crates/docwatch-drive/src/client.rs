//! Google API HTTP client
//!
//! A thin wrapper over `reqwest::Client` that knows the four Google hosts the
//! adapter talks to, attaches bearer authentication per request, and maps
//! non-success responses onto [`DriveError`].
//!
//! The client holds no credential: every request receives the bearer token
//! explicitly, so a single client is shared across refreshes.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use docwatch_drive::client::{Api, DriveClient};
//! use reqwest::Method;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = DriveClient::new()?;
//! let response = client
//!     .send(client.request(Method::GET, Api::Drive, "/drive/v3/about", "token"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use crate::DriveError;

/// Drive v3 host
const DRIVE_BASE_URL: &str = "https://www.googleapis.com";

/// Docs v1 host
const DOCS_BASE_URL: &str = "https://docs.googleapis.com";

/// Sheets v4 host
const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com";

/// Host serving per-sheet CSV exports
const EXPORT_BASE_URL: &str = "https://docs.google.com";

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default retry-after duration when the header is missing
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Longest error body kept in an error message
const MAX_ERROR_BODY: usize = 512;

/// Which Google API a request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Api {
    /// Drive v3 (files, changes, channels)
    Drive,
    /// Docs v1
    Docs,
    /// Sheets v4
    Sheets,
    /// docs.google.com export endpoints
    Export,
}

// ============================================================================
// DriveClient
// ============================================================================

/// HTTP client for the Google Drive family of APIs
#[derive(Debug, Clone)]
pub struct DriveClient {
    /// The underlying HTTP client
    client: Client,
    drive_base: String,
    docs_base: String,
    sheets_base: String,
    export_base: String,
}

impl DriveClient {
    /// Creates a client against the production Google hosts
    pub fn new() -> anyhow::Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Creates a client against the production hosts with a custom timeout
    pub fn with_timeout(timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_http_client(timeout)?,
            drive_base: DRIVE_BASE_URL.to_string(),
            docs_base: DOCS_BASE_URL.to_string(),
            sheets_base: SHEETS_BASE_URL.to_string(),
            export_base: EXPORT_BASE_URL.to_string(),
        })
    }

    /// Creates a client that routes every API to one base URL
    ///
    /// Paths of the four APIs do not overlap, so a single mock server or
    /// proxy can serve all of them.
    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let base = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client: build_http_client(timeout)?,
            drive_base: base.clone(),
            docs_base: base.clone(),
            sheets_base: base.clone(),
            export_base: base,
        })
    }

    /// Returns the base URL used for `api`
    pub fn base_url(&self, api: Api) -> &str {
        match api {
            Api::Drive => &self.drive_base,
            Api::Docs => &self.docs_base,
            Api::Sheets => &self.sheets_base,
            Api::Export => &self.export_base,
        }
    }

    /// Creates an authenticated request builder
    ///
    /// # Arguments
    /// * `method` - HTTP method
    /// * `api` - Target API, selects the host
    /// * `path` - Path relative to the host (e.g. "/drive/v3/files/abc")
    /// * `bearer` - OAuth2 access token
    pub fn request(&self, method: Method, api: Api, path: &str, bearer: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url(api), path);
        self.client.request(method, &url).bearer_auth(bearer)
    }

    /// Sends a request and maps error statuses to [`DriveError`]
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, DriveError> {
        let response = request.send().await?;
        check_status(response).await
    }
}

fn build_http_client(timeout: Duration) -> anyhow::Result<Client> {
    use anyhow::Context;

    Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

// ============================================================================
// Status mapping
// ============================================================================

/// Passes successful responses through and converts the rest to [`DriveError`]
pub async fn check_status(response: Response) -> Result<Response, DriveError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .map(|v| parse_retry_after(v, DEFAULT_RETRY_AFTER))
        .unwrap_or(DEFAULT_RETRY_AFTER);

    let url = response.url().path().to_string();
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    let message = format!("{url}: {body}");

    debug!(status = status.as_u16(), path = %url, "Google API returned error status");

    Err(status_to_error(status, message, retry_after))
}

/// Maps an HTTP status onto the error taxonomy
pub fn status_to_error(status: StatusCode, message: String, retry_after: Duration) -> DriveError {
    match status {
        StatusCode::UNAUTHORIZED => DriveError::Unauthorized(message),
        StatusCode::FORBIDDEN => DriveError::Forbidden(message),
        StatusCode::NOT_FOUND => DriveError::NotFound(message),
        StatusCode::GONE => DriveError::Gone(message),
        StatusCode::TOO_MANY_REQUESTS => DriveError::TooManyRequests { retry_after },
        s if s.is_server_error() => DriveError::ServerError(message),
        _ => DriveError::BadRequest(format!("{status}: {message}")),
    }
}

/// Parses a `Retry-After` header value
///
/// Supports integer seconds and HTTP-dates; HTTP-dates further than one hour
/// away fall back to `default`.
pub fn parse_retry_after(value: &str, default: Duration) -> Duration {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Duration::from_secs(seconds);
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value.trim()) {
        let diff = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
        if let Some(secs) = diff
            .num_seconds()
            .try_into()
            .ok()
            .filter(|&s: &u64| s <= 3600)
        {
            return Duration::from_secs(secs);
        }
    }

    warn!(value, "Could not parse Retry-After header, using default");
    default
}

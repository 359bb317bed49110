//! Credential-gated, time-bounded access to the document store
//!
//! Every remote operation goes through [`RemoteStore::call`], which:
//!
//! 1. obtains a credential, asks the provider to refresh it if needed, and
//!    persists it when the refresh changed it ([`RemoteStore::bearer`]);
//! 2. bounds the call; a timed-out call fails with [`MonitorError::Timeout`]
//!    and is never retried in-process;
//! 3. drops the cached credential when the store answers with
//!    [`CredentialRejected`], so the next call reloads it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use docwatch_core::ports::{Credential, CredentialRejected, ICredentialProvider, IDocumentStore};

use crate::MonitorError;

/// Shared handle to the store, the credential provider and the call bound
pub struct RemoteStore {
    store: Arc<dyn IDocumentStore>,
    credentials: Arc<dyn ICredentialProvider>,
    /// Last credential seen; refreshes are serialized through this lock
    cached: Mutex<Option<Credential>>,
    timeout: Duration,
}

impl RemoteStore {
    /// Creates a handle bounding every remote call by `timeout`
    pub fn new(
        store: Arc<dyn IDocumentStore>,
        credentials: Arc<dyn ICredentialProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            credentials,
            cached: Mutex::new(None),
            timeout,
        }
    }

    /// Runs one store operation with a fresh bearer token under the bound
    ///
    /// `request` receives the store and the bearer token.
    ///
    /// # Errors
    /// [`MonitorError::Auth`] (inside `anyhow::Error`) when no credential is
    /// usable, [`MonitorError::Timeout`] when the bound is exceeded, or the
    /// store's own error.
    pub async fn call<'a, T, F, Fut>(&'a self, operation: &'static str, request: F) -> anyhow::Result<T>
    where
        F: FnOnce(&'a dyn IDocumentStore, String) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let bearer = self.bearer().await?;
        let result = self
            .timed(operation, request(self.store.as_ref(), bearer))
            .await;

        if let Err(e) = &result {
            if e.downcast_ref::<CredentialRejected>().is_some() {
                warn!(operation, "Store rejected the credential; reloading it on the next call");
                self.invalidate_credential().await;
            }
        }
        result
    }

    /// Returns a valid bearer token
    ///
    /// # Errors
    /// [`MonitorError::Auth`] when no credential is stored or it cannot be
    /// refreshed. A failure to persist a refreshed credential is logged only.
    pub async fn bearer(&self) -> Result<String, MonitorError> {
        let mut cached = self.cached.lock().await;

        let current = match cached.as_ref() {
            Some(credential) => credential.clone(),
            None => self
                .timed("get_credential", self.credentials.get_credential())
                .await
                .map_err(|e| MonitorError::Auth(format!("{e:#}")))?
                .ok_or_else(|| MonitorError::Auth("no credential stored".to_string()))?,
        };

        let refreshed = self
            .timed("refresh_if_needed", self.credentials.refresh_if_needed(&current))
            .await
            .map_err(|e| MonitorError::Auth(format!("{e:#}")))?;

        if refreshed != current {
            debug!("Credential refreshed");
            if let Err(e) = self
                .timed("persist", self.credentials.persist(&refreshed))
                .await
            {
                warn!(error = %format!("{e:#}"), "Failed to persist refreshed credential");
            }
        }

        let token = refreshed.access_token.clone();
        *cached = Some(refreshed);
        Ok(token)
    }

    /// Drops the cached credential so the next call reloads it
    pub async fn invalidate_credential(&self) {
        *self.cached.lock().await = None;
    }

    async fn timed<T, F>(&self, operation: &'static str, call: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Remote call timed out"
                );
                Err(MonitorError::Timeout {
                    operation,
                    after: self.timeout,
                }
                .into())
            }
        }
    }
}

//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for remote identifiers and
//! opaque tokens. Each newtype ensures data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// Returns true if `id` only contains characters the remote store uses in IDs
fn is_remote_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

// ============================================================================
// DocumentId
// ============================================================================

/// Opaque identifier of a document in the remote store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

impl DocumentId {
    /// Create a new DocumentId
    ///
    /// # Errors
    /// Returns error if the ID is empty or contains characters outside
    /// `[A-Za-z0-9_-]`
    pub fn new(id: String) -> Result<Self, DomainError> {
        if id.is_empty() {
            return Err(DomainError::InvalidDocumentId(
                "Document ID cannot be empty".to_string(),
            ));
        }

        if !id.chars().all(is_remote_id_char) {
            return Err(DomainError::InvalidDocumentId(format!(
                "Document ID contains invalid characters: {id}"
            )));
        }

        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DocumentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for DocumentId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}

// ============================================================================
// FolderId
// ============================================================================

/// Opaque identifier of a folder in the remote store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FolderId(String);

impl FolderId {
    /// Create a new FolderId
    ///
    /// # Errors
    /// Returns error if the ID is empty or contains invalid characters
    pub fn new(id: String) -> Result<Self, DomainError> {
        if id.is_empty() {
            return Err(DomainError::InvalidFolderId(
                "Folder ID cannot be empty".to_string(),
            ));
        }

        if !id.chars().all(is_remote_id_char) {
            return Err(DomainError::InvalidFolderId(format!(
                "Folder ID contains invalid characters: {id}"
            )));
        }

        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FolderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FolderId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for FolderId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<FolderId> for String {
    fn from(id: FolderId) -> Self {
        id.0
    }
}

// ============================================================================
// ModifiedMarker
// ============================================================================

/// Opaque version marker reported by the remote store for a document
///
/// Usually an ISO-8601 timestamp string, but it is never parsed: two markers
/// are the same version if and only if they are byte-for-byte equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModifiedMarker(String);

impl ModifiedMarker {
    /// Wrap a raw marker value
    pub fn new(marker: impl Into<String>) -> Self {
        Self(marker.into())
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ModifiedMarker {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ModifiedMarker {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// ChangeCursor
// ============================================================================

/// Opaque continuation token for incremental change listing
///
/// Represents "all changes processed up to this point" for the monitored
/// folder. Only ever replaced by a value returned from the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChangeCursor(String);

impl ChangeCursor {
    /// Create a new ChangeCursor
    ///
    /// # Errors
    /// Returns error if the token is empty
    pub fn new(token: String) -> Result<Self, DomainError> {
        if token.is_empty() {
            return Err(DomainError::InvalidCursor(
                "Change cursor cannot be empty".to_string(),
            ));
        }

        Ok(Self(token))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ChangeCursor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChangeCursor {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for ChangeCursor {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ChangeCursor> for String {
    fn from(cursor: ChangeCursor) -> Self {
        cursor.0
    }
}

// ============================================================================
// ChannelId
// ============================================================================

/// Identifier of a push-notification channel
///
/// Channel IDs are chosen by this process when a watch is requested and
/// echoed back by the remote store on every notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelId(String);

impl ChannelId {
    /// Create a ChannelId from an existing value
    ///
    /// # Errors
    /// Returns error if the value is empty
    pub fn new(id: String) -> Result<Self, DomainError> {
        if id.is_empty() {
            return Err(DomainError::InvalidChannelId(
                "Channel ID cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Derive a channel ID from the watched target and the creation instant
    ///
    /// Two registrations of the same target at different milliseconds yield
    /// distinct IDs, so a renewed channel never collides with its predecessor.
    #[must_use]
    pub fn derive(target: &str, created_at: DateTime<Utc>) -> Self {
        Self(format!("{}-{}", target, created_at.timestamp_millis()))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ChannelId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ChannelId> for String {
    fn from(id: ChannelId) -> Self {
        id.0
    }
}

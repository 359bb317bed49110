//! Domain entities and value types
//!
//! This module contains the core domain types for Docwatch:
//! - Newtypes for validated identifiers and opaque remote tokens
//! - Document records and MIME-based content classification
//! - Watch channel descriptors
//! - Domain-specific error types

pub mod channel;
pub mod document;
pub mod errors;
pub mod newtypes;

// Re-export commonly used types
pub use channel::{WatchChannel, WatchTarget};
pub use document::{ContentKind, DocumentRecord};
pub use errors::DomainError;
pub use newtypes::*;

//! Docwatch Core - Domain types and port definitions
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain types** - `DocumentId`, `FolderId`, `ModifiedMarker`, `ChangeCursor`,
//!   `DocumentRecord`, `WatchChannel`, `ContentKind`
//! - **Port definitions** - Traits for adapters: `IDocumentStore`,
//!   `ICredentialProvider`, `INotificationSink`
//! - **Configuration** - YAML-backed daemon settings
//!
//! # Architecture
//!
//! The domain module contains pure value types with no I/O.
//! Ports define trait interfaces that adapter crates implement; the
//! monitoring engine in `docwatch-monitor` depends only on these traits.

pub mod config;
pub mod domain;
pub mod ports;

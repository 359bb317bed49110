//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! monitoring core. Implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IDocumentStore`] - Remote document store (metadata, watch channels,
//!   change listing, content retrieval)
//! - [`ICredentialProvider`] - Bearer credential supply and refresh
//! - [`INotificationSink`] - Delivery of document events to subscribers

pub mod credentials;
pub mod document_store;
pub mod notification;

pub use credentials::{Credential, CredentialRejected, ICredentialProvider};
pub use document_store::{
    ChangeEntry, ChangePage, ChannelInfo, ChannelRequest, CursorInvalidated, DocumentMetadata,
    FolderPage, IDocumentStore, Paragraph, ParagraphElement, StructuralElement,
    StructuredDocument, TextRun,
};
pub use notification::{DocumentEvent, INotificationSink, SubscriberScope};

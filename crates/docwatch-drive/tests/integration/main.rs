//! Integration tests for docwatch-drive
//!
//! Uses wiremock to simulate the Drive, Docs, Sheets and OAuth2 endpoints
//! and verifies end-to-end behavior of the adapter through the
//! `IDocumentStore` port.


mod test_auth;
mod test_changes;
mod test_files;

//! Modification ledger
//!
//! In-memory map from document identity to the last observed modification
//! marker. It is the single source of truth for "did this document really
//! change?" when a push notification only says "something happened".
//!
//! ## Design Notes
//!
//! - Markers are compared by exact equality; they are never parsed or ordered.
//! - [`ModificationLedger::observe`] is a linearizable compare-and-update per
//!   key (it runs inside the `DashMap` entry lock), so two concurrent
//!   observations of the same transition report `Changed` at most once.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use docwatch_core::domain::{DocumentId, DocumentRecord, ModifiedMarker};

/// Result of comparing a marker against the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The marker differs from the stored one, or nothing was stored
    Changed,
    /// The marker equals the stored one
    Unchanged,
}

/// Last observed state of every known document
#[derive(Debug, Default)]
pub struct ModificationLedger {
    records: DashMap<DocumentId, DocumentRecord>,
}

impl ModificationLedger {
    /// Creates an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Compares `modified` with the stored marker and records it when it differs
    ///
    /// An absent record reports [`Observation::Changed`], forcing a first fetch.
    pub fn observe(&self, id: &DocumentId, name: &str, modified: &ModifiedMarker) -> Observation {
        match self.records.entry(id.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().modified == *modified {
                    Observation::Unchanged
                } else {
                    entry.insert(DocumentRecord::new(id.clone(), name, modified.clone()));
                    Observation::Changed
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(DocumentRecord::new(id.clone(), name, modified.clone()));
                Observation::Changed
            }
        }
    }

    /// Stores `modified` unconditionally (baseline seeding)
    pub fn record(&self, id: &DocumentId, name: &str, modified: &ModifiedMarker) {
        self.records.insert(
            id.clone(),
            DocumentRecord::new(id.clone(), name, modified.clone()),
        );
    }

    /// Stores `modified` only if `id` has no record yet
    ///
    /// Returns true when a baseline was stored. An existing record is left
    /// alone so a change it has not seen yet is still reported by `observe`.
    pub fn seed(&self, id: &DocumentId, name: &str, modified: &ModifiedMarker) -> bool {
        match self.records.entry(id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(DocumentRecord::new(id.clone(), name, modified.clone()));
                true
            }
        }
    }

    /// Removes a document, returning its last record
    pub fn forget(&self, id: &DocumentId) -> Option<DocumentRecord> {
        self.records.remove(id).map(|(_, record)| record)
    }

    /// Returns a copy of the record for `id`
    pub fn get(&self, id: &DocumentId) -> Option<DocumentRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }

    /// Number of tracked documents
    pub fn len(&self) -> usize {
        self.records.len()
    }
}

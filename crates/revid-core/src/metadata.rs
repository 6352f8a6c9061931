// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! MTS metadata shared across the encoder and the HTTP response handler
//! that updates it.
//!
//! The reference implementation keeps this table as a process-wide
//! singleton seeded once at session start and mutated from HTTP responses
//! under a mutex. That pattern doesn't survive the move to an owned,
//! testable pipeline: a global makes constructing two independent sessions
//! in the same process (as the test suite does) impossible. Instead
//! [`MtsMetadata`] is held behind an `Arc<Mutex<_>>` that the session
//! constructs once and hands to every component that needs to read or
//! update it, which gives the same "one shared, mutable table" semantics
//! without the singleton.

use std::sync::{Arc, Mutex};

/// Audio parameters mirrored into the metadata table so the encoder can tag
/// PMT descriptors without re-deriving them from config on every PSI cycle.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct AudioParams {
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub bit_depth: Option<u8>,
}

/// The mutable fields of the MTS metadata table.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct MtsMetadataFields {
    pub copyright: Option<String>,
    pub timestamp: Option<String>,
    pub location: Option<String>,
    pub audio: AudioParams,
}

/// A shared, mutex-guarded handle to the metadata table.
///
/// Cheap to clone: every clone refers to the same underlying table.
#[derive(Debug, Clone, Default)]
pub struct MtsMetadata {
    inner: Arc<Mutex<MtsMetadataFields>>,
}

impl MtsMetadata {
    #[must_use]
    pub fn new(fields: MtsMetadataFields) -> Self {
        Self {
            inner: Arc::new(Mutex::new(fields)),
        }
    }

    /// Returns a clone of the current fields.
    #[must_use]
    pub fn snapshot(&self) -> MtsMetadataFields {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// Applies `f` to the table under its lock, e.g. to merge in an HTTP
    /// response's updated copyright/timestamp/location fields.
    pub fn update<F: FnOnce(&mut MtsMetadataFields)>(&self, f: F) {
        let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_is_visible_through_clones() {
        let metadata = MtsMetadata::default();
        let clone = metadata.clone();
        metadata.update(|fields| fields.copyright = Some("example".to_string()));
        assert_eq!(clone.snapshot().copyright.as_deref(), Some("example"));
    }
}

use std::collections::BTreeMap;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use wuintegrate_model::{Classification, RevisionId, Target, UpdateRecord};

struct Slot {
    position: usize,
    record: UpdateRecord,
}

/// Concurrent staging map filled while the manifest is parsed in parallel.
///
/// When two entries share a revision id, the one earlier in the document
/// is kept no matter which worker inserts first.
#[derive(Default)]
pub struct UpdateStore {
    records: DashMap<RevisionId, Slot>,
}

impl UpdateStore {
    /// Insert `record` found at document `position`. Returns `true` if the
    /// revision id was not present yet.
    pub fn insert_first(&self, position: usize, record: UpdateRecord) -> bool {
        match self.records.entry(record.revision_id()) {
            Entry::Vacant(slot) => {
                slot.insert(Slot { position, record });
                true
            }
            Entry::Occupied(mut slot) => {
                if position < slot.get().position {
                    slot.insert(Slot { position, record });
                }
                false
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn into_catalog(self) -> UpdateCatalog {
        UpdateCatalog {
            records: self
                .records
                .into_iter()
                .map(|(revision_id, slot)| (revision_id, slot.record))
                .collect(),
        }
    }
}

/// The master map of every parsed update, keyed by revision id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateCatalog {
    records: BTreeMap<RevisionId, UpdateRecord>,
}

impl UpdateCatalog {
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn contains(&self, revision_id: RevisionId) -> bool {
        self.records.contains_key(&revision_id)
    }

    #[must_use]
    pub fn get(&self, revision_id: RevisionId) -> Option<&UpdateRecord> {
        self.records.get(&revision_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &UpdateRecord> {
        self.records.values()
    }

    /// Attach a classification to an existing record. Returns `false` when
    /// the revision id is unknown.
    pub fn classify(&mut self, revision_id: RevisionId, classification: Classification) -> bool {
        match self.records.get_mut(&revision_id) {
            Some(record) => {
                record.set_classification(classification);
                true
            }
            None => false,
        }
    }

    /// Drop records without both a KB number and an OS version. Returns how
    /// many were removed.
    pub fn prune_unusable(&mut self) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| record.is_usable());
        before - self.records.len()
    }

    /// Records for `target`. Records whose architecture is unknown are kept.
    #[must_use]
    pub fn candidates(&self, target: Target) -> Vec<UpdateRecord> {
        self.records
            .values()
            .filter(|record| record.os_version() == Some(target.os_version))
            .filter(|record| {
                record
                    .architecture()
                    .is_none_or(|arch| arch == target.architecture)
            })
            .cloned()
            .collect()
    }
}

impl FromIterator<UpdateRecord> for UpdateCatalog {
    fn from_iter<I: IntoIterator<Item = UpdateRecord>>(iter: I) -> Self {
        let mut records = BTreeMap::new();
        for record in iter {
            records.entry(record.revision_id()).or_insert(record);
        }
        Self { records }
    }
}

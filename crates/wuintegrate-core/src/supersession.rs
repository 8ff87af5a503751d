use std::collections::HashSet;

use log::debug;
use wuintegrate_model::{RevisionId, UpdateRecord};

/// Keep only the candidates that no other candidate supersedes.
///
/// Every decision is made against the full input, so a chain `A -> B -> C`
/// leaves `{C}` and running the result through again changes nothing.
/// Superseders outside the candidate set are ignored, members of a cycle
/// all supersede each other and are all removed, and a record naming
/// itself does not count.
#[must_use]
pub fn resolve(candidates: &[UpdateRecord]) -> Vec<UpdateRecord> {
    let present: HashSet<RevisionId> = candidates.iter().map(UpdateRecord::revision_id).collect();

    let superseded: HashSet<RevisionId> = candidates
        .iter()
        .filter(|record| {
            record
                .superseding_revisions()
                .any(|id| id != record.revision_id() && present.contains(&id))
        })
        .map(UpdateRecord::revision_id)
        .collect();

    debug!(
        "{} of {} candidates are superseded",
        superseded.len(),
        candidates.len()
    );

    candidates
        .iter()
        .filter(|record| !superseded.contains(&record.revision_id()))
        .cloned()
        .collect()
}

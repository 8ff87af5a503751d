use std::path::{Path, PathBuf};

use log::{debug, info};
use rayon::prelude::*;
use roxmltree::{Document, Node};
use wuintegrate_model::{Classification, RevisionId};

use crate::classify::classify_title;
use crate::manifest::MetadataError;
use crate::store::UpdateCatalog;

/// Counts reported by one localization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalizationStats {
    pub files: usize,
    pub classified: usize,
}

/// Classify every record that has a localization file in `dir`.
///
/// Files are parsed and classified in parallel against a read-only view of
/// the catalog; the resulting classifications are then applied in one pass.
///
/// # Errors
/// Returns an error if `dir` is missing or cannot be listed. Individual
/// unreadable or unclassifiable files are skipped.
pub fn load_localizations(
    dir: &Path,
    catalog: &mut UpdateCatalog,
) -> Result<LocalizationStats, MetadataError> {
    if !dir.is_dir() {
        return Err(MetadataError::MissingLocalizationDir {
            path: dir.to_path_buf(),
        });
    }

    let files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|error| {
            MetadataError::io_with_path("failed to list localization directory", dir, &error)
        })?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();

    let view: &UpdateCatalog = catalog;
    let events: Vec<(RevisionId, Classification)> = files
        .par_iter()
        .filter_map(|path| classify_file(path, view))
        .collect();

    let mut classified = 0;
    for (revision_id, classification) in events {
        if catalog.classify(revision_id, classification) {
            classified += 1;
        }
    }

    let stats = LocalizationStats {
        files: files.len(),
        classified,
    };
    info!(
        "Classified {} of {} localization files",
        stats.classified, stats.files
    );
    Ok(stats)
}

fn classify_file(path: &Path, catalog: &UpdateCatalog) -> Option<(RevisionId, Classification)> {
    let revision_id: RevisionId = path.file_name()?.to_str()?.parse().ok()?;
    if !catalog.contains(revision_id) {
        return None;
    }

    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(error) => {
            debug!("Skipping localization {}: {error}", path.display());
            return None;
        }
    };

    let classification = classify_localization(&text);
    if classification.is_none() {
        debug!("Revision {revision_id} has no usable localized title");
    }
    classification.map(|classification| (revision_id, classification))
}

/// Classify one localization document. Requires a `Title` and at least one
/// `Description` element.
#[must_use]
pub fn classify_localization(text: &str) -> Option<Classification> {
    let document = match Document::parse(text) {
        Ok(document) => document,
        Err(error) => {
            debug!("Skipping malformed localization XML: {error}");
            return None;
        }
    };

    let elements = || document.root_element().children().filter(Node::is_element);
    let title = elements().find(|node| node.tag_name().name() == "Title")?;
    if !elements().any(|node| node.tag_name().name() == "Description") {
        return None;
    }

    classify_title(title.text().unwrap_or_default())
}

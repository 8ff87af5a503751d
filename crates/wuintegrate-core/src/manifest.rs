use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::{debug, info};
use rayon::prelude::*;
use roxmltree::{Document, Node};
use thiserror::Error;
use wuintegrate_model::{RevisionId, UpdateRecord};

use crate::store::UpdateStore;

pub(crate) const OFFLINE_SYNC_NAMESPACE: &str =
    "http://schemas.microsoft.com/msus/2004/02/OfflineSync";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Manifest not found at {}", path.display())]
    MissingManifest { path: PathBuf },

    #[error("Localization directory not found at {}", path.display())]
    MissingLocalizationDir { path: PathBuf },

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed manifest XML: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("Malformed manifest: {0}")]
    Malformed(&'static str),
}

impl MetadataError {
    pub(crate) fn io_with_path(context: &'static str, path: &Path, source: &std::io::Error) -> Self {
        Self::Io {
            context,
            source: std::io::Error::new(source.kind(), format!("{}: {source}", path.display())),
        }
    }
}

/// Attributes of one `<Update>` element, borrowed from the document text.
struct RawUpdate<'a> {
    position: usize,
    revision_id: Option<&'a str>,
    update_id: Option<&'a str>,
    creation_date: Option<&'a str>,
    superseded_by: Vec<&'a str>,
    prerequisites: Vec<&'a str>,
}

impl<'a> RawUpdate<'a> {
    fn from_node(position: usize, node: Node<'a, '_>) -> Self {
        Self {
            position,
            revision_id: node.attribute("RevisionId"),
            update_id: node.attribute("UpdateId"),
            creation_date: node.attribute("CreationDate"),
            superseded_by: child_ids(node, "SupersededBy"),
            prerequisites: child_ids(node, "Prerequisites"),
        }
    }

    fn to_record(&self) -> Option<UpdateRecord> {
        let revision_id: RevisionId = self.revision_id?.trim().parse().ok()?;
        Some(
            UpdateRecord::new(revision_id, self.update_id.map(str::to_string))
                .with_creation_date(self.creation_date.and_then(parse_creation_date))
                .with_superseded_by(self.superseded_by.iter().map(|id| (*id).to_string()).collect())
                .with_prerequisites(self.prerequisites.iter().map(|id| (*id).to_string()).collect()),
        )
    }
}

fn is_offline_sync(node: Node<'_, '_>, name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == name
        && matches!(node.tag_name().namespace(), None | Some(OFFLINE_SYNC_NAMESPACE))
}

/// `Id` attributes of the children of every `<container>` child of `node`.
fn child_ids<'a>(node: Node<'a, '_>, container: &str) -> Vec<&'a str> {
    node.children()
        .filter(|child| is_offline_sync(*child, container))
        .flat_map(|child| child.children())
        .filter(Node::is_element)
        .filter_map(|child| child.attribute("Id"))
        .collect()
}

/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS` (read as UTC) and `YYYY-MM-DD`.
fn parse_creation_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(date.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|date| date.and_utc())
}

/// Parse the manifest at `path` into a staging store.
///
/// # Errors
/// Returns an error if the file is missing, unreadable, or not well-formed
/// XML with an updates container.
pub fn parse_manifest(path: &Path) -> Result<UpdateStore, MetadataError> {
    if !path.is_file() {
        return Err(MetadataError::MissingManifest {
            path: path.to_path_buf(),
        });
    }
    let text = std::fs::read_to_string(path)
        .map_err(|error| MetadataError::io_with_path("failed to read manifest", path, &error))?;
    let store = parse_manifest_str(&text)?;
    info!("Loaded {} updates from {}", store.len(), path.display());
    Ok(store)
}

/// Parse manifest XML text. Elements without a usable `RevisionId` are
/// skipped; the first element for a revision id wins.
///
/// # Errors
/// Returns an error if the text is not XML or has no updates container.
pub fn parse_manifest_str(text: &str) -> Result<UpdateStore, MetadataError> {
    let document = Document::parse(text)?;
    let container = document
        .root_element()
        .children()
        .find(Node::is_element)
        .ok_or(MetadataError::Malformed("root element has no updates container"))?;

    let raw: Vec<RawUpdate<'_>> = container
        .children()
        .filter(|node| is_offline_sync(*node, "Update"))
        .enumerate()
        .map(|(position, node)| RawUpdate::from_node(position, node))
        .collect();

    let store = UpdateStore::default();
    raw.par_iter().for_each(|raw| match raw.to_record() {
        Some(record) => {
            store.insert_first(raw.position, record);
        }
        None => debug!(
            "Skipping update element {} without a numeric RevisionId",
            raw.position
        ),
    });

    Ok(store)
}

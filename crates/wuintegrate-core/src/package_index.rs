use std::collections::BTreeMap;
use std::path::Path;

use log::debug;
use roxmltree::{Document, Node};
use thiserror::Error;
use wuintegrate_model::RevisionId;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed package index XML: {0}")]
    Xml(#[from] roxmltree::Error),
}

/// Maps revision id ranges to the cabinet holding their metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageIndex {
    ranges: BTreeMap<RevisionId, String>,
}

impl PackageIndex {
    /// # Errors
    /// Returns an error if the file cannot be read or is not XML.
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let text = std::fs::read_to_string(path).map_err(|error| IndexError::Io {
            context: "failed to read package index",
            source: std::io::Error::new(error.kind(), format!("{}: {error}", path.display())),
        })?;
        Self::parse(&text)
    }

    /// Entries without a numeric `RANGESTART` or a `NAME` are skipped.
    ///
    /// # Errors
    /// Returns an error if `text` is not XML.
    pub fn parse(text: &str) -> Result<Self, IndexError> {
        let document = Document::parse(text)?;
        let mut ranges = BTreeMap::new();

        let entries = document
            .root_element()
            .children()
            .find(Node::is_element)
            .into_iter()
            .flat_map(|list| list.children())
            .filter(Node::is_element);

        for entry in entries {
            let start = entry
                .attribute("RANGESTART")
                .and_then(|value| value.trim().parse::<RevisionId>().ok());
            match (start, entry.attribute("NAME")) {
                (Some(start), Some(name)) => {
                    ranges.insert(start, name.to_string());
                }
                _ => debug!("Skipping package index entry without RANGESTART or NAME"),
            }
        }

        Ok(Self { ranges })
    }

    /// The cabinet whose range start is the greatest one not above
    /// `revision_id`.
    #[must_use]
    pub fn cabinet_for(&self, revision_id: RevisionId) -> Option<&str> {
        self.ranges
            .range(..=revision_id)
            .next_back()
            .map(|(_, name)| name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

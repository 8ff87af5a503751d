use async_trait::async_trait;
use std::path::Path;

use crate::error::{CatalogError, ServicingError};
use crate::types::{DownloadLink, ResolutionSummary};

/// Resolves an update identifier to the package files that implement it.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// An empty list means there is nothing to download for this update.
    async fn lookup(&self, update_id: &str) -> Result<Vec<DownloadLink>, CatalogError>;
}

/// The single blocking decision point before packages are downloaded.
#[async_trait]
pub trait Confirmation: Send + Sync {
    async fn confirm(&self, summary: &ResolutionSummary) -> bool;
}

/// Approves every summary without asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl Confirmation for AutoApprove {
    async fn confirm(&self, _summary: &ResolutionSummary) -> bool {
        true
    }
}

/// Offline image servicing, supplied by the host platform.
///
/// The downloaded packages are handed over one file at a time; the caller
/// deletes each file once it has been added.
pub trait ImageServicing: Send {
    type Handle: Send;

    fn mount(&mut self, image: &Path, index: u32) -> Result<Self::Handle, ServicingError>;

    fn add_package(&mut self, handle: &Self::Handle, package: &Path)
    -> Result<(), ServicingError>;

    fn commit(&mut self, handle: Self::Handle) -> Result<(), ServicingError>;

    fn discard(&mut self, handle: Self::Handle) -> Result<(), ServicingError>;
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::types::{Architecture, OsVersion, ResolvedUpdate, Target};

    struct StaticCatalog {
        links: Vec<DownloadLink>,
    }

    #[async_trait]
    impl CatalogSource for StaticCatalog {
        async fn lookup(&self, update_id: &str) -> Result<Vec<DownloadLink>, CatalogError> {
            Ok(self
                .links
                .iter()
                .filter(|link| link.update_id == update_id)
                .cloned()
                .collect())
        }
    }

    fn summary() -> ResolutionSummary {
        ResolutionSummary {
            target: Target::new(OsVersion::Windows10V22H2, Architecture::X64),
            updates: vec![ResolvedUpdate {
                revision_id: 42,
                kb_number: "KB5034441".to_string(),
                update_id: Some("a".to_string()),
                cabinet: None,
            }],
        }
    }

    #[tokio::test]
    async fn auto_approve_accepts_any_summary() {
        assert!(AutoApprove.confirm(&summary()).await);
    }

    #[tokio::test]
    async fn catalog_source_can_return_no_links() {
        let catalog = StaticCatalog {
            links: vec![DownloadLink {
                update_id: "a".to_string(),
                url: "https://download.windowsupdate.com/a.cab".to_string(),
                file_name: "a.cab".to_string(),
            }],
        };

        let found = catalog.lookup("a").await.expect("lookup should succeed");
        let missing = catalog.lookup("b").await.expect("lookup should succeed");

        assert_eq!(found.len(), 1);
        assert!(missing.is_empty());
    }
}

//! Update catalog pipeline for offline Windows images.
//!
//! This crate holds everything between "which image is this" and "these
//! packages are on disk":
//! - Fetching and unpacking the offline scan catalog.
//! - Parsing the update manifest and classifying localized titles.
//! - Supersession resolution for one target release and architecture.
//! - Catalog lookups and package downloads with retries and cancellation.
//! - The run state machine and the image-servicing session around it.

pub mod archive;
mod cabinet;
mod catalog;
pub mod classify;
mod download;
mod localization;
mod manifest;
mod package_index;
mod pipeline;
mod retry;
mod session;
mod store;
pub mod supersession;

/// Catalog archive download and cabinet/zip extraction.
pub use archive::{ArchiveError, ArchiveFetcher, extract_archive, extract_catalog};
/// Catalog lookup client and download-dialog scraping.
pub use catalog::{
    DEFAULT_CATALOG_ENDPOINT, UpdateCatalogClient, request_body, scrape_download_links,
};
/// Streaming downloads with progress reporting.
pub use download::{DownloadError, DownloadOutcome, DownloadProgress, Downloader, http_client};
/// Localization pass over per-revision title files.
pub use localization::{LocalizationStats, classify_localization, load_localizations};
/// Manifest pass over the package XML.
pub use manifest::{MetadataError, parse_manifest, parse_manifest_str};
/// Revision-range to cabinet index.
pub use package_index::{IndexError, PackageIndex};
/// Run orchestration.
pub use pipeline::{
    DEFAULT_CATALOG_URL, DEFAULT_MAX_CONCURRENT_DOWNLOADS, DEFAULT_MAX_CONCURRENT_LOOKUPS,
    LoadedCatalog, Pipeline, PipelineError, RunContext, RunOutcome, RunState, load_metadata,
};
/// Retry schedule shared by lookups and downloads.
pub use retry::{DEFAULT_RETRY_DELAYS_SECS, RetryPolicy, Transient};
/// Mount, integrate and commit one image.
pub use session::{ImageSelection, ServicingReport, service_image};
/// Parsed update records.
pub use store::{UpdateCatalog, UpdateStore};

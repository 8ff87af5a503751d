use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use futures_util::{StreamExt, TryStreamExt, stream};
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wuintegrate_model::{
    CatalogError, CatalogSource, Confirmation, DownloadLink, ResolutionSummary, ResolvedUpdate,
    ServicingError, Target, UpdateRecord,
};
use wuintegrate_platform::ScratchLayout;

use crate::archive::{ArchiveError, ArchiveFetcher};
use crate::download::{DownloadError, DownloadOutcome, DownloadProgress, Downloader};
use crate::localization::load_localizations;
use crate::manifest::{MetadataError, parse_manifest};
use crate::package_index::PackageIndex;
use crate::retry::RetryPolicy;
use crate::store::UpdateCatalog;
use crate::supersession;

pub const DEFAULT_CATALOG_URL: &str =
    "https://catalog.s.download.windowsupdate.com/microsoftupdate/v6/wsusscan/wsusscn2.cab";
pub const DEFAULT_MAX_CONCURRENT_LOOKUPS: usize = 4;
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 4;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Servicing(#[from] ServicingError),

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Everything one run needs, passed explicitly instead of held globally.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub layout: ScratchLayout,
    pub catalog_url: String,
    pub client: reqwest::Client,
    pub retry: RetryPolicy,
    pub cancel: CancellationToken,
    pub max_concurrent_lookups: usize,
    pub max_concurrent_downloads: usize,
    /// Keep the extracted catalog after it has been loaded.
    pub keep_extracted: bool,
    pub progress: Option<mpsc::Sender<DownloadProgress>>,
}

impl RunContext {
    #[must_use]
    pub fn new(layout: ScratchLayout, client: reqwest::Client) -> Self {
        Self {
            layout,
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            client,
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
            max_concurrent_lookups: DEFAULT_MAX_CONCURRENT_LOOKUPS,
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            keep_extracted: false,
            progress: None,
        }
    }

    #[must_use]
    pub fn downloader(&self) -> Downloader {
        Downloader::new(self.client.clone(), self.retry.clone(), self.cancel.clone())
            .with_progress(self.progress.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Bootstrapped,
    CatalogReady,
    Filtered,
    Resolved,
    AwaitingConfirmation,
    Downloading,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bootstrapped => "bootstrapped",
            Self::CatalogReady => "catalog ready",
            Self::Filtered => "filtered",
            Self::Resolved => "resolved",
            Self::AwaitingConfirmation => "awaiting confirmation",
            Self::Downloading => "downloading",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The parsed catalog, kept across runs for different targets.
#[derive(Debug, Clone, Default)]
pub struct LoadedCatalog {
    pub updates: UpdateCatalog,
    pub index: Option<PackageIndex>,
}

#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub ready_to_integrate: bool,
    pub resolved: Vec<UpdateRecord>,
    pub downloaded: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// Drives one target from catalog download to downloaded packages.
pub struct Pipeline<C> {
    context: RunContext,
    source: C,
    loaded: Option<LoadedCatalog>,
    state: RunState,
    history: Vec<RunState>,
}

impl<C: CatalogSource> Pipeline<C> {
    pub fn new(context: RunContext, source: C) -> Self {
        Self {
            context,
            source,
            loaded: None,
            state: RunState::Bootstrapped,
            history: vec![RunState::Bootstrapped],
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn source(&self) -> &C {
        &self.source
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// States visited by the latest run, in order.
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    fn transition(&mut self, next: RunState) {
        debug!("Run state: {} -> {next}", self.state);
        self.state = next;
        self.history.push(next);
    }

    /// Resolve, confirm and download the updates for `target`.
    ///
    /// On failure the run's cancellation token is cancelled so that every
    /// transfer still in flight stops, and the state becomes `Failed`.
    ///
    /// # Errors
    /// Returns the first fatal error of any stage.
    pub async fn run(
        &mut self,
        target: Target,
        confirmation: &dyn Confirmation,
    ) -> Result<RunOutcome, PipelineError> {
        self.state = RunState::Bootstrapped;
        self.history = vec![RunState::Bootstrapped];
        info!("Resolving updates for {target}");

        match self.drive(target, confirmation).await {
            Ok(outcome) => {
                self.transition(RunState::Done);
                Ok(outcome)
            }
            Err(err) => {
                self.context.cancel.cancel();
                self.transition(RunState::Failed);
                error!("Run for {target} failed: {err}");
                Err(err)
            }
        }
    }

    async fn drive(
        &mut self,
        target: Target,
        confirmation: &dyn Confirmation,
    ) -> Result<RunOutcome, PipelineError> {
        let candidates = self.loaded_catalog().await?.updates.candidates(target);
        self.transition(RunState::CatalogReady);
        info!("{} candidate updates for {target}", candidates.len());
        self.transition(RunState::Filtered);

        let resolved = supersession::resolve(&candidates);
        info!("{} updates remain after supersession", resolved.len());
        self.transition(RunState::Resolved);

        let summary = self.summarize(target, &resolved);
        for update in &summary.updates {
            info!("  {} (revision {})", update.kb_number, update.revision_id);
        }
        self.transition(RunState::AwaitingConfirmation);
        if !confirmation.confirm(&summary).await {
            info!("Integration declined, nothing will be downloaded");
            return Ok(RunOutcome {
                ready_to_integrate: false,
                resolved,
                ..RunOutcome::default()
            });
        }

        self.transition(RunState::Downloading);
        let links = self.lookup_links(&resolved).await?;
        let (downloaded, skipped) = self.download_links(links).await?;
        info!(
            "{} packages downloaded, {} already present",
            downloaded.len(),
            skipped.len()
        );

        Ok(RunOutcome {
            ready_to_integrate: true,
            resolved,
            downloaded,
            skipped,
        })
    }

    /// Download, extract and parse the catalog on first use.
    ///
    /// # Errors
    /// Returns an error if the archive cannot be fetched or its metadata
    /// cannot be loaded.
    pub async fn loaded_catalog(&mut self) -> Result<&LoadedCatalog, PipelineError> {
        let loaded = match self.loaded.take() {
            Some(loaded) => loaded,
            None => self.load_catalog().await?,
        };
        Ok(self.loaded.insert(loaded))
    }

    async fn load_catalog(&self) -> Result<LoadedCatalog, PipelineError> {
        let layout = &self.context.layout;
        ArchiveFetcher::new(self.context.downloader())
            .fetch_and_extract(&self.context.catalog_url, layout)
            .await?;

        let blocking_layout = layout.clone();
        let loaded = tokio::task::spawn_blocking(move || load_metadata(&blocking_layout))
            .await
            .map_err(|err| PipelineError::Task(err.to_string()))??;

        if !self.context.keep_extracted
            && let Err(err) = layout.remove_extracted()
        {
            warn!("Failed to remove extracted catalog: {err}");
        }

        Ok(loaded)
    }

    fn summarize(&self, target: Target, resolved: &[UpdateRecord]) -> ResolutionSummary {
        let index = self.loaded.as_ref().and_then(|loaded| loaded.index.as_ref());
        ResolutionSummary {
            target,
            updates: resolved
                .iter()
                .map(|record| ResolvedUpdate {
                    revision_id: record.revision_id(),
                    kb_number: record.kb_number().unwrap_or_default().to_string(),
                    update_id: record.update_id().map(str::to_string),
                    cabinet: index
                        .and_then(|index| index.cabinet_for(record.revision_id()))
                        .map(str::to_string),
                })
                .collect(),
        }
    }

    async fn lookup_links(
        &self,
        resolved: &[UpdateRecord],
    ) -> Result<Vec<DownloadLink>, PipelineError> {
        let update_ids: Vec<String> = resolved
            .iter()
            .filter_map(|record| {
                if record.update_id().is_none() {
                    debug!(
                        "Revision {} has no update id, skipping lookup",
                        record.revision_id()
                    );
                }
                record.update_id().map(str::to_string)
            })
            .collect();

        let source = &self.source;
        let mut results: Vec<(usize, Vec<DownloadLink>)> =
            stream::iter(update_ids.into_iter().enumerate())
                .map(|(position, update_id)| async move {
                    source
                        .lookup(&update_id)
                        .await
                        .map(|links| (position, links))
                })
                .buffer_unordered(self.context.max_concurrent_lookups.max(1))
                .try_collect()
                .await?;
        results.sort_by_key(|(position, _)| *position);

        let mut file_names = HashSet::new();
        Ok(results
            .into_iter()
            .flat_map(|(_, links)| links)
            .filter(|link| {
                let fresh = file_names.insert(link.file_name.clone());
                if !fresh {
                    debug!("Skipping duplicate package {}", link.file_name);
                }
                fresh
            })
            .collect())
    }

    async fn download_links(
        &self,
        links: Vec<DownloadLink>,
    ) -> Result<(Vec<PathBuf>, Vec<PathBuf>), PipelineError> {
        let downloads_dir = self.context.layout.downloads_dir();
        let downloader = self.context.downloader();
        let downloads_dir: &Path = &downloads_dir;
        let downloader = &downloader;

        let mut outcomes: Vec<(PathBuf, DownloadOutcome)> = stream::iter(links)
            .map(|link| async move {
                let dest = downloads_dir.join(&link.file_name);
                downloader
                    .download(&link.url, &dest)
                    .await
                    .map(|outcome| (dest, outcome))
            })
            .buffer_unordered(self.context.max_concurrent_downloads.max(1))
            .try_collect()
            .await?;
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));

        let mut downloaded = Vec::new();
        let mut skipped = Vec::new();
        for (path, outcome) in outcomes {
            match outcome {
                DownloadOutcome::Fetched { .. } => downloaded.push(path),
                DownloadOutcome::Skipped => skipped.push(path),
            }
        }
        Ok((downloaded, skipped))
    }
}

/// Parse the extracted manifest and localizations of `layout`.
///
/// # Errors
/// Returns an error if the manifest or the localization directory is
/// missing or unreadable.
pub fn load_metadata(layout: &ScratchLayout) -> Result<LoadedCatalog, MetadataError> {
    let mut updates = parse_manifest(&layout.package_manifest())?.into_catalog();
    load_localizations(&layout.localization_dir(), &mut updates)?;
    let pruned = updates.prune_unusable();
    info!(
        "{} usable updates, {pruned} without a KB number or OS version removed",
        updates.len()
    );

    Ok(LoadedCatalog {
        updates,
        index: load_index(&layout.package_index()),
    })
}

fn load_index(path: &Path) -> Option<PackageIndex> {
    if !path.is_file() {
        debug!("No package index at {}", path.display());
        return None;
    }
    match PackageIndex::load(path) {
        Ok(index) => Some(index),
        Err(err) => {
            warn!("Ignoring unreadable package index: {err}");
            None
        }
    }
}

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use rayon::prelude::*;
use thiserror::Error;
use wuintegrate_platform::ScratchLayout;

use crate::cabinet::{Cabinet, ExtractError};
use crate::download::{DownloadError, DownloadOutcome, Downloader};

const CAB_MAGIC: &[u8; 4] = b"MSCF";
const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";
const PACKAGE_ARCHIVE_NAME: &str = "package.cab";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not a valid cabinet: {source}", path.display())]
    Cabinet {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not a valid zip archive: {source}", path.display())]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("{} is neither a cabinet nor a zip archive", path.display())]
    UnknownFormat { path: PathBuf },

    #[error("No package.cab found in {}", dir.display())]
    MissingPackageArchive { dir: PathBuf },

    #[error("Extraction task failed: {0}")]
    Task(String),
}

impl ArchiveError {
    fn io_with_path(context: &'static str, path: &Path, source: &std::io::Error) -> Self {
        Self::Io {
            context,
            source: std::io::Error::new(source.kind(), format!("{}: {source}", path.display())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Cabinet,
    Zip,
}

/// Identify an archive by its leading magic bytes.
///
/// # Errors
/// Returns an error if the file cannot be read or has no recognised header.
pub fn detect_format(path: &Path) -> Result<ArchiveFormat, ArchiveError> {
    let mut header = [0u8; 4];
    let mut file = File::open(path)
        .map_err(|error| ArchiveError::io_with_path("failed to open archive", path, &error))?;
    if file.read_exact(&mut header).is_err() {
        return Err(ArchiveError::UnknownFormat {
            path: path.to_path_buf(),
        });
    }

    match &header {
        CAB_MAGIC => Ok(ArchiveFormat::Cabinet),
        ZIP_MAGIC => Ok(ArchiveFormat::Zip),
        _ => Err(ArchiveError::UnknownFormat {
            path: path.to_path_buf(),
        }),
    }
}

/// Extract `archive` into `dest`, returning the paths written.
///
/// With a `prefix`, only entries whose normalised path starts with it
/// (ASCII case-insensitively) are extracted. Entries that would land outside
/// `dest` are skipped.
///
/// # Errors
/// Returns an error if the archive is unreadable or a file cannot be written.
pub fn extract_archive(
    archive: &Path,
    dest: &Path,
    prefix: Option<&str>,
) -> Result<Vec<PathBuf>, ArchiveError> {
    let written = match detect_format(archive)? {
        ArchiveFormat::Cabinet => extract_cabinet(archive, dest, prefix)?,
        ArchiveFormat::Zip => extract_zip(archive, dest, prefix)?,
    };
    debug!(
        "Extracted {} entries from {} to {}",
        written.len(),
        archive.display(),
        dest.display()
    );
    Ok(written)
}

fn extract_cabinet(
    archive: &Path,
    dest: &Path,
    prefix: Option<&str>,
) -> Result<Vec<PathBuf>, ArchiveError> {
    let file = File::open(archive)
        .map_err(|error| ArchiveError::io_with_path("failed to open cabinet", archive, &error))?;
    let mut cabinet = Cabinet::new(BufReader::new(file)).map_err(|source| ArchiveError::Cabinet {
        path: archive.to_path_buf(),
        source,
    })?;

    let mut targets: BTreeMap<usize, PathBuf> = BTreeMap::new();
    for (index, entry) in cabinet.entries().iter().enumerate() {
        let normalized = normalize_entry_name(&entry.name);
        if !matches_prefix(&normalized, prefix) {
            continue;
        }
        let Some(relative) = enclosed_path(&normalized) else {
            warn!("Skipping cabinet entry with unsafe path: {}", entry.name);
            continue;
        };
        let out_path = dest.join(relative);
        create_parent(&out_path)?;
        targets.insert(index, out_path);
    }

    let selected: Vec<usize> = targets.keys().copied().collect();
    let mut open: HashMap<usize, BufWriter<File>> = HashMap::new();
    let mut written = Vec::with_capacity(selected.len());
    let blocks = cabinet
        .extract(&selected, |index, data, last| -> Result<(), ArchiveError> {
            let Some(out_path) = targets.get(&index) else {
                return Ok(());
            };
            let outfile = match open.entry(index) {
                Entry::Occupied(slot) => slot.into_mut(),
                Entry::Vacant(slot) => {
                    let file = File::create(out_path).map_err(|error| {
                        ArchiveError::io_with_path("failed to create extracted file", out_path, &error)
                    })?;
                    slot.insert(BufWriter::new(file))
                }
            };
            outfile.write_all(data).map_err(|error| {
                ArchiveError::io_with_path("failed to extract cabinet entry", out_path, &error)
            })?;
            if last {
                if let Some(mut outfile) = open.remove(&index) {
                    outfile.flush().map_err(|error| {
                        ArchiveError::io_with_path("failed to extract cabinet entry", out_path, &error)
                    })?;
                }
                written.push(out_path.clone());
            }
            Ok(())
        })
        .map_err(|error| match error {
            ExtractError::Cabinet(source) => ArchiveError::Cabinet {
                path: archive.to_path_buf(),
                source,
            },
            ExtractError::Sink(error) => error,
        })?;
    debug!("Decoded {blocks} data blocks from {}", archive.display());

    Ok(written)
}

fn extract_zip(
    archive: &Path,
    dest: &Path,
    prefix: Option<&str>,
) -> Result<Vec<PathBuf>, ArchiveError> {
    let file = File::open(archive)
        .map_err(|error| ArchiveError::io_with_path("failed to open zip file", archive, &error))?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file)).map_err(|source| ArchiveError::Zip {
        path: archive.to_path_buf(),
        source,
    })?;

    let mut written = Vec::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|source| ArchiveError::Zip {
            path: archive.to_path_buf(),
            source,
        })?;
        if entry.is_dir() || !matches_prefix(&normalize_entry_name(entry.name()), prefix) {
            continue;
        }
        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping zip entry with unsafe path: {}", entry.name());
            continue;
        };
        let out_path = dest.join(relative);
        create_parent(&out_path)?;

        let mut outfile = File::create(&out_path).map_err(|error| {
            ArchiveError::io_with_path("failed to create extracted file", &out_path, &error)
        })?;
        std::io::copy(&mut entry, &mut outfile).map_err(|error| {
            ArchiveError::io_with_path("failed to extract zip entry", &out_path, &error)
        })?;
        written.push(out_path);
    }

    Ok(written)
}

fn create_parent(path: &Path) -> Result<(), ArchiveError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|error| {
            ArchiveError::io_with_path("failed to create extraction directory", parent, &error)
        })?;
    }
    Ok(())
}

fn normalize_entry_name(name: &str) -> String {
    name.replace('\\', "/")
}

fn matches_prefix(normalized: &str, prefix: Option<&str>) -> bool {
    prefix.is_none_or(|prefix| {
        normalized
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    })
}

/// Relative path for an entry, or `None` if it is absolute or escapes the
/// destination.
fn enclosed_path(normalized: &str) -> Option<PathBuf> {
    if normalized.starts_with('/') {
        return None;
    }
    let mut path = PathBuf::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." => return None,
            part if part.contains(':') => return None,
            part => path.push(part),
        }
    }
    (!path.as_os_str().is_empty()).then_some(path)
}

fn is_archive_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("cab") || ext.eq_ignore_ascii_case("zip"))
}

fn is_package_archive(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.eq_ignore_ascii_case(PACKAGE_ARCHIVE_NAME))
}

/// Unpack a downloaded catalog archive into `layout`.
///
/// The top level is extracted in full, then the package archive is
/// extracted into the package directory and every other nested archive
/// contributes only its entries for the layout's locale. Returns the
/// top-level files.
///
/// # Errors
/// Returns an error if any archive is corrupt, the package archive is
/// missing, or extraction cannot write to disk.
pub fn extract_catalog(archive: &Path, layout: &ScratchLayout) -> Result<Vec<PathBuf>, ArchiveError> {
    let extract_dir = layout.extract_dir();
    let top_level = extract_archive(archive, &extract_dir, None)?;

    let nested: Vec<&PathBuf> = top_level.iter().filter(|path| is_archive_file(path)).collect();
    let package = nested
        .iter()
        .find(|path| is_package_archive(path))
        .ok_or_else(|| ArchiveError::MissingPackageArchive {
            dir: extract_dir.clone(),
        })?;
    extract_archive(package, &layout.package_dir(), None)?;

    let fragment = layout.localization_fragment();
    let localization_root = layout.localization_root();
    let localized: usize = nested
        .par_iter()
        .filter(|path| !is_package_archive(path))
        .map(|path| {
            extract_archive(path, &localization_root, Some(&fragment)).map(|written| written.len())
        })
        .try_reduce(|| 0, |a, b| Ok(a + b))?;

    info!(
        "Extracted catalog: {} top-level files, {localized} localization files for '{}'",
        top_level.len(),
        layout.locale()
    );
    Ok(top_level)
}

/// Downloads the offline catalog archive and unpacks it into the scratch
/// layout.
#[derive(Debug, Clone)]
pub struct ArchiveFetcher {
    downloader: Downloader,
}

impl ArchiveFetcher {
    #[must_use]
    pub fn new(downloader: Downloader) -> Self {
        Self { downloader }
    }

    /// Fetch `url` into the layout's archive path, reusing an archive left by
    /// an earlier run, then extract it on a blocking thread.
    ///
    /// # Errors
    /// Returns an error if the download or extraction fails.
    pub async fn fetch_and_extract(
        &self,
        url: &str,
        layout: &ScratchLayout,
    ) -> Result<Vec<PathBuf>, ArchiveError> {
        layout.ensure_dirs().map_err(|error| {
            ArchiveError::io_with_path("failed to create scratch directory", layout.root(), &error)
        })?;

        let archive = layout.catalog_archive();
        match self.downloader.download(url, &archive).await? {
            DownloadOutcome::Skipped => info!("Using existing catalog archive {}", archive.display()),
            DownloadOutcome::Fetched { bytes } => info!("Downloaded catalog archive ({bytes} bytes)"),
        }

        let layout = layout.clone();
        tokio::task::spawn_blocking(move || extract_catalog(&archive, &layout))
            .await
            .map_err(|error| ArchiveError::Task(error.to_string()))?
    }
}

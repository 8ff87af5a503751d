use log::debug;
use std::path::{Path, PathBuf};

const DEFAULT_ROOT_NAME: &str = "WUIntegrate";
const CATALOG_ARCHIVE_NAME: &str = "wsusscn2.cab";
const PACKAGE_MANIFEST_NAME: &str = "package.xml";
const PACKAGE_INDEX_NAME: &str = "index.xml";

/// Directory layout of one run's scratch space.
///
/// ```text
/// <root>/wsusscn2.cab
/// <root>/scancab/                       extracted catalog archive
/// <root>/scancab/package/package.xml    manifest
/// <root>/scancab/localizations/l/<locale>/<revision id>
/// <root>/updates/                       downloaded packages
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchLayout {
    root: PathBuf,
    locale: String,
}

impl ScratchLayout {
    pub fn new(root: impl Into<PathBuf>, locale: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            locale: locale.into(),
        }
    }

    /// Layout rooted in the system temporary directory.
    pub fn in_temp_dir(locale: impl Into<String>) -> Self {
        Self::new(std::env::temp_dir().join(DEFAULT_ROOT_NAME), locale)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn locale(&self) -> &str {
        &self.locale
    }

    #[must_use]
    pub fn catalog_archive(&self) -> PathBuf {
        self.root.join(CATALOG_ARCHIVE_NAME)
    }

    #[must_use]
    pub fn extract_dir(&self) -> PathBuf {
        self.root.join("scancab")
    }

    #[must_use]
    pub fn package_dir(&self) -> PathBuf {
        self.extract_dir().join("package")
    }

    #[must_use]
    pub fn package_manifest(&self) -> PathBuf {
        self.package_dir().join(PACKAGE_MANIFEST_NAME)
    }

    #[must_use]
    pub fn package_index(&self) -> PathBuf {
        self.extract_dir().join(PACKAGE_INDEX_NAME)
    }

    #[must_use]
    pub fn localization_root(&self) -> PathBuf {
        self.extract_dir().join("localizations")
    }

    /// Archive entry prefix kept when extracting localization cabinets.
    #[must_use]
    pub fn localization_fragment(&self) -> String {
        format!("l/{}/", self.locale)
    }

    #[must_use]
    pub fn localization_dir(&self) -> PathBuf {
        self.localization_root().join("l").join(&self.locale)
    }

    #[must_use]
    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("updates")
    }

    /// Create the directories a run writes into.
    ///
    /// # Errors
    /// Returns an error if any directory cannot be created.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.extract_dir())?;
        std::fs::create_dir_all(self.downloads_dir())?;
        Ok(())
    }

    /// Remove the extracted catalog while keeping the archive and downloads.
    ///
    /// # Errors
    /// Returns an error if the extraction directory exists but cannot be removed.
    pub fn remove_extracted(&self) -> std::io::Result<()> {
        let dir = self.extract_dir();
        if dir.exists() {
            debug!("Removing extracted catalog at {}", dir.display());
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    /// Remove the whole scratch root.
    ///
    /// # Errors
    /// Returns an error if the root exists but cannot be removed.
    pub fn remove_all(&self) -> std::io::Result<()> {
        if self.root.exists() {
            debug!("Removing scratch directory {}", self.root.display());
            std::fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }
}

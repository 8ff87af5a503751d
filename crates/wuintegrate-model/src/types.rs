use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

pub type RevisionId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OsVersion {
    Windows7,
    Windows81,
    /// Titles that name Windows 10 without a version tag (the 1507 release train).
    Windows10,
    Windows10V1507,
    Windows10V1511,
    Windows10V1607,
    Windows10V1703,
    Windows10V1709,
    Windows10V1803,
    Windows10V1809,
    Windows10V1903,
    Windows10V1909,
    Windows10V2004,
    Windows10V20H2,
    Windows10V21H1,
    Windows10V21H2,
    Windows10V22H2,
    /// Titles that name Windows 11 without a version tag.
    Windows11,
    Windows11V21H2,
    Windows11V22H2,
    Windows11V23H2,
    Windows11V24H2,
    WindowsServer2008,
    WindowsServer2008R2,
    WindowsServer2012,
    WindowsServer2012R2,
    WindowsServer2016,
    WindowsServer2019,
    WindowsServer2022,
    WindowsServer2025,
    Unknown,
}

impl OsVersion {
    pub const ALL: [OsVersion; 30] = [
        Self::Windows7,
        Self::Windows81,
        Self::Windows10,
        Self::Windows10V1507,
        Self::Windows10V1511,
        Self::Windows10V1607,
        Self::Windows10V1703,
        Self::Windows10V1709,
        Self::Windows10V1803,
        Self::Windows10V1809,
        Self::Windows10V1903,
        Self::Windows10V1909,
        Self::Windows10V2004,
        Self::Windows10V20H2,
        Self::Windows10V21H1,
        Self::Windows10V21H2,
        Self::Windows10V22H2,
        Self::Windows11,
        Self::Windows11V21H2,
        Self::Windows11V22H2,
        Self::Windows11V23H2,
        Self::Windows11V24H2,
        Self::WindowsServer2008,
        Self::WindowsServer2008R2,
        Self::WindowsServer2012,
        Self::WindowsServer2012R2,
        Self::WindowsServer2016,
        Self::WindowsServer2019,
        Self::WindowsServer2022,
        Self::WindowsServer2025,
    ];

    /// Short identifier accepted on the command line.
    #[must_use]
    pub fn slug(self) -> &'static str {
        match self {
            Self::Windows7 => "windows7",
            Self::Windows81 => "windows8.1",
            Self::Windows10 => "windows10",
            Self::Windows10V1507 => "windows10-1507",
            Self::Windows10V1511 => "windows10-1511",
            Self::Windows10V1607 => "windows10-1607",
            Self::Windows10V1703 => "windows10-1703",
            Self::Windows10V1709 => "windows10-1709",
            Self::Windows10V1803 => "windows10-1803",
            Self::Windows10V1809 => "windows10-1809",
            Self::Windows10V1903 => "windows10-1903",
            Self::Windows10V1909 => "windows10-1909",
            Self::Windows10V2004 => "windows10-2004",
            Self::Windows10V20H2 => "windows10-20h2",
            Self::Windows10V21H1 => "windows10-21h1",
            Self::Windows10V21H2 => "windows10-21h2",
            Self::Windows10V22H2 => "windows10-22h2",
            Self::Windows11 => "windows11",
            Self::Windows11V21H2 => "windows11-21h2",
            Self::Windows11V22H2 => "windows11-22h2",
            Self::Windows11V23H2 => "windows11-23h2",
            Self::Windows11V24H2 => "windows11-24h2",
            Self::WindowsServer2008 => "server2008",
            Self::WindowsServer2008R2 => "server2008r2",
            Self::WindowsServer2012 => "server2012",
            Self::WindowsServer2012R2 => "server2012r2",
            Self::WindowsServer2016 => "server2016",
            Self::WindowsServer2019 => "server2019",
            Self::WindowsServer2022 => "server2022",
            Self::WindowsServer2025 => "server2025",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Windows7 => "Windows 7",
            Self::Windows81 => "Windows 8.1",
            Self::Windows10 => "Windows 10",
            Self::Windows10V1507 => "Windows 10 Version 1507",
            Self::Windows10V1511 => "Windows 10 Version 1511",
            Self::Windows10V1607 => "Windows 10 Version 1607",
            Self::Windows10V1703 => "Windows 10 Version 1703",
            Self::Windows10V1709 => "Windows 10 Version 1709",
            Self::Windows10V1803 => "Windows 10 Version 1803",
            Self::Windows10V1809 => "Windows 10 Version 1809",
            Self::Windows10V1903 => "Windows 10 Version 1903",
            Self::Windows10V1909 => "Windows 10 Version 1909",
            Self::Windows10V2004 => "Windows 10 Version 2004",
            Self::Windows10V20H2 => "Windows 10 Version 20H2",
            Self::Windows10V21H1 => "Windows 10 Version 21H1",
            Self::Windows10V21H2 => "Windows 10 Version 21H2",
            Self::Windows10V22H2 => "Windows 10 Version 22H2",
            Self::Windows11 => "Windows 11",
            Self::Windows11V21H2 => "Windows 11 Version 21H2",
            Self::Windows11V22H2 => "Windows 11 Version 22H2",
            Self::Windows11V23H2 => "Windows 11 Version 23H2",
            Self::Windows11V24H2 => "Windows 11 Version 24H2",
            Self::WindowsServer2008 => "Windows Server 2008",
            Self::WindowsServer2008R2 => "Windows Server 2008 R2",
            Self::WindowsServer2012 => "Windows Server 2012",
            Self::WindowsServer2012R2 => "Windows Server 2012 R2",
            Self::WindowsServer2016 => "Windows Server 2016",
            Self::WindowsServer2019 => "Windows Server 2019",
            Self::WindowsServer2022 => "Windows Server 2022",
            Self::WindowsServer2025 => "Windows Server 2025",
            Self::Unknown => "Unknown",
        }
    }

    /// Map an image's build number to the release whose updates apply to it.
    ///
    /// Builds serviced through enablement packages (19041-19045, 22621/22631)
    /// map to the newest release of their family; see
    /// [`OsVersion::is_enablement_family`].
    #[must_use]
    pub fn from_build(build: u32, product: ProductKind) -> Option<Self> {
        match product {
            ProductKind::Server => match build {
                6001 => Some(Self::WindowsServer2008),
                7601 => Some(Self::WindowsServer2008R2),
                9200 => Some(Self::WindowsServer2012),
                9600 => Some(Self::WindowsServer2012R2),
                14393 => Some(Self::WindowsServer2016),
                17763 => Some(Self::WindowsServer2019),
                20348 => Some(Self::WindowsServer2022),
                26100 => Some(Self::WindowsServer2025),
                _ => None,
            },
            ProductKind::Client => match build {
                7601 => Some(Self::Windows7),
                9600 => Some(Self::Windows81),
                10240 => Some(Self::Windows10V1507),
                10586 => Some(Self::Windows10V1511),
                14393 => Some(Self::Windows10V1607),
                15063 => Some(Self::Windows10V1703),
                16299 => Some(Self::Windows10V1709),
                17134 => Some(Self::Windows10V1803),
                17763 => Some(Self::Windows10V1809),
                18362 => Some(Self::Windows10V1903),
                18363 => Some(Self::Windows10V1909),
                19041..=19045 => Some(Self::Windows10V22H2),
                22000 => Some(Self::Windows11V21H2),
                22621 | 22631 => Some(Self::Windows11V23H2),
                26100 => Some(Self::Windows11V24H2),
                _ => None,
            },
        }
    }

    #[must_use]
    pub fn is_enablement_family(build: u32) -> bool {
        matches!(build, 19041..=19045 | 22621 | 22631)
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for OsVersion {
    type Err = TargetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|version| version.slug().eq_ignore_ascii_case(needle))
            .ok_or_else(|| TargetParseError::UnknownOsVersion {
                input: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    X86,
    X64,
    Arm64,
    Unknown,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X86 => write!(f, "x86"),
            Self::X64 => write!(f, "x64"),
            Self::Arm64 => write!(f, "ARM64"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for Architecture {
    type Err = TargetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x86" | "i386" | "intel" => Ok(Self::X86),
            "x64" | "amd64" | "x86_64" => Ok(Self::X64),
            "arm64" | "aarch64" => Ok(Self::Arm64),
            _ => Err(TargetParseError::UnknownArchitecture {
                input: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductKind {
    Client,
    Server,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TargetParseError {
    #[error("Unknown OS version: {input}")]
    UnknownOsVersion { input: String },
    #[error("Unknown architecture: {input}")]
    UnknownArchitecture { input: String },
}

/// The (release, architecture) pair an image is serviced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target {
    pub os_version: OsVersion,
    pub architecture: Architecture,
}

impl Target {
    #[must_use]
    pub fn new(os_version: OsVersion, architecture: Architecture) -> Self {
        Self {
            os_version,
            architecture,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.os_version, self.architecture)
    }
}

/// Fields derived from an update's localized title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kb_number: String,
    pub os_version: Option<OsVersion>,
    pub architecture: Architecture,
}

/// One `<Update>` entry of the offline catalog manifest.
///
/// Manifest fields are fixed at construction; only the title-derived
/// classification is filled in afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRecord {
    revision_id: RevisionId,
    update_id: Option<String>,
    creation_date: Option<DateTime<Utc>>,
    superseded_by: Vec<String>,
    prerequisites: Vec<String>,
    classification: Option<Classification>,
}

impl UpdateRecord {
    #[must_use]
    pub fn new(revision_id: RevisionId, update_id: Option<String>) -> Self {
        Self {
            revision_id,
            update_id,
            creation_date: None,
            superseded_by: Vec::new(),
            prerequisites: Vec::new(),
            classification: None,
        }
    }

    #[must_use]
    pub fn with_creation_date(mut self, creation_date: Option<DateTime<Utc>>) -> Self {
        self.creation_date = creation_date;
        self
    }

    #[must_use]
    pub fn with_superseded_by(mut self, superseded_by: Vec<String>) -> Self {
        self.superseded_by = superseded_by;
        self
    }

    #[must_use]
    pub fn with_prerequisites(mut self, prerequisites: Vec<String>) -> Self {
        self.prerequisites = prerequisites;
        self
    }

    #[must_use]
    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classification = Some(classification);
        self
    }

    pub fn set_classification(&mut self, classification: Classification) {
        self.classification = Some(classification);
    }

    #[must_use]
    pub fn revision_id(&self) -> RevisionId {
        self.revision_id
    }

    #[must_use]
    pub fn update_id(&self) -> Option<&str> {
        self.update_id.as_deref()
    }

    #[must_use]
    pub fn creation_date(&self) -> Option<DateTime<Utc>> {
        self.creation_date
    }

    #[must_use]
    pub fn superseded_by(&self) -> &[String] {
        &self.superseded_by
    }

    #[must_use]
    pub fn prerequisites(&self) -> &[String] {
        &self.prerequisites
    }

    #[must_use]
    pub fn classification(&self) -> Option<&Classification> {
        self.classification.as_ref()
    }

    #[must_use]
    pub fn kb_number(&self) -> Option<&str> {
        self.classification
            .as_ref()
            .map(|c| c.kb_number.as_str())
            .filter(|kb| !kb.is_empty())
    }

    #[must_use]
    pub fn os_version(&self) -> Option<OsVersion> {
        self.classification.as_ref().and_then(|c| c.os_version)
    }

    #[must_use]
    pub fn architecture(&self) -> Option<Architecture> {
        self.classification.as_ref().map(|c| c.architecture)
    }

    /// A record takes part in resolution only once it has both a KB number
    /// and an OS version.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.kb_number().is_some() && self.os_version().is_some()
    }

    /// Superseding revision ids that parse as integers; other entries are ignored.
    pub fn superseding_revisions(&self) -> impl Iterator<Item = RevisionId> + '_ {
        self.superseded_by
            .iter()
            .filter_map(|id| id.trim().parse::<RevisionId>().ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadLink {
    pub update_id: String,
    pub url: String,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUpdate {
    pub revision_id: RevisionId,
    pub kb_number: String,
    pub update_id: Option<String>,
    pub cabinet: Option<String>,
}

/// What the user is asked to approve before any package is downloaded.
#[derive(Debug, Clone)]
pub struct ResolutionSummary {
    pub target: Target,
    pub updates: Vec<ResolvedUpdate>,
}

impl ResolutionSummary {
    #[must_use]
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

use std::sync::LazyLock;

use regex::Regex;
use wuintegrate_model::{Architecture, Classification, OsVersion};

static KB_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"KB\d{7}").expect("KB pattern should compile"));

/// Title fragments in match order: the first hit wins, so more specific
/// names come before the names they contain.
const OS_TITLE_PATTERNS: &[(&str, OsVersion)] = &[
    ("Windows Server 2008 R2", OsVersion::WindowsServer2008R2),
    ("Windows Server 2008", OsVersion::WindowsServer2008),
    ("Windows Server 2012 R2", OsVersion::WindowsServer2012R2),
    ("Windows Server 2012", OsVersion::WindowsServer2012),
    ("Windows Server 2016", OsVersion::WindowsServer2016),
    ("Windows Server 2019", OsVersion::WindowsServer2019),
    ("Windows Server 2022", OsVersion::WindowsServer2022),
    ("Windows Server 2025", OsVersion::WindowsServer2025),
    ("Windows 7", OsVersion::Windows7),
    ("Windows 8.1", OsVersion::Windows81),
    ("Windows 10 Version 1507", OsVersion::Windows10V1507),
    ("Windows 10 Version 1511", OsVersion::Windows10V1511),
    ("Windows 10 Version 1607", OsVersion::Windows10V1607),
    ("Windows 10 Version 1703", OsVersion::Windows10V1703),
    ("Windows 10 Version 1709", OsVersion::Windows10V1709),
    ("Windows 10 Version 1803", OsVersion::Windows10V1803),
    ("Windows 10 Version 1809", OsVersion::Windows10V1809),
    ("Windows 10 Version 1903", OsVersion::Windows10V1903),
    ("Windows 10 Version 1909", OsVersion::Windows10V1909),
    ("Windows 10 Version 2004", OsVersion::Windows10V2004),
    ("Windows 10 Version 20H2", OsVersion::Windows10V20H2),
    ("Windows 10 Version 21H1", OsVersion::Windows10V21H1),
    ("Windows 10 Version 21H2", OsVersion::Windows10V21H2),
    ("Windows 10 Version 22H2", OsVersion::Windows10V22H2),
    ("Windows 10", OsVersion::Windows10),
    ("Windows 11 Version 21H2", OsVersion::Windows11V21H2),
    ("Windows 11 Version 22H2", OsVersion::Windows11V22H2),
    ("Windows 11 Version 23H2", OsVersion::Windows11V23H2),
    ("Windows 11 Version 24H2", OsVersion::Windows11V24H2),
    ("Windows 11", OsVersion::Windows11),
];

const ARCH_TITLE_PATTERNS: &[(&str, Architecture)] = &[
    ("x64", Architecture::X64),
    ("x86", Architecture::X86),
    ("ARM64", Architecture::Arm64),
];

static OS_PATTERNS: LazyLock<Vec<(Regex, OsVersion)>> =
    LazyLock::new(|| compile_patterns(OS_TITLE_PATTERNS));

static ARCH_PATTERNS: LazyLock<Vec<(Regex, Architecture)>> =
    LazyLock::new(|| compile_patterns(ARCH_TITLE_PATTERNS));

fn compile_patterns<T: Copy>(patterns: &[(&str, T)]) -> Vec<(Regex, T)> {
    patterns
        .iter()
        .map(|(text, value)| {
            let regex = Regex::new(&regex::escape(text)).expect("escaped literal should compile");
            (regex, *value)
        })
        .collect()
}

/// Titles of this kind never describe a servicing package for the OS image.
#[must_use]
pub fn is_excluded_title(title: &str) -> bool {
    title == "Driver" || title.contains("Office") || title.contains("SQL")
}

#[must_use]
pub fn kb_number(title: &str) -> Option<&str> {
    KB_PATTERN.find(title).map(|found| found.as_str())
}

#[must_use]
pub fn os_version(title: &str) -> Option<OsVersion> {
    OS_PATTERNS
        .iter()
        .find(|(pattern, _)| pattern.is_match(title))
        .map(|(_, version)| *version)
}

/// Architecture named in the title, defaulting to x86 when none is.
#[must_use]
pub fn architecture(title: &str) -> Architecture {
    ARCH_PATTERNS
        .iter()
        .find(|(pattern, _)| pattern.is_match(title))
        .map_or(Architecture::X86, |(_, arch)| *arch)
}

/// Classify a localized update title.
///
/// Returns `None` for excluded titles and titles without a KB reference.
/// The OS version may still be missing; such records are pruned later.
#[must_use]
pub fn classify_title(title: &str) -> Option<Classification> {
    let title = title.trim();
    if is_excluded_title(title) {
        return None;
    }

    Some(Classification {
        kb_number: kb_number(title)?.to_string(),
        os_version: os_version(title),
        architecture: architecture(title),
    })
}

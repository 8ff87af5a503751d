use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use wuintegrate_core::{
    DEFAULT_CATALOG_ENDPOINT, DEFAULT_CATALOG_URL, DEFAULT_MAX_CONCURRENT_DOWNLOADS,
    DEFAULT_MAX_CONCURRENT_LOOKUPS, DEFAULT_RETRY_DELAYS_SECS, RetryPolicy,
};
use wuintegrate_platform::{AppPaths, ScratchLayout};

/// User settings read from `settings.json` in the config directory.
///
/// Every field has a default, so a partial file only overrides what it names.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,

    #[serde(default = "default_catalog_endpoint")]
    pub catalog_endpoint: String,

    #[serde(default = "default_locale")]
    pub locale: String,

    /// Scratch root; the system temporary directory when unset.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_retry_delays")]
    pub retry_delays_secs: Vec<u64>,

    #[serde(default = "default_max_concurrent_lookups")]
    pub max_concurrent_lookups: usize,

    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    #[serde(default)]
    pub keep_scratch: bool,

    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size")]
    pub max_log_size_bytes: u64,
}

fn default_catalog_url() -> String {
    DEFAULT_CATALOG_URL.to_string()
}

fn default_catalog_endpoint() -> String {
    DEFAULT_CATALOG_ENDPOINT.to_string()
}

fn default_locale() -> String {
    "en".to_string()
}

fn default_http_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_retry_delays() -> Vec<u64> {
    DEFAULT_RETRY_DELAYS_SECS.to_vec()
}

fn default_max_concurrent_lookups() -> usize {
    DEFAULT_MAX_CONCURRENT_LOOKUPS
}

fn default_max_concurrent_downloads() -> usize {
    DEFAULT_MAX_CONCURRENT_DOWNLOADS
}

fn default_max_log_size() -> u64 {
    5 * 1024 * 1024
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            catalog_url: default_catalog_url(),
            catalog_endpoint: default_catalog_endpoint(),
            locale: default_locale(),
            scratch_dir: None,
            http_timeout_secs: default_http_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            retry_delays_secs: default_retry_delays(),
            max_concurrent_lookups: default_max_concurrent_lookups(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            keep_scratch: false,
            debug_logging: false,
            max_log_size_bytes: default_max_log_size(),
        }
    }
}

impl Settings {
    pub fn load() -> Self {
        match AppPaths::new() {
            Ok(paths) => Self::load_from(&paths.settings_file()),
            Err(_) => Self::default(),
        }
    }

    /// Unreadable or invalid files fall back to the defaults.
    fn load_from(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    pub fn scratch_layout(&self, override_dir: Option<PathBuf>) -> ScratchLayout {
        match override_dir.or_else(|| self.scratch_dir.clone()) {
            Some(root) => ScratchLayout::new(root, self.locale.clone()),
            None => ScratchLayout::in_temp_dir(self.locale.clone()),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_secs(&self.retry_delays_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use serde_json::json;

    use super::Settings;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();

        assert_eq!(settings.locale, "en");
        assert_eq!(settings.http_timeout_secs, 30);
        assert_eq!(settings.connect_timeout_secs, 10);
        assert_eq!(settings.retry_delays_secs, vec![0, 2, 5, 10, 20]);
        assert_eq!(settings.max_concurrent_lookups, 4);
        assert_eq!(settings.max_concurrent_downloads, 4);
        assert_eq!(settings.max_log_size_bytes, 5 * 1024 * 1024);
        assert!(settings.scratch_dir.is_none());
        assert!(!settings.keep_scratch);
        assert!(settings.catalog_url.ends_with("wsusscn2.cab"));
    }

    #[test]
    fn partial_json_keeps_defaults_for_missing_fields() {
        let value = json!({
            "locale": "de",
            "retry_delays_secs": [1, 1],
            "keep_scratch": true
        });

        let settings: Settings =
            serde_json::from_value(value).expect("settings JSON should deserialize");

        assert_eq!(settings.locale, "de");
        assert_eq!(settings.retry_delays_secs, vec![1, 1]);
        assert!(settings.keep_scratch);
        assert_eq!(settings.http_timeout_secs, 30);
        assert_eq!(settings.max_concurrent_downloads, 4);
        assert_eq!(settings.retry_policy().attempts(), 2);
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("settings.json");
        std::fs::write(&path, "{ not json").expect("settings file should be written");

        let settings = Settings::load_from(&path);

        assert_eq!(settings.locale, "en");
        assert_eq!(settings.max_concurrent_lookups, 4);
    }

    #[test]
    fn settings_file_overrides_named_fields() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("settings.json");
        let content = json!({
            "catalog_url": "http://mirror.local/wsusscn2.cab",
            "scratch_dir": "/var/tmp/wui",
            "max_concurrent_lookups": 8,
            "debug_logging": true
        });
        std::fs::write(&path, content.to_string()).expect("settings file should be written");

        let settings = Settings::load_from(&path);

        assert_eq!(settings.catalog_url, "http://mirror.local/wsusscn2.cab");
        assert_eq!(settings.scratch_dir.as_deref(), Some(Path::new("/var/tmp/wui")));
        assert_eq!(settings.max_concurrent_lookups, 8);
        assert!(settings.debug_logging);
        assert_eq!(settings.locale, "en");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = Settings::load_from(Path::new("/nonexistent/wuintegrate/settings.json"));

        assert_eq!(settings.retry_delays_secs, vec![0, 2, 5, 10, 20]);
    }

    #[test]
    fn scratch_override_wins_over_settings() {
        let settings = Settings {
            scratch_dir: Some("/from/settings".into()),
            locale: "fr".to_string(),
            ..Settings::default()
        };

        let overridden = settings.scratch_layout(Some("/from/cli".into()));
        let configured = settings.scratch_layout(None);

        assert_eq!(overridden.root(), Path::new("/from/cli"));
        assert_eq!(configured.root(), Path::new("/from/settings"));
        assert_eq!(configured.locale(), "fr");
    }
}

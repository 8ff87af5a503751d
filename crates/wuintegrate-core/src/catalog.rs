use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use log::{debug, info};
use regex::Regex;
use tokio_util::sync::CancellationToken;
use wuintegrate_model::{CatalogError, CatalogSource, DownloadLink};

use crate::retry::RetryPolicy;

pub const DEFAULT_CATALOG_ENDPOINT: &str =
    "https://www.catalog.update.microsoft.com/DownloadDialog.aspx";

static DOWNLOAD_URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"https?://(?:dl\.delivery\.mp\.microsoft\.com|(?:catalog\.s\.)?download\.windowsupdate\.com)/[^'"]*"#,
    )
    .expect("download URL pattern should compile")
});

/// Form body asking the download dialog for one update's files.
#[must_use]
pub fn request_body(update_id: &str) -> String {
    let id = serde_json::Value::String(update_id.to_string());
    format!(r#"updateIDs=[{{"size":0,"updateID":{id},"uidInfo":{id}}}]"#)
}

/// Pull every distinct package URL out of a download dialog page, in the
/// order they first appear.
#[must_use]
pub fn scrape_download_links(update_id: &str, body: &str) -> Vec<DownloadLink> {
    let normalized = body.replace("www.download.windowsupdate", "download.windowsupdate");
    let mut seen = HashSet::new();

    DOWNLOAD_URL_PATTERN
        .find_iter(&normalized)
        .map(|found| found.as_str())
        .filter(|url| seen.insert(*url))
        .map(|url| DownloadLink {
            update_id: update_id.to_string(),
            url: url.to_string(),
            file_name: file_name_from_url(url),
        })
        .collect()
}

fn file_name_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty() && name != "." && name != "..")
        .unwrap_or_else(|| format!("update_{}.cab", uuid::Uuid::new_v4()))
}

/// Looks up package URLs on the public update catalog.
#[derive(Debug, Clone)]
pub struct UpdateCatalogClient {
    client: reqwest::Client,
    endpoint: String,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl UpdateCatalogClient {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            retry,
            cancel,
        }
    }

    async fn fetch_dialog(&self, update_id: &str) -> Result<String, CatalogError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(CatalogError::Cancelled {
                update_id: update_id.to_string(),
            }),
            result = self.post_dialog(update_id) => result,
        }
    }

    async fn post_dialog(&self, update_id: &str) -> Result<String, CatalogError> {
        let request_error = |source| CatalogError::Request {
            update_id: update_id.to_string(),
            source,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(request_body(update_id))
            .send()
            .await
            .map_err(request_error)?;

        if !response.status().is_success() {
            return Err(CatalogError::Status {
                update_id: update_id.to_string(),
                status: response.status(),
            });
        }

        response.text().await.map_err(request_error)
    }
}

#[async_trait]
impl CatalogSource for UpdateCatalogClient {
    async fn lookup(&self, update_id: &str) -> Result<Vec<DownloadLink>, CatalogError> {
        debug!("Getting download links for {update_id}");
        let this = self;
        let body = self
            .retry
            .run(&self.cancel, move |_| this.fetch_dialog(update_id))
            .await?;

        let links = scrape_download_links(update_id, &body);
        if links.is_empty() {
            info!("No download links found for {update_id}");
        }
        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::{file_name_from_url, request_body, scrape_download_links};

    const DIALOG: &str = r"
        downloadInformation[0].files[0].url = 'http://www.download.windowsupdate.com/c/msdownload/update/software/secu/2024/01/windows10.0-kb5034122-x64_abc.cab';
        downloadInformation[0].files[1].url = 'https://catalog.s.download.windowsupdate.com/d/msdownload/update/software/updt/2024/01/windows10.0-kb5034122-x64_def.msu';
        downloadInformation[0].files[2].url = 'https://dl.delivery.mp.microsoft.com/filestreamingservice/files/0123/ssu.cab';
        downloadInformation[0].files[3].url = 'http://download.windowsupdate.com/c/msdownload/update/software/secu/2024/01/windows10.0-kb5034122-x64_abc.cab';
        var other = 'https://example.com/not-a-package.cab';
    ";

    #[test]
    fn request_body_keeps_field_order() {
        assert_eq!(
            request_body("0f3d0a3c-4ad4-4c5a-a3b2-2b8d5b5c1f00"),
            r#"updateIDs=[{"size":0,"updateID":"0f3d0a3c-4ad4-4c5a-a3b2-2b8d5b5c1f00","uidInfo":"0f3d0a3c-4ad4-4c5a-a3b2-2b8d5b5c1f00"}]"#
        );
    }

    #[test]
    fn request_body_escapes_the_update_id() {
        let body = request_body("a\"b\\c");
        let json = body
            .strip_prefix("updateIDs=")
            .expect("body should start with the form field");

        let parsed: serde_json::Value = serde_json::from_str(json).expect("body should be JSON");
        assert_eq!(parsed[0]["updateID"], "a\"b\\c");
        assert_eq!(parsed[0]["uidInfo"], "a\"b\\c");
        assert_eq!(parsed[0]["size"], 0);
    }

    #[test]
    fn links_are_normalized_and_deduplicated_in_order() {
        let links = scrape_download_links("id", DIALOG);

        let urls: Vec<&str> = links.iter().map(|link| link.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "http://download.windowsupdate.com/c/msdownload/update/software/secu/2024/01/windows10.0-kb5034122-x64_abc.cab",
                "https://catalog.s.download.windowsupdate.com/d/msdownload/update/software/updt/2024/01/windows10.0-kb5034122-x64_def.msu",
                "https://dl.delivery.mp.microsoft.com/filestreamingservice/files/0123/ssu.cab",
            ]
        );
        assert_eq!(links[0].file_name, "windows10.0-kb5034122-x64_abc.cab");
        assert!(links.iter().all(|link| link.update_id == "id"));
    }

    #[test]
    fn page_without_packages_yields_no_links() {
        assert!(scrape_download_links("id", "<html>No files</html>").is_empty());
    }

    #[test]
    fn file_name_falls_back_to_generated_cab_name() {
        let name = file_name_from_url("https://download.windowsupdate.com/");

        assert!(name.starts_with("update_"));
        assert!(
            std::path::Path::new(&name)
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("cab"))
        );
    }
}

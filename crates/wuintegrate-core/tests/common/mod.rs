#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Cursor, Write as _};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wuintegrate_core::{RetryPolicy, RunContext, http_client};
use wuintegrate_model::{
    CatalogError, CatalogSource, Confirmation, DownloadLink, ResolutionSummary,
};
use wuintegrate_platform::ScratchLayout;

pub const UPDATE_ID: &str = "8f2a7c5e-1b3d-4e6f-9a0b-c1d2e3f4a5b6";
pub const PACKAGE_NAME: &str = "windows10.0-kb5034441-x64_abc123.cab";

/// Build a cabinet in memory. Entries keep their order.
pub fn cab_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = cab::CabinetBuilder::new();
    {
        let folder = builder.add_folder(cab::CompressionType::MsZip);
        for (name, _) in entries {
            folder.add_file(*name);
        }
    }
    let mut cab_writer = builder
        .build(Cursor::new(Vec::new()))
        .expect("cab should start");
    let mut data = entries.iter().map(|(_, data)| *data);
    while let Some(mut file_writer) = cab_writer.next_file().expect("next cab file") {
        let bytes = data.next().expect("an entry for every cab file");
        file_writer
            .write_all(bytes)
            .expect("cab entry should be written");
    }
    cab_writer
        .finish()
        .expect("cab should be finalized")
        .into_inner()
}

fn localized(title: &str) -> Vec<u8> {
    format!(
        "<LocalizedProperties><Language>en</Language><Title>{title}</Title>\
         <Description>A security issue has been identified.</Description></LocalizedProperties>"
    )
    .into_bytes()
}

/// Manifest used by the end-to-end scenarios.
///
/// For Windows 10 22H2 x64 the expected resolution is revisions 101 and
/// 102; 100 is superseded by 101 and the rest belong to other targets.
pub fn manifest() -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<OfflineSyncPackage xmlns="http://schemas.microsoft.com/msus/2004/02/OfflineSync">
  <Updates>
    <Update CreationDate="2023-12-12T18:00:00Z" UpdateId="aaaaaaaa-0000-0000-0000-000000000100" RevisionId="100">
      <SupersededBy><Revision Id="101" /></SupersededBy>
    </Update>
    <Update CreationDate="2024-01-09T18:00:00Z" UpdateId="{UPDATE_ID}" RevisionId="101" />
    <Update CreationDate="2024-01-09T18:00:00Z" RevisionId="102" />
    <Update UpdateId="aaaaaaaa-0000-0000-0000-000000000103" RevisionId="103" />
    <Update UpdateId="aaaaaaaa-0000-0000-0000-000000000104" RevisionId="104" />
    <Update UpdateId="aaaaaaaa-0000-0000-0000-000000000105" RevisionId="105" />
  </Updates>
</OfflineSyncPackage>"#
    )
}

const INDEX: &str = r#"<CABINDEX><CABLIST>
<CAB NAME="package.cab" RANGESTART="0" />
<CAB NAME="package2.cab" RANGESTART="101" />
</CABLIST></CABINDEX>"#;

/// Write a complete offline catalog archive where the layout expects it.
pub fn write_catalog(layout: &ScratchLayout) {
    let manifest = manifest();
    let package = cab_bytes(&[("package.xml", manifest.as_bytes())]);

    let titles = [
        ("l\\en\\100", localized("2023-12 Cumulative Update for Windows 10 Version 22H2 for x64-based Systems (KB5033372)")),
        ("l\\en\\101", localized("2024-01 Cumulative Update for Windows 10 Version 22H2 for x64-based Systems (KB5034441)")),
        ("l\\en\\102", localized("2024-01 Servicing Stack Update for Windows 10 Version 22H2 for x64-based Systems (KB5034442)")),
        ("l\\en\\103", localized("2024-01 Cumulative Update for Windows 11 Version 23H2 for x64-based Systems (KB5034123)")),
        ("l\\en\\104", localized("2024-01 Cumulative Update for Windows 10 Version 22H2 for x86-based Systems (KB5034443)")),
        ("l\\en\\105", localized("Security Update for Microsoft Office 2016 (KB5002140)")),
        ("l\\de\\101", localized("Kumulatives Update für Windows 10 Version 22H2 (KB5034441)")),
        ("x\\101", b"<Extended/>".to_vec()),
    ];
    let title_entries: Vec<(&str, &[u8])> = titles
        .iter()
        .map(|(name, data)| (*name, data.as_slice()))
        .collect();
    let localizations = cab_bytes(&title_entries);

    let archive = cab_bytes(&[
        ("index.xml", INDEX.as_bytes()),
        ("package.cab", package.as_slice()),
        ("package2.cab", localizations.as_slice()),
    ]);

    layout.ensure_dirs().expect("scratch dirs should be created");
    std::fs::write(layout.catalog_archive(), archive).expect("catalog archive should be written");
}

/// Context for tests: no delays between attempts and a closed port as the
/// catalog URL so an unexpected fetch fails fast.
pub fn test_context(layout: ScratchLayout) -> RunContext {
    let client = http_client(Duration::from_secs(5), Duration::from_secs(1))
        .expect("client should build");
    let mut context = RunContext::new(layout, client);
    context.catalog_url = "http://127.0.0.1:1/wsusscn2.cab".to_string();
    context.retry = RetryPolicy::immediate(2);
    context
}

/// Catalog source answering from a fixed table and recording every lookup.
#[derive(Default)]
pub struct FakeCatalog {
    links: HashMap<String, Vec<DownloadLink>>,
    requested: Mutex<Vec<String>>,
    failing: bool,
}

impl FakeCatalog {
    pub fn with_link(mut self, update_id: &str, url: &str, file_name: &str) -> Self {
        self.links
            .entry(update_id.to_string())
            .or_default()
            .push(DownloadLink {
                update_id: update_id.to_string(),
                url: url.to_string(),
                file_name: file_name.to_string(),
            });
        self
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().expect("lock should not be poisoned").clone()
    }
}

#[async_trait]
impl CatalogSource for FakeCatalog {
    async fn lookup(&self, update_id: &str) -> Result<Vec<DownloadLink>, CatalogError> {
        self.requested
            .lock()
            .expect("lock should not be poisoned")
            .push(update_id.to_string());
        if self.failing {
            return Err(CatalogError::Status {
                update_id: update_id.to_string(),
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            });
        }
        Ok(self.links.get(update_id).cloned().unwrap_or_default())
    }
}

/// Confirmation that answers a fixed value and keeps the last summary.
pub struct Answer {
    approve: bool,
    seen: Mutex<Option<ResolutionSummary>>,
}

impl Answer {
    pub fn approve() -> Self {
        Self {
            approve: true,
            seen: Mutex::new(None),
        }
    }

    pub fn decline() -> Self {
        Self {
            approve: false,
            seen: Mutex::new(None),
        }
    }

    pub fn summary(&self) -> Option<ResolutionSummary> {
        self.seen.lock().expect("lock should not be poisoned").clone()
    }
}

#[async_trait]
impl Confirmation for Answer {
    async fn confirm(&self, summary: &ResolutionSummary) -> bool {
        *self.seen.lock().expect("lock should not be poisoned") = Some(summary.clone());
        self.approve
    }
}

/// Minimal HTTP/1.1 server answering successive connections with the given
/// status and body pairs. Returns the base URL and a request counter.
pub async fn serve(responses: Vec<(u16, Vec<u8>)>) -> (String, std::sync::Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let address = listener.local_addr().expect("listener should have an address");
    let served = std::sync::Arc::new(AtomicUsize::new(0));
    let counter = served.clone();

    tokio::spawn(async move {
        for (status, body) in responses {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut request = Vec::new();
            let mut buffer = [0u8; 1024];
            while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                match socket.read(&mut buffer).await {
                    Ok(0) | Err(_) => break,
                    Ok(read) => request.extend_from_slice(&buffer[..read]),
                }
            }
            counter.fetch_add(1, Ordering::SeqCst);
            let reason = if status == 200 { "OK" } else { "Error" };
            let head = format!(
                "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(&body).await;
            let _ = socket.shutdown().await;
        }
    });

    (format!("http://{address}"), served)
}

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::serve;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wuintegrate_core::{DownloadError, DownloadOutcome, Downloader, RetryPolicy, http_client};

fn downloader(attempts: usize) -> Downloader {
    let client =
        http_client(Duration::from_secs(5), Duration::from_secs(1)).expect("client should build");
    Downloader::new(
        client,
        RetryPolicy::immediate(attempts),
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn transient_server_error_is_retried() {
    let (base_url, served) = serve(vec![
        (500, b"busy".to_vec()),
        (200, b"cabinet-data".to_vec()),
    ])
    .await;
    let temp = tempfile::tempdir().expect("tempdir should be created");
    let dest = temp.path().join("kb5034441.cab");
    let (sender, mut receiver) = mpsc::channel(64);

    let outcome = downloader(5)
        .with_progress(Some(sender))
        .download(&format!("{base_url}/kb5034441.cab"), &dest)
        .await
        .expect("second attempt should succeed");

    assert_eq!(outcome, DownloadOutcome::Fetched { bytes: 12 });
    assert_eq!(served.load(Ordering::SeqCst), 2);
    assert_eq!(
        std::fs::read(&dest).expect("download should exist"),
        b"cabinet-data"
    );

    let mut last = None;
    while let Ok(progress) = receiver.try_recv() {
        last = Some(progress);
    }
    let last = last.expect("progress should be reported");
    assert_eq!(last.file_name, "kb5034441.cab");
    assert_eq!(last.total, Some(12));
    assert_eq!(last.fraction(), Some(1.0));
}

#[tokio::test]
async fn exhausted_attempts_leave_no_partial_file() {
    let (base_url, served) = serve(vec![
        (503, b"unavailable".to_vec()),
        (503, b"unavailable".to_vec()),
        (503, b"unavailable".to_vec()),
    ])
    .await;
    let temp = tempfile::tempdir().expect("tempdir should be created");
    let dest = temp.path().join("kb5034442.cab");

    let result = downloader(3)
        .download(&format!("{base_url}/kb5034442.cab"), &dest)
        .await;

    assert!(matches!(
        result,
        Err(DownloadError::Status { status, .. }) if status == reqwest::StatusCode::SERVICE_UNAVAILABLE
    ));
    assert_eq!(served.load(Ordering::SeqCst), 3);
    assert!(!dest.exists());
}

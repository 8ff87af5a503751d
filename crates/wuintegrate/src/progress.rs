use std::collections::HashMap;

use log::info;
use tokio::sync::mpsc;
use wuintegrate_core::DownloadProgress;

/// Remembers the last 10% step reported for every file.
#[derive(Debug, Default)]
struct ProgressSteps {
    reported: HashMap<String, u8>,
}

impl ProgressSteps {
    /// The percentage to report when `progress` reaches a new 10% step.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn advance(&mut self, progress: &DownloadProgress) -> Option<u8> {
        let fraction = progress.fraction()?;
        let step = (fraction.clamp(0.0, 1.0) * 10.0).floor() as u8;
        let last = self.reported.entry(progress.file_name.clone()).or_insert(0);
        if step > *last {
            *last = step;
            Some(step * 10)
        } else {
            None
        }
    }
}

/// Drain download progress until every sender is gone.
pub async fn log_progress(mut receiver: mpsc::Receiver<DownloadProgress>) {
    let mut steps = ProgressSteps::default();
    while let Some(progress) = receiver.recv().await {
        if let Some(percent) = steps.advance(&progress) {
            info!("{}: {percent}%", progress.file_name);
        }
    }
}

#[cfg(test)]
mod tests {
    use wuintegrate_core::DownloadProgress;

    use super::ProgressSteps;

    fn at(file_name: &str, downloaded: u64, total: Option<u64>) -> DownloadProgress {
        DownloadProgress {
            file_name: file_name.to_string(),
            downloaded,
            total,
        }
    }

    #[test]
    fn each_step_is_reported_once() {
        let mut steps = ProgressSteps::default();

        assert_eq!(steps.advance(&at("a.cab", 5, Some(100))), None);
        assert_eq!(steps.advance(&at("a.cab", 12, Some(100))), Some(10));
        assert_eq!(steps.advance(&at("a.cab", 19, Some(100))), None);
        assert_eq!(steps.advance(&at("a.cab", 47, Some(100))), Some(40));
        assert_eq!(steps.advance(&at("a.cab", 100, Some(100))), Some(100));
        assert_eq!(steps.advance(&at("a.cab", 100, Some(100))), None);
    }

    #[test]
    fn files_are_tracked_separately() {
        let mut steps = ProgressSteps::default();

        assert_eq!(steps.advance(&at("a.cab", 50, Some(100))), Some(50));
        assert_eq!(steps.advance(&at("b.cab", 20, Some(100))), Some(20));
        assert_eq!(steps.advance(&at("a.cab", 60, Some(100))), Some(60));
    }

    #[test]
    fn unknown_total_is_not_reported() {
        let mut steps = ProgressSteps::default();

        assert_eq!(steps.advance(&at("a.cab", 4096, None)), None);
    }
}

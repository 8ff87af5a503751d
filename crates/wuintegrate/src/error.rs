use thiserror::Error;
use wuintegrate_core::{DownloadError, PipelineError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Either --os or --build must name the target release")]
    MissingTarget,

    #[error("Build {build} is not a known {product} build; use --os instead")]
    UnknownBuild { build: u32, product: &'static str },

    #[error(transparent)]
    Client(#[from] DownloadError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl AppError {
    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}

/// `error`, followed by every `caused by:` in its source chain.
pub fn report(error: &dyn std::error::Error) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !text.ends_with(&cause_text) {
            text.push_str("\n  caused by: ");
            text.push_str(&cause_text);
        }
        source = cause.source();
    }
    text
}

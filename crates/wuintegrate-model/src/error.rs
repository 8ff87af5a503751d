use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog request for {update_id} failed: {source}")]
    Request {
        update_id: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Catalog request for {update_id} returned HTTP {status}")]
    Status {
        update_id: String,
        status: reqwest::StatusCode,
    },

    #[error("Catalog lookup for {update_id} was cancelled")]
    Cancelled { update_id: String },
}

impl CatalogError {
    #[must_use]
    pub fn update_id(&self) -> &str {
        match self {
            Self::Request { update_id, .. }
            | Self::Status { update_id, .. }
            | Self::Cancelled { update_id } => update_id,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServicingError {
    #[error("Failed to mount {image} (index {index}): {details}")]
    Mount {
        image: String,
        index: u32,
        details: String,
    },

    #[error("Failed to add package {package}: {details}")]
    AddPackage { package: String, details: String },

    #[error("Failed to {operation} image: {details}")]
    Unmount {
        operation: &'static str,
        details: String,
    },

    #[error("IO error ({kind}): {message}")]
    IoError {
        kind: std::io::ErrorKind,
        message: String,
    },
}

impl ServicingError {
    pub fn add_package(package: &std::path::Path, details: impl Into<String>) -> Self {
        Self::AddPackage {
            package: package.display().to_string(),
            details: details.into(),
        }
    }

    pub fn commit(details: impl Into<String>) -> Self {
        Self::Unmount {
            operation: "commit",
            details: details.into(),
        }
    }

    pub fn discard(details: impl Into<String>) -> Self {
        Self::Unmount {
            operation: "discard",
            details: details.into(),
        }
    }
}

impl From<std::io::Error> for ServicingError {
    fn from(err: std::io::Error) -> Self {
        ServicingError::IoError {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

mod error;
mod traits;
mod types;

pub use error::{CatalogError, ServicingError};
pub use traits::{AutoApprove, CatalogSource, Confirmation, ImageServicing};
pub use types::{
    Architecture, Classification, DownloadLink, OsVersion, ProductKind, ResolutionSummary,
    ResolvedUpdate, RevisionId, Target, TargetParseError, UpdateRecord,
};

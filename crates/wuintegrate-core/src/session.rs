use std::path::{Path, PathBuf};

use log::{info, warn};
use wuintegrate_model::{CatalogSource, Confirmation, ImageServicing, ServicingError, Target};

use crate::pipeline::{Pipeline, PipelineError, RunOutcome};

/// One image inside a Windows image file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSelection {
    pub image: PathBuf,
    pub index: u32,
}

#[derive(Debug)]
pub struct ServicingReport {
    pub outcome: RunOutcome,
    pub integrated: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, ServicingError)>,
}

/// Mount `selection`, bring its updates up to date and commit the result.
///
/// Packages that were added are deleted from the downloads directory; a
/// package that cannot be added is logged and kept. If anything fatal
/// happens after mounting, the image is discarded exactly once before the
/// error is returned.
///
/// # Errors
/// Returns an error if mounting, the pipeline, listing the downloads, or
/// committing fails.
pub async fn service_image<C, S>(
    pipeline: &mut Pipeline<C>,
    servicing: &mut S,
    selection: &ImageSelection,
    target: Target,
    confirmation: &dyn Confirmation,
) -> Result<ServicingReport, PipelineError>
where
    C: CatalogSource,
    S: ImageServicing,
{
    info!(
        "Mounting {} (index {})",
        selection.image.display(),
        selection.index
    );
    let handle = servicing.mount(&selection.image, selection.index)?;

    let result = async {
        let outcome = pipeline.run(target, confirmation).await?;
        if !outcome.ready_to_integrate {
            return Ok((outcome, Vec::new(), Vec::new()));
        }
        let downloads_dir = pipeline.context().layout.downloads_dir();
        let (integrated, failed) = integrate_packages(servicing, &handle, &downloads_dir)?;
        Ok::<_, PipelineError>((outcome, integrated, failed))
    }
    .await;

    match result {
        Ok((outcome, integrated, failed)) => {
            servicing.commit(handle)?;
            info!(
                "Committed {} with {} packages added",
                selection.image.display(),
                integrated.len()
            );
            Ok(ServicingReport {
                outcome,
                integrated,
                failed,
            })
        }
        Err(err) => {
            if let Err(discard_err) = servicing.discard(handle) {
                warn!("Failed to discard {}: {discard_err}", selection.image.display());
            }
            Err(err)
        }
    }
}

type Integration = (Vec<PathBuf>, Vec<(PathBuf, ServicingError)>);

fn integrate_packages<S: ImageServicing>(
    servicing: &mut S,
    handle: &S::Handle,
    downloads_dir: &Path,
) -> Result<Integration, PipelineError> {
    let mut packages: Vec<PathBuf> = std::fs::read_dir(downloads_dir)
        .map_err(|source| PipelineError::Io {
            context: "failed to list downloaded packages",
            source,
        })?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    packages.sort();

    let mut integrated = Vec::new();
    let mut failed = Vec::new();
    for package in packages {
        info!("Adding {}", package.display());
        match servicing.add_package(handle, &package) {
            Ok(()) => {
                if let Err(err) = std::fs::remove_file(&package) {
                    warn!("Failed to delete {}: {err}", package.display());
                }
                integrated.push(package);
            }
            Err(err) => {
                warn!("{err}");
                failed.push((package, err));
            }
        }
    }

    Ok((integrated, failed))
}

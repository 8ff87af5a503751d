mod common;

use std::path::{Path, PathBuf};

use common::{Answer, FakeCatalog, PACKAGE_NAME, UPDATE_ID, test_context, write_catalog};
use wuintegrate_core::{ImageSelection, Pipeline, PipelineError, service_image};
use wuintegrate_model::{Architecture, ImageServicing, OsVersion, ServicingError, Target};
use wuintegrate_platform::ScratchLayout;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Mount(u32),
    Add(String),
    Commit,
    Discard,
}

#[derive(Default)]
struct RecordingServicing {
    calls: Vec<Call>,
    fail_mount: bool,
    reject: Option<String>,
}

impl ImageServicing for RecordingServicing {
    type Handle = u32;

    fn mount(&mut self, image: &Path, index: u32) -> Result<u32, ServicingError> {
        if self.fail_mount {
            return Err(ServicingError::Mount {
                image: image.display().to_string(),
                index,
                details: "access denied".to_string(),
            });
        }
        self.calls.push(Call::Mount(index));
        Ok(index)
    }

    fn add_package(&mut self, _handle: &u32, package: &Path) -> Result<(), ServicingError> {
        let name = package
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.calls.push(Call::Add(name.clone()));
        if self.reject.as_deref() == Some(name.as_str()) {
            return Err(ServicingError::add_package(package, "0x800f081e"));
        }
        Ok(())
    }

    fn commit(&mut self, _handle: u32) -> Result<(), ServicingError> {
        self.calls.push(Call::Commit);
        Ok(())
    }

    fn discard(&mut self, _handle: u32) -> Result<(), ServicingError> {
        self.calls.push(Call::Discard);
        Ok(())
    }
}

fn target() -> Target {
    Target::new(OsVersion::Windows10V22H2, Architecture::X64)
}

fn selection(root: &Path) -> ImageSelection {
    ImageSelection {
        image: root.join("install.wim"),
        index: 3,
    }
}

/// Catalog whose only package is already on disk, so no transfer happens.
fn seeded(layout: &ScratchLayout) -> (FakeCatalog, PathBuf) {
    write_catalog(layout);
    let package = layout.downloads_dir().join(PACKAGE_NAME);
    std::fs::write(&package, b"package").expect("package should be seeded");
    let catalog = FakeCatalog::default().with_link(
        UPDATE_ID,
        &format!("http://127.0.0.1:1/{PACKAGE_NAME}"),
        PACKAGE_NAME,
    );
    (catalog, package)
}

#[tokio::test]
async fn packages_are_added_deleted_and_committed() {
    let temp = tempfile::tempdir().expect("tempdir should be created");
    let layout = ScratchLayout::new(temp.path().join("run"), "en");
    let (catalog, package) = seeded(&layout);
    let mut pipeline = Pipeline::new(test_context(layout), catalog);
    let mut servicing = RecordingServicing::default();

    let report = service_image(
        &mut pipeline,
        &mut servicing,
        &selection(temp.path()),
        target(),
        &Answer::approve(),
    )
    .await
    .expect("servicing should succeed");

    assert_eq!(
        servicing.calls,
        vec![Call::Mount(3), Call::Add(PACKAGE_NAME.to_string()), Call::Commit]
    );
    assert_eq!(report.integrated, vec![package.clone()]);
    assert!(report.failed.is_empty());
    assert!(!package.exists());
}

#[tokio::test]
async fn rejected_package_is_kept_and_the_image_still_committed() {
    let temp = tempfile::tempdir().expect("tempdir should be created");
    let layout = ScratchLayout::new(temp.path().join("run"), "en");
    let (catalog, package) = seeded(&layout);
    let mut pipeline = Pipeline::new(test_context(layout), catalog);
    let mut servicing = RecordingServicing {
        reject: Some(PACKAGE_NAME.to_string()),
        ..RecordingServicing::default()
    };

    let report = service_image(
        &mut pipeline,
        &mut servicing,
        &selection(temp.path()),
        target(),
        &Answer::approve(),
    )
    .await
    .expect("servicing should succeed");

    assert_eq!(servicing.calls.last(), Some(&Call::Commit));
    assert!(report.integrated.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert!(package.exists());
}

#[tokio::test]
async fn pipeline_failure_discards_the_image_once() {
    let temp = tempfile::tempdir().expect("tempdir should be created");
    let layout = ScratchLayout::new(temp.path().join("run"), "en");
    write_catalog(&layout);
    let mut pipeline = Pipeline::new(test_context(layout), FakeCatalog::failing());
    let mut servicing = RecordingServicing::default();

    let result = service_image(
        &mut pipeline,
        &mut servicing,
        &selection(temp.path()),
        target(),
        &Answer::approve(),
    )
    .await;

    assert!(matches!(result, Err(PipelineError::Catalog(_))));
    assert_eq!(servicing.calls, vec![Call::Mount(3), Call::Discard]);
}

#[tokio::test]
async fn mount_failure_touches_nothing_else() {
    let temp = tempfile::tempdir().expect("tempdir should be created");
    let layout = ScratchLayout::new(temp.path().join("run"), "en");
    let mut pipeline = Pipeline::new(test_context(layout), FakeCatalog::default());
    let mut servicing = RecordingServicing {
        fail_mount: true,
        ..RecordingServicing::default()
    };

    let result = service_image(
        &mut pipeline,
        &mut servicing,
        &selection(temp.path()),
        target(),
        &Answer::approve(),
    )
    .await;

    assert!(matches!(
        result,
        Err(PipelineError::Servicing(ServicingError::Mount { index: 3, .. }))
    ));
    assert!(servicing.calls.is_empty());
}

#[tokio::test]
async fn declined_run_commits_without_adding_packages() {
    let temp = tempfile::tempdir().expect("tempdir should be created");
    let layout = ScratchLayout::new(temp.path().join("run"), "en");
    let (catalog, package) = seeded(&layout);
    let mut pipeline = Pipeline::new(test_context(layout), catalog);
    let mut servicing = RecordingServicing::default();

    let report = service_image(
        &mut pipeline,
        &mut servicing,
        &selection(temp.path()),
        target(),
        &Answer::decline(),
    )
    .await
    .expect("declined servicing should succeed");

    assert!(!report.outcome.ready_to_integrate);
    assert_eq!(servicing.calls, vec![Call::Mount(3), Call::Commit]);
    assert!(package.exists());
}

mod confirm;
mod error;
mod logging;
mod progress;
mod settings;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info, warn};
use tokio::sync::mpsc;
use wuintegrate_core::{Pipeline, RunContext, UpdateCatalogClient, http_client};
use wuintegrate_model::{Architecture, AutoApprove, OsVersion, ProductKind, Target};

use crate::confirm::ConsolePrompt;
use crate::error::{AppError, report};
use crate::settings::Settings;

/// Resolve and download the latest updates for an offline Windows image.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Target release, e.g. `windows10-22h2` or `server2022`.
    #[arg(long, value_name = "SLUG", conflicts_with = "build")]
    os: Option<OsVersion>,

    /// Target by the image's build number instead of a release name.
    #[arg(long, value_name = "NUMBER")]
    build: Option<u32>,

    /// Treat `--build` as a server build.
    #[arg(long, requires = "build")]
    server: bool,

    #[arg(long, value_name = "x86|x64|arm64", default_value = "x64")]
    arch: Architecture,

    /// Scratch directory for the catalog and downloaded packages.
    #[arg(long, value_name = "DIR")]
    scratch: Option<PathBuf>,

    #[arg(long, value_name = "URL")]
    catalog_url: Option<String>,

    /// Download without asking for confirmation.
    #[arg(short, long)]
    yes: bool,

    /// Keep the extracted catalog after the run.
    #[arg(long)]
    keep_scratch: bool,

    #[arg(long)]
    debug: bool,

    /// Print the accepted release names and exit.
    #[arg(long)]
    list_versions: bool,
}

impl Cli {
    fn target(&self) -> Result<Target, AppError> {
        let os_version = match (self.os, self.build) {
            (Some(os_version), _) => os_version,
            (None, Some(build)) => {
                let product = if self.server {
                    ProductKind::Server
                } else {
                    ProductKind::Client
                };
                let os_version = OsVersion::from_build(build, product).ok_or(
                    AppError::UnknownBuild {
                        build,
                        product: if self.server { "server" } else { "client" },
                    },
                )?;
                if OsVersion::is_enablement_family(build) {
                    warn!(
                        "Build {build} is serviced through enablement packages; using updates for {os_version}"
                    );
                }
                os_version
            }
            (None, None) => return Err(AppError::MissingTarget),
        };
        Ok(Target::new(os_version, self.arch))
    }
}

fn print_versions() {
    for version in OsVersion::ALL {
        println!("{:<16} {}", version.slug(), version.display_name());
    }
}

async fn run(cli: &Cli, settings: &Settings) -> Result<(), AppError> {
    let target = cli.target()?;
    let keep_scratch = cli.keep_scratch || settings.keep_scratch;
    let layout = settings.scratch_layout(cli.scratch.clone());
    let client = http_client(settings.http_timeout(), settings.connect_timeout())?;

    let (progress_tx, progress_rx) = mpsc::channel(64);
    let mut context = RunContext::new(layout.clone(), client.clone());
    context.catalog_url = cli
        .catalog_url
        .clone()
        .unwrap_or_else(|| settings.catalog_url.clone());
    context.retry = settings.retry_policy();
    context.max_concurrent_lookups = settings.max_concurrent_lookups.max(1);
    context.max_concurrent_downloads = settings.max_concurrent_downloads.max(1);
    context.keep_extracted = keep_scratch;
    context.progress = Some(progress_tx);

    let cancel = context.cancel.clone();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        }
    });
    let progress = tokio::spawn(progress::log_progress(progress_rx));

    let source = UpdateCatalogClient::new(
        client,
        settings.catalog_endpoint.clone(),
        context.retry.clone(),
        cancel.clone(),
    );
    let mut pipeline = Pipeline::new(context, source);

    info!("Scratch directory: {}", layout.root().display());
    let result = if cli.yes {
        pipeline.run(target, &AutoApprove).await
    } else {
        pipeline.run(target, &ConsolePrompt::new(cancel)).await
    };

    // The pipeline owns the last progress sender.
    drop(pipeline);
    let _ = progress.await;
    interrupt.abort();

    let outcome = result?;
    if outcome.ready_to_integrate {
        info!("Packages are in {}", layout.downloads_dir().display());
    } else if !keep_scratch {
        layout
            .remove_all()
            .map_err(|source| AppError::io("Failed to clean scratch directory", source))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if cli.list_versions {
        print_versions();
        return ExitCode::SUCCESS;
    }

    let settings = Settings::load();
    logging::init_logging(
        cli.debug || settings.debug_logging,
        settings.max_log_size_bytes,
    );

    match run(&cli, &settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            eprintln!("error: {}", report(&err));
            ExitCode::FAILURE
        }
    }
}

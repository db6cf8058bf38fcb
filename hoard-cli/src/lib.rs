//! `hoard` command-line archiver.
//!
//! [`run`] wires configuration, credentials, the Nitter resolver, the
//! download engine and the uploader into one [`pipeline::Pipeline`] and turns
//! its [`report::RunReport`] into an exit code.

pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod report;
pub mod signal;

use std::sync::Arc;

use hoard_engine::{Downloader, build_client};
use hoard_remote::{RcloneStorage, Uploader, render_folder};
use hoard_sources::{NitterResolver, normalize_username};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub use cli::Args;
pub use config::AppConfig;
pub use error::{AppError, Result};

use crate::credentials::credential_from_env;
use crate::pipeline::{Pipeline, UploadTarget};
use crate::report::{Failure, FailureKind, RunReport};

/// Run one archive pass and return the process exit code.
pub async fn run(args: Args) -> u8 {
    let token = CancellationToken::new();
    let listener = signal::cancel_on_shutdown(token.clone());

    let report = match execute(&args, token.clone()).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Run aborted");
            RunReport::fatal(args.username.clone(), fatal_failure(&e))
        }
    };

    token.cancel();
    let _ = listener.await;

    if let Some(path) = &args.report {
        match report.write_json(path) {
            Ok(()) => info!(path = %path.display(), "Report written"),
            Err(e) => warn!(error = %e, "Could not write the report"),
        }
    }
    report.exit_code()
}

async fn execute(args: &Args, token: CancellationToken) -> Result<RunReport> {
    let mut config = AppConfig::load(args.config.as_deref())?;
    config.apply_args(args);
    config.validate()?;

    let username = normalize_username(&args.username)?;

    let downloader_config = config.downloader_config()?;
    let client = build_client(&downloader_config)?;
    let resolver = Arc::new(NitterResolver::new(client, config.nitter_config()));
    let downloader = Downloader::new(downloader_config)?;

    let upload = if config.upload.enabled {
        upload_target(&config, username, token.clone())?
    } else {
        info!("Upload disabled, keeping files local");
        None
    };

    let pipeline = Pipeline::new(
        resolver,
        downloader,
        upload,
        &config.download.output_dir,
        config.download.concurrency,
        token,
    );
    pipeline.run(username).await
}

fn upload_target(
    config: &AppConfig,
    username: &str,
    token: CancellationToken,
) -> Result<Option<UploadTarget>> {
    let upload = &config.upload;
    let Some(credential) = credential_from_env(
        &upload.user_env,
        &upload.password_env,
        &upload.credentials_file,
    )?
    else {
        info!(
            user_env = %upload.user_env,
            password_env = %upload.password_env,
            "No storage credentials found, keeping files local"
        );
        return Ok(None);
    };

    let storage = RcloneStorage::new(&upload.rclone_path, token.clone()).with_backend(&upload.backend);
    let folder = render_folder(&upload.folder, username);
    info!(backend = %upload.backend, folder = %folder, user = credential.user(), "Uploading to remote storage");
    let uploader = Uploader::new(
        Arc::new(storage),
        folder,
        config.download.retry_policy(),
        token,
    );
    Ok(Some(UploadTarget {
        uploader: Arc::new(uploader),
        credential,
    }))
}

fn fatal_failure(err: &AppError) -> Failure {
    let kind = match err {
        AppError::Source(e) => FailureKind::from(e),
        AppError::Download(e) => FailureKind::from(e),
        AppError::Storage(e) => FailureKind::from(e),
        _ => FailureKind::Internal,
    };
    Failure::new(kind, err.to_string())
}

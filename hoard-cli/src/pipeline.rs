//! Per-run orchestration: resolve the account, then run every media item
//! through fetch, download and upload on a bounded pool of workers.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hoard_engine::{DownloadError, Downloader, ManifestFetcher, output_extension};
use hoard_remote::{Credential, Uploader};
use hoard_sources::{AccountResolver, MediaItem, MediaStatus, PostSidecar};
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::Result;
use crate::report::{Failure, FailureKind, ItemReport, RunReport};

/// Where completed files go after download.
pub struct UploadTarget {
    pub uploader: Arc<Uploader>,
    pub credential: Credential,
}

#[derive(Clone)]
pub struct Pipeline {
    resolver: Arc<dyn AccountResolver>,
    downloader: Downloader,
    upload: Option<Arc<UploadTarget>>,
    output_dir: PathBuf,
    concurrency: usize,
    token: CancellationToken,
}

/// State shared by the workers of one run.
struct RunState {
    queue: Mutex<VecDeque<(usize, MediaItem)>>,
    /// Finished outputs already in the output directory, by file stem.
    existing: HashMap<String, PathBuf>,
    /// Posts whose sidecar has been written.
    sidecars: Mutex<HashSet<String>>,
}

impl Pipeline {
    pub fn new(
        resolver: Arc<dyn AccountResolver>,
        downloader: Downloader,
        upload: Option<UploadTarget>,
        output_dir: impl Into<PathBuf>,
        concurrency: usize,
        token: CancellationToken,
    ) -> Self {
        Self {
            resolver,
            downloader,
            upload: upload.map(Arc::new),
            output_dir: output_dir.into(),
            concurrency: concurrency.max(1),
            token,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Archive every media item of `username`.
    ///
    /// Resolver errors abort the run; item failures are recorded in the
    /// report and never stop the other items.
    pub async fn run(&self, username: &str) -> Result<RunReport> {
        let mut report = RunReport::new(username);

        let items = self
            .resolver
            .resolve(username)
            .instrument(info_span!("resolve", resolver = self.resolver.name(), username))
            .await?;
        info!(username, items = items.len(), "Resolved account");

        tokio::fs::create_dir_all(&self.output_dir).await?;
        if items.is_empty() {
            report.finish();
            return Ok(report);
        }

        report.items = items.iter().map(ItemReport::new).collect();
        let state = Arc::new(RunState {
            queue: Mutex::new(items.into_iter().enumerate().collect()),
            existing: scan_existing(&self.output_dir).await?,
            sidecars: Mutex::new(HashSet::new()),
        });

        let workers = self.concurrency.min(report.items.len());
        let mut tasks = JoinSet::new();
        for worker in 0..workers {
            let pipeline = self.clone();
            let state = state.clone();
            tasks.spawn(async move { pipeline.worker(worker, &state).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(done) => {
                    for (index, item_report) in done {
                        report.items[index] = item_report;
                    }
                }
                Err(e) => error!(error = %e, "Worker task failed"),
            }
        }

        for item in report.items.iter_mut() {
            if !item.status.is_terminal() && item.failure.is_none() {
                item.failure = Some(Failure::new(
                    FailureKind::Internal,
                    "item was not processed by any worker",
                ));
            }
        }

        if let Some(target) = &self.upload
            && report.items.iter().any(|i| i.remote.is_some())
        {
            match target.uploader.list(&target.credential).await {
                Ok(entries) => {
                    let names: Vec<String> = entries.into_iter().map(|e| e.name).collect();
                    info!(folder = target.uploader.folder(), files = names.len(), "Remote folder listed");
                    report.remote_listing = Some(names);
                }
                Err(e) => warn!(error = %e, "Could not list the remote folder"),
            }
        }

        report.finish();
        info!(
            username,
            total = report.items.len(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            "Run finished"
        );
        Ok(report)
    }

    async fn worker(&self, worker: usize, state: &RunState) -> Vec<(usize, ItemReport)> {
        debug!(worker, "Worker started");
        let fetcher = self.downloader.manifest_fetcher();
        let mut done = Vec::new();

        loop {
            let next = state.queue.lock().pop_front();
            let Some((index, mut item)) = next else {
                break;
            };
            let mut item_report = ItemReport::new(&item);
            let span = info_span!("item", id = %item.id, kind = %item.kind);
            self.process(&fetcher, state, &mut item, &mut item_report)
                .instrument(span)
                .await;
            item_report.sync(&item);
            done.push((index, item_report));
        }

        debug!(worker, items = done.len(), "Worker finished");
        done
    }

    async fn process(
        &self,
        fetcher: &ManifestFetcher,
        state: &RunState,
        item: &mut MediaItem,
        report: &mut ItemReport,
    ) {
        if let Err(e) = item.transition(MediaStatus::InProgress) {
            report.failure = Some(Failure::new(FailureKind::Internal, e.to_string()));
            return;
        }

        if self.token.is_cancelled() {
            fail(item, report, Failure::cancelled());
            return;
        }

        let download = match state.existing.get(&item.file_stem()) {
            Some(path) => {
                debug!(path = %path.display(), "Already archived, skipping download");
                existing_file(path).await
            }
            None => self.download(fetcher, item).await,
        };

        let (path, bytes, skipped) = match download {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(url = %item.url, error = %e, "Item failed");
                fail(item, report, Failure::from(&e));
                return;
            }
        };

        if let Err(e) = item.transition(MediaStatus::Done) {
            report.failure = Some(Failure::new(FailureKind::Internal, e.to_string()));
            return;
        }
        report.path = Some(path.clone());
        report.bytes = Some(bytes);
        report.skipped = skipped;

        self.write_sidecar(state, item).await;

        if let Some(target) = &self.upload {
            match target
                .uploader
                .upload(std::slice::from_ref(&path), &target.credential)
                .await
            {
                Ok(receipts) => report.remote = receipts.into_iter().next().map(|r| r.remote),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Upload failed");
                    report.failure = Some(Failure::from(&e));
                }
            }
        }
    }

    async fn download(
        &self,
        fetcher: &ManifestFetcher,
        item: &MediaItem,
    ) -> std::result::Result<(PathBuf, u64, bool), DownloadError> {
        let media = fetcher.resolve(&item.url, &self.token).await?;
        debug!(url = %media.url(), kind = %media.kind(), "Resolved media");
        let extension = output_extension(&media, self.downloader.config())
            .map(str::to_string)
            .unwrap_or_else(|| item.default_extension());
        let dest = self.output_dir.join(item.file_name(&extension));
        let outcome = self.downloader.download(&media, &dest, &self.token).await?;
        Ok((outcome.path, outcome.bytes, outcome.skipped))
    }

    /// Write the post's sidecar once, next to its first finished item.
    async fn write_sidecar(&self, state: &RunState, item: &MediaItem) {
        if !state.sidecars.lock().insert(item.post.id.clone()) {
            return;
        }
        let sidecar = PostSidecar::new(&item.post);
        let path = self.output_dir.join(sidecar.file_name());
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return;
        }
        let result = match sidecar.to_json() {
            Ok(json) => tokio::fs::write(&path, json).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to write post sidecar");
        }
    }
}

fn fail(item: &mut MediaItem, report: &mut ItemReport, failure: Failure) {
    if let Err(e) = item.transition(MediaStatus::Failed) {
        warn!(id = %item.id, error = %e, "Unexpected item status");
    }
    report.failure = Some(failure);
}

async fn existing_file(path: &Path) -> std::result::Result<(PathBuf, u64, bool), DownloadError> {
    let bytes = tokio::fs::metadata(path).await?.len();
    Ok((path.to_path_buf(), bytes, true))
}

/// Map of file stem to path for every finished output in `dir`.
///
/// In-progress `.part` files and post sidecars are ignored.
async fn scan_existing(dir: &Path) -> std::io::Result<HashMap<String, PathBuf>> {
    let mut existing = HashMap::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".part") || name.ends_with("_info.json") {
            continue;
        }
        if let Some(stem) = path.file_stem() {
            existing.insert(stem.to_string_lossy().into_owned(), path);
        }
    }
    Ok(existing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoard_engine::DownloaderConfig;
    use hoard_sources::{NitterConfig, NitterResolver};

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn run_future_can_be_spawned() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = NitterResolver::new(
            reqwest::Client::new(),
            NitterConfig {
                instances: vec!["https://nitter.example".to_string()],
                ..NitterConfig::default()
            },
        );
        let downloader = Downloader::new(DownloaderConfig {
            use_system_proxy: false,
            ..DownloaderConfig::default()
        })
        .unwrap();
        let pipeline = Pipeline::new(
            Arc::new(resolver),
            downloader,
            None,
            dir.path(),
            2,
            CancellationToken::new(),
        );

        let run = pipeline.run("alice");
        assert_send(&run);
        let state = RunState {
            queue: Mutex::new(VecDeque::new()),
            existing: HashMap::new(),
            sidecars: Mutex::new(HashSet::new()),
        };
        let worker = pipeline.worker(0, &state);
        assert_send(&worker);
        assert!(worker.await.is_empty());
    }

    #[tokio::test]
    async fn scan_ignores_partials_and_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "1_video.mp4",
            "2_photo_0.jpg",
            "3_video.mp4.part",
            "3_video.concat.mp4.part",
            "1_info.json",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("4_video")).unwrap();

        let existing = scan_existing(dir.path()).await.unwrap();
        let mut stems: Vec<&str> = existing.keys().map(String::as_str).collect();
        stems.sort();
        assert_eq!(stems, vec!["1_video", "2_photo_0"]);
    }
}

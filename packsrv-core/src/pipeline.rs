//! Ingestion of one instance: download → extract → enumerate → hash → publish.
//!
//! Every stage finishes before the next one starts. The run works inside a
//! private staging directory; the published tree and manifest are only
//! touched in the final `Publishing` stage, so a run that fails earlier leaves
//! the previous publication as it was.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, Instrument};

use crate::config::{Config, InstanceSource};
use crate::error::{IngestError, IngestFailure};
use crate::extract;
use crate::hasher;
use crate::lock::InstanceLocks;
use crate::manifest::{ManifestBuilder, ManifestStore, StagedManifest};
use crate::progress::{Progress, Stage};
use crate::walk::ExcludeSet;

const PROGRESS_EVERY: Duration = Duration::from_secs(5);

/// Swap `tree` into `dest` and make `staged` visible. The manifest is already
/// on disk, so only a rename remains after the tree moves; if that rename
/// fails the previous tree goes back in place.
pub fn publish(
    staged: StagedManifest,
    tree: &Path,
    dest: &Path,
) -> Result<PathBuf, IngestError> {
    let swap = extract::swap_dir(tree, dest)?;
    match staged.commit() {
        Ok(path) => {
            swap.finish();
            Ok(path)
        }
        Err(e) => {
            if let Err(rb) = swap.rollback() {
                error!(dest = %dest.display(), error = %rb, "could not restore previous tree");
            }
            Err(e)
        }
    }
}

/// Summary of a successful run.
#[derive(Clone, Debug)]
pub struct IngestReport {
    pub instance: String,
    pub files: usize,
    pub total_bytes: u64,
    pub archive_bytes: u64,
    pub manifest_path: PathBuf,
    pub finished_utc: String,
}

#[derive(Clone)]
pub struct IngestionPipeline {
    config: Arc<Config>,
    client: reqwest::Client,
    locks: InstanceLocks,
    exclude: ExcludeSet,
    store: ManifestStore,
}

impl IngestionPipeline {
    pub fn new(config: Arc<Config>) -> Result<Self, IngestError> {
        let exclude = ExcludeSet::new(&config.exclude)?;
        let store = ManifestStore::new(config.extracted_dir());
        Ok(Self {
            config,
            client: reqwest::Client::new(),
            locks: InstanceLocks::new(),
            exclude,
            store,
        })
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    /// Ingest every configured source. Different instances run concurrently;
    /// repeated names queue behind each other.
    pub async fn ingest_all(&self) -> Vec<Result<IngestReport, IngestFailure>> {
        let runs = self.config.sources.iter().map(|s| self.ingest(s));
        futures::future::join_all(runs).await
    }

    pub async fn ingest(&self, source: &InstanceSource) -> Result<IngestReport, IngestFailure> {
        let span = info_span!("ingest", instance = %source.name);
        async {
            let progress = Progress::new(&source.name, self.config.progress);
            progress.start(PROGRESS_EVERY);
            let res = self.run(source, &progress).await;
            progress.stop();
            match res {
                Ok(report) => {
                    info!(
                        files = report.files,
                        bytes = report.total_bytes,
                        digest = hasher::DIGEST_ALGORITHM,
                        manifest = %report.manifest_path.display(),
                        "instance published"
                    );
                    Ok(report)
                }
                Err(cause) => {
                    let stage = progress.stage();
                    progress.advance(Stage::Failed);
                    error!(%stage, error = %cause, "ingestion failed");
                    Err(IngestFailure { instance: source.name.clone(), stage, cause })
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        source: &InstanceSource,
        progress: &Progress,
    ) -> Result<IngestReport, IngestError> {
        let name = source.name.clone();
        let cfg = &self.config;
        cfg.ensure_dirs()?;
        let _guard = self.locks.acquire(&cfg.locks_dir(), &name).await?;

        progress.advance(Stage::Downloading);
        let archive = cfg.archive_path(&name);
        let archive_bytes =
            crate::download::download(&self.client, &source.url, &archive, Some(progress)).await?;
        info!(url = %source.url, bytes = archive_bytes, "archive downloaded");

        progress.advance(Stage::Extracting);
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{name}-"))
            .tempdir_in(cfg.staging_dir())
            .map_err(|e| IngestError::io(cfg.staging_dir(), e))?;
        let tree = scratch.path().join("tree");
        let stats = {
            let (archive, tree) = (archive.clone(), tree.clone());
            tokio::task::spawn_blocking(move || extract::extract(&archive, &tree)).await??
        };
        info!(files = stats.files, dirs = stats.dirs, skipped = stats.skipped, "archive extracted");

        progress.advance(Stage::Enumerating);
        let builder = ManifestBuilder::new(cfg.base_url.clone())
            .exclude(self.exclude.clone())
            .progress(progress.clone());
        let entries = {
            let (builder, tree) = (builder.clone(), tree.clone());
            tokio::task::spawn_blocking(move || builder.enumerate(&tree)).await??
        };
        info!(files = entries.len(), "tree enumerated");

        progress.advance(Stage::Hashing);
        let manifest = {
            let name = name.clone();
            tokio::task::spawn_blocking(move || builder.hash_entries(&name, &entries)).await??
        };

        progress.advance(Stage::Publishing);
        let manifest_path = {
            let store = self.store.clone();
            let dest = cfg.instance_dir(&name);
            let (name, manifest) = (name.clone(), manifest.clone());
            tokio::task::spawn_blocking(move || -> Result<PathBuf, IngestError> {
                let staged = store.stage(&manifest, &name)?;
                publish(staged, &tree, &dest)
            })
            .await??
        };
        progress.advance(Stage::Done);

        Ok(IngestReport {
            instance: name,
            files: manifest.len(),
            total_bytes: manifest.total_bytes(),
            archive_bytes,
            manifest_path,
            finished_utc: chrono::Utc::now().to_rfc3339(),
        })
    }
}

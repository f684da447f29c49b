use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};

use crate::api::error::ApiError;
use crate::hosting::error::HostingError;
use crate::models::asset::{AssetAttribute, AssetMetadata, AssetMetadataDiffs, ModifiedAssetMetadata};
use crate::ui::Ui;

pub const DEFAULT_WORKERS: usize = 8;

/// Path used to invalidate every cached asset.
pub const INVALIDATE_ALL: &str = "/*";

/// The remote calls a hosting sync needs.
#[async_trait]
pub trait HostingApi: Send + Sync {
    /// Upload `root_dir/<asset path>` with the asset's metadata.
    async fn upload_asset(
        &self,
        group_id: &str,
        app_id: &str,
        root_dir: &Path,
        asset: &AssetMetadata,
    ) -> Result<(), ApiError>;

    async fn delete_asset(&self, group_id: &str, app_id: &str, path: &str) -> Result<(), ApiError>;

    async fn set_asset_attributes(
        &self,
        group_id: &str,
        app_id: &str,
        path: &str,
        attrs: &[AssetAttribute],
    ) -> Result<(), ApiError>;

    async fn invalidate_cache(&self, group_id: &str, app_id: &str, path: &str)
    -> Result<(), ApiError>;

    /// Fetch the asset from its public URL and write it to `dest`.
    async fn download_asset(&self, asset: &AssetMetadata, dest: &Path) -> Result<(), ApiError>;
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub group_id: String,
    pub app_id: String,
    /// Local directory the asset paths are relative to.
    pub root_dir: PathBuf,
    /// Import only: invalidate the hosting cache after a clean run.
    pub reset_cache: bool,
    pub workers: usize,
}

/// One unit of work for a sync worker.
#[derive(Debug, Clone)]
pub enum HostingOp {
    Add(AssetMetadata),
    Delete(AssetMetadata),
    Modify(ModifiedAssetMetadata),
    Download(AssetMetadata),
}

impl HostingOp {
    pub fn path(&self) -> &str {
        match self {
            Self::Add(asset) | Self::Delete(asset) | Self::Download(asset) => &asset.file_path,
            Self::Modify(modified) => &modified.asset.file_path,
        }
    }

    /// Run the operation; a failure is tagged with the asset path.
    pub async fn apply<C>(&self, client: &C, options: &SyncOptions) -> Result<(), HostingError>
    where
        C: HostingApi + ?Sized,
    {
        let SyncOptions {
            group_id,
            app_id,
            root_dir,
            ..
        } = options;

        let result = match self {
            Self::Add(asset) => client.upload_asset(group_id, app_id, root_dir, asset).await,
            Self::Delete(asset) => client.delete_asset(group_id, app_id, &asset.file_path).await,
            Self::Modify(modified) if modified.attributes_only() => {
                client
                    .set_asset_attributes(
                        group_id,
                        app_id,
                        &modified.asset.file_path,
                        &modified.asset.attrs,
                    )
                    .await
            }
            Self::Modify(modified) => {
                client
                    .upload_asset(group_id, app_id, root_dir, &modified.asset)
                    .await
            }
            Self::Download(asset) => {
                let dest = asset_dest(root_dir, &asset.file_path)?;
                client.download_asset(asset, &dest).await
            }
        };

        result.map_err(|source| HostingError::Asset {
            path: self.path().to_string(),
            source,
        })
    }
}

/// Adds first, then deletes, then modifications.
pub fn hosting_ops(diffs: &AssetMetadataDiffs) -> Vec<HostingOp> {
    diffs
        .added_locally
        .iter()
        .cloned()
        .map(HostingOp::Add)
        .chain(diffs.deleted_locally.iter().cloned().map(HostingOp::Delete))
        .chain(diffs.modified_locally.iter().cloned().map(HostingOp::Modify))
        .collect()
}

/// `root_dir` joined with an asset path. Paths that would leave `root_dir`
/// are rejected.
fn asset_dest(root_dir: &Path, file_path: &str) -> Result<PathBuf, HostingError> {
    let relative = Path::new(file_path.trim_start_matches('/'));
    let escapes = relative
        .components()
        .any(|component| !matches!(component, Component::Normal(_)));
    if relative.as_os_str().is_empty() || escapes {
        return Err(HostingError::UnsafePath(file_path.to_string()));
    }
    Ok(root_dir.join(relative))
}

/// Apply `diffs` remotely with `options.workers` concurrent workers.
///
/// A failing asset does not stop the others; every failure is reported to
/// `ui` as it happens and the batch ends in [`HostingError::Batch`]. The
/// hosting cache is only invalidated when every asset succeeded.
pub async fn import_hosting<C>(
    options: &SyncOptions,
    diffs: &AssetMetadataDiffs,
    client: Arc<C>,
    ui: Arc<dyn Ui>,
) -> Result<(), HostingError>
where
    C: HostingApi + ?Sized + 'static,
{
    let ops = hosting_ops(diffs);
    info!(ops = ops.len(), workers = options.workers, "importing hosting assets");
    let errors = run_ops(ops, options, &client, ui).await?;
    batch_result("importing", errors)?;

    if options.reset_cache {
        info!("invalidating hosting cache");
        client
            .invalidate_cache(&options.group_id, &options.app_id, INVALIDATE_ALL)
            .await
            .map_err(HostingError::Invalidate)?;
    }

    Ok(())
}

/// Download every file in `assets` below `options.root_dir`, skipping
/// directory markers. Returns how many files were written.
pub async fn export_hosting<C>(
    options: &SyncOptions,
    assets: &[AssetMetadata],
    client: Arc<C>,
    ui: Arc<dyn Ui>,
) -> Result<usize, HostingError>
where
    C: HostingApi + ?Sized + 'static,
{
    let ops: Vec<_> = assets
        .iter()
        .filter(|asset| !asset.is_dir())
        .cloned()
        .map(HostingOp::Download)
        .collect();
    let count = ops.len();

    info!(ops = count, workers = options.workers, "exporting hosting assets");
    let errors = run_ops(ops, options, &client, ui).await?;
    batch_result("exporting", errors)?;

    Ok(count)
}

fn batch_result(action: &'static str, errors: Vec<HostingError>) -> Result<(), HostingError> {
    match errors.first() {
        Some(first) => Err(HostingError::Batch {
            action,
            count: errors.len(),
            first: first.to_string(),
        }),
        None => Ok(()),
    }
}

/// Feed `ops` to a fixed pool of workers through a bounded queue and collect
/// the per-asset failures.
async fn run_ops<C>(
    ops: Vec<HostingOp>,
    options: &SyncOptions,
    client: &Arc<C>,
    ui: Arc<dyn Ui>,
) -> Result<Vec<HostingError>, HostingError>
where
    C: HostingApi + ?Sized + 'static,
{
    let workers = options.workers.max(1);
    let shared_options = Arc::new(options.clone());

    let (error_tx, mut error_rx) = mpsc::unbounded_channel::<HostingError>();
    let collector = tokio::spawn(async move {
        let mut errors = Vec::new();
        while let Some(err) = error_rx.recv().await {
            ui.error(&err.to_string());
            errors.push(err);
        }
        errors
    });

    let (op_tx, op_rx) = mpsc::channel::<HostingOp>(workers);
    let op_rx = Arc::new(Mutex::new(op_rx));

    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let op_rx = Arc::clone(&op_rx);
        let client = Arc::clone(client);
        let options = Arc::clone(&shared_options);
        let error_tx = error_tx.clone();

        handles.push(tokio::spawn(async move {
            loop {
                let op = op_rx.lock().await.recv().await;
                let Some(op) = op else {
                    break;
                };

                debug!(worker, path = op.path(), "applying hosting op");
                if let Err(err) = op.apply(client.as_ref(), &options).await {
                    let _ = error_tx.send(err);
                }
            }
        }));
    }

    for op in ops {
        if op_tx.send(op).await.is_err() {
            // every worker has exited
            break;
        }
    }
    drop(op_tx);

    let mut worker_failure = None;
    for handle in handles {
        if let Err(err) = handle.await {
            worker_failure.get_or_insert(err);
        }
    }
    drop(error_tx);

    let errors = collector.await?;
    match worker_failure {
        Some(err) => Err(HostingError::Worker(err)),
        None => Ok(errors),
    }
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use crate::api::client::AuthClient;
use crate::cli::{AppArgs, HostingCommand};
use crate::config::Config;
use crate::hosting::diff::diff_asset_metadata;
use crate::hosting::error::HostingError;
use crate::hosting::local::{
    AssetCache, asset_descriptions, files_dir, list_local_assets, metadata_path,
    read_asset_descriptions, write_asset_descriptions,
};
use crate::hosting::sync::{HostingApi, SyncOptions, export_hosting, import_hosting};
use crate::models::asset::{AssetMetadata, AssetMetadataDiffs};
use crate::ui::Ui;

pub async fn run(config: &Config, command: HostingCommand, ui: Arc<dyn Ui>) -> Result<()> {
    let client = Arc::new(config.client()?);
    let cache_path = config.cache_path();

    match command {
        HostingCommand::List { app } => list(&client, &app, ui.as_ref()).await,
        HostingCommand::Diff {
            app,
            app_dir,
            merge,
        } => diff(&client, &app, &app_dir, &cache_path, merge, ui.as_ref()).await,
        HostingCommand::Import {
            app,
            app_dir,
            merge,
            reset_cache,
            workers,
        } => {
            let request = ImportRequest {
                app,
                app_dir,
                cache_path,
                merge,
                reset_cache,
                workers,
            };
            import(client, &request, ui).await
        }
        HostingCommand::Export {
            app,
            app_dir,
            workers,
        } => export(client, &app, &app_dir, workers, ui).await,
        HostingCommand::Invalidate { app, path } => {
            client
                .invalidate_cache(&app.group_id, &app.app_id, &path)
                .await
                .context("Failed to invalidate hosting cache")?;
            ui.info(&format!("Invalidated hosting cache for {path}"));
            Ok(())
        }
    }
}

async fn list(client: &AuthClient, app: &AppArgs, ui: &dyn Ui) -> Result<()> {
    let assets = client
        .list_assets(&app.group_id, &app.app_id)
        .await
        .context("Failed to list hosting assets")?;

    let files: Vec<_> = assets.iter().filter(|asset| !asset.is_dir()).collect();
    if files.is_empty() {
        ui.info("No hosted assets");
        return Ok(());
    }
    for asset in files {
        ui.info(&format!(
            "{}\t{}\t{}",
            asset.file_path, asset.file_size, asset.file_hash
        ));
    }
    Ok(())
}

async fn diff(
    client: &AuthClient,
    app: &AppArgs,
    app_dir: &Path,
    cache_path: &Path,
    merge: bool,
    ui: &dyn Ui,
) -> Result<()> {
    let diffs = plan(client, app, app_dir, cache_path, merge).await?;
    if diffs.is_empty() {
        ui.info("Hosting assets are up to date");
        return Ok(());
    }
    for line in diffs.lines() {
        ui.info(&line);
    }
    Ok(())
}

struct ImportRequest {
    app: AppArgs,
    app_dir: PathBuf,
    cache_path: PathBuf,
    merge: bool,
    reset_cache: bool,
    workers: usize,
}

async fn import(client: Arc<AuthClient>, request: &ImportRequest, ui: Arc<dyn Ui>) -> Result<()> {
    let diffs = plan(
        &client,
        &request.app,
        &request.app_dir,
        &request.cache_path,
        request.merge,
    )
    .await?;

    if diffs.is_empty() && !request.reset_cache {
        ui.info("Hosting assets are up to date");
        return Ok(());
    }
    for line in diffs.lines() {
        ui.info(&line);
    }

    let options = SyncOptions {
        group_id: request.app.group_id.clone(),
        app_id: request.app.app_id.clone(),
        root_dir: files_dir(&request.app_dir),
        reset_cache: request.reset_cache,
        workers: request.workers,
    };
    import_hosting(&options, &diffs, client, Arc::clone(&ui))
        .await
        .context("Failed to import hosting assets")?;

    ui.info(&format!(
        "Imported {} hosting asset change(s)",
        diffs.len()
    ));
    Ok(())
}

/// Write the remote assets into `app_dir` in the layout `import` reads.
async fn export(
    client: Arc<AuthClient>,
    app: &AppArgs,
    app_dir: &Path,
    workers: usize,
    ui: Arc<dyn Ui>,
) -> Result<()> {
    let assets = client
        .list_assets(&app.group_id, &app.app_id)
        .await
        .context("Failed to list hosting assets")?;

    let metadata = metadata_path(app_dir);
    write_asset_descriptions(&metadata, &asset_descriptions(&assets))
        .with_context(|| format!("Failed to write {}", metadata.display()))?;

    let root_dir = files_dir(app_dir);
    std::fs::create_dir_all(&root_dir)
        .with_context(|| format!("Failed to create {}", root_dir.display()))?;

    let options = SyncOptions {
        group_id: app.group_id.clone(),
        app_id: app.app_id.clone(),
        root_dir,
        reset_cache: false,
        workers,
    };
    let count = export_hosting(&options, &assets, client, Arc::clone(&ui))
        .await
        .context("Failed to export hosting assets")?;

    ui.info(&format!("Exported {count} hosting asset(s) to {}", app_dir.display()));
    Ok(())
}

/// Scan the app directory and the remote listing concurrently and diff them.
async fn plan(
    client: &AuthClient,
    app: &AppArgs,
    app_dir: &Path,
    cache_path: &Path,
    merge: bool,
) -> Result<AssetMetadataDiffs> {
    let remote = async {
        client
            .list_assets(&app.group_id, &app.app_id)
            .await
            .context("Failed to list hosting assets")
    };
    let local = scan_local(
        app.app_id.clone(),
        app_dir.to_path_buf(),
        cache_path.to_path_buf(),
    );

    let (local, remote) = tokio::try_join!(local, remote)?;
    Ok(diff_asset_metadata(&local, &remote, merge))
}

async fn scan_local(
    app_id: String,
    app_dir: PathBuf,
    cache_path: PathBuf,
) -> Result<Vec<AssetMetadata>> {
    tokio::task::spawn_blocking(move || {
        let descriptions = read_asset_descriptions(&metadata_path(&app_dir))?;
        let mut cache = AssetCache::load(&cache_path)?;
        let assets = list_local_assets(&app_id, &files_dir(&app_dir), &descriptions, &mut cache)?;

        if cache.is_dirty() {
            if let Err(err) = cache.save(&cache_path) {
                warn!(error = %err, "failed to update hosting cache file");
            }
        }
        Ok::<_, HostingError>(assets)
    })
    .await
    .context("Local asset scan stopped unexpectedly")?
    .context("Failed to read local hosting assets")
}

use std::path::Path;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::api::client::{AuthClient, RequestExecutor, RequestOptions};
use crate::api::error::{ApiError, decode, expect_status};
use crate::api::multipart::MultipartFile;
use crate::hosting::sync::HostingApi;
use crate::models::asset::{AssetAttribute, AssetMetadata};

fn assets_route(group_id: &str, app_id: &str) -> String {
    format!("/groups/{group_id}/apps/{app_id}/hosting/assets")
}

fn asset_route(group_id: &str, app_id: &str) -> String {
    format!("{}/asset", assets_route(group_id, app_id))
}

fn cache_route(group_id: &str, app_id: &str) -> String {
    format!("/groups/{group_id}/apps/{app_id}/hosting/cache")
}

/// The `meta` part of an asset upload.
#[derive(Serialize)]
struct UploadMeta<'a> {
    #[serde(rename = "appId")]
    app_id: &'a str,
    path: &'a str,
    hash: &'a str,
    size: u64,
    attrs: &'a [AssetAttribute],
}

#[derive(Serialize)]
struct AttributesRequest<'a> {
    attributes: &'a [AssetAttribute],
}

#[derive(Serialize)]
struct InvalidateRequest<'a> {
    invalidate: bool,
    path: &'a str,
}

impl<E: RequestExecutor> AuthClient<E> {
    /// List every hosted asset of an app, directories included.
    pub async fn list_assets(
        &self,
        group_id: &str,
        app_id: &str,
    ) -> Result<Vec<AssetMetadata>, ApiError> {
        let options = RequestOptions::default().with_query("recursive", "true");
        let res = self
            .execute_request(Method::GET, &assets_route(group_id, app_id), options)
            .await?;
        let res = expect_status(res, StatusCode::OK, "failed to list hosting assets").await?;

        decode(res).await
    }
}

#[async_trait]
impl<E: RequestExecutor> HostingApi for AuthClient<E> {
    async fn upload_asset(
        &self,
        group_id: &str,
        app_id: &str,
        root_dir: &Path,
        asset: &AssetMetadata,
    ) -> Result<(), ApiError> {
        let local_path = root_dir.join(asset.file_path.trim_start_matches('/'));
        let meta = serde_json::to_vec(&UploadMeta {
            app_id,
            path: &asset.file_path,
            hash: &asset.file_hash,
            size: asset.file_size,
            attrs: &asset.attrs,
        })?;
        debug!(path = %asset.file_path, size = asset.file_size, "uploading asset");

        let options = RequestOptions::multipart(MultipartFile::new(meta, local_path))?;
        let res = self
            .execute_request(Method::PUT, &asset_route(group_id, app_id), options)
            .await?;
        expect_status(res, StatusCode::NO_CONTENT, "failed to upload asset").await?;
        Ok(())
    }

    async fn delete_asset(&self, group_id: &str, app_id: &str, path: &str) -> Result<(), ApiError> {
        debug!(path, "deleting asset");
        let options = RequestOptions::default().with_query("path", path);
        let res = self
            .execute_request(Method::DELETE, &asset_route(group_id, app_id), options)
            .await?;
        expect_status(res, StatusCode::NO_CONTENT, "failed to delete asset").await?;
        Ok(())
    }

    async fn set_asset_attributes(
        &self,
        group_id: &str,
        app_id: &str,
        path: &str,
        attrs: &[AssetAttribute],
    ) -> Result<(), ApiError> {
        debug!(path, count = attrs.len(), "updating asset attributes");
        let options =
            RequestOptions::json(&AttributesRequest { attributes: attrs })?.with_query("path", path);
        let res = self
            .execute_request(Method::PATCH, &asset_route(group_id, app_id), options)
            .await?;
        expect_status(res, StatusCode::NO_CONTENT, "failed to update asset attributes").await?;
        Ok(())
    }

    async fn invalidate_cache(
        &self,
        group_id: &str,
        app_id: &str,
        path: &str,
    ) -> Result<(), ApiError> {
        let options = RequestOptions::json(&InvalidateRequest {
            invalidate: true,
            path,
        })?;
        let res = self
            .execute_request(Method::PUT, &cache_route(group_id, app_id), options)
            .await?;
        expect_status(res, StatusCode::NO_CONTENT, "failed to invalidate hosting cache").await?;
        Ok(())
    }

    async fn download_asset(&self, asset: &AssetMetadata, dest: &Path) -> Result<(), ApiError> {
        let url = asset
            .url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ApiError::MissingUrl(asset.file_path.clone()))?;
        debug!(path = %asset.file_path, url, "downloading asset");

        let res = self.fetch(url).await?;
        let mut res = expect_status(res, StatusCode::OK, "failed to download asset").await?;

        let file_err = |source| ApiError::File {
            path: dest.to_path_buf(),
            source,
        };
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await.map_err(file_err)?;
        }
        let mut file = File::create(dest).await.map_err(file_err)?;
        while let Some(chunk) = res.chunk().await? {
            file.write_all(&chunk).await.map_err(file_err)?;
        }
        file.flush().await.map_err(file_err)
    }
}

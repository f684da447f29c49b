//! Local side of a hosting sync: the app's `hosting/files` tree, its
//! `metadata.json` attribute overrides, and the on-disk hash cache.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::hosting::error::{HostingError, io_err};
use crate::models::asset::{
    ATTRIBUTE_CONTENT_TYPE, AssetAttribute, AssetMetadata, attributes_equal, null_as_empty,
};

pub const HOSTING_DIR: &str = "hosting";
pub const FILES_DIR: &str = "files";
pub const METADATA_FILE: &str = "metadata.json";

/// Attribute overrides for one asset, as listed in `metadata.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescription {
    #[serde(rename = "path")]
    pub file_path: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub attrs: Vec<AssetAttribute>,
}

/// Read `metadata.json` keyed by asset path. A missing file means no
/// overrides.
pub fn read_asset_descriptions(
    path: &Path,
) -> Result<HashMap<String, AssetDescription>, HostingError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(err) => return Err(io_err(path, err)),
    };

    let descriptions: Vec<AssetDescription> =
        serde_json::from_slice(&raw).map_err(|source| HostingError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    for description in &descriptions {
        if let Some(invalid) = description.attrs.iter().find(|attr| !attr.has_valid_name()) {
            return Err(HostingError::InvalidAttribute {
                path: description.file_path.clone(),
                name: invalid.name.clone(),
            });
        }
    }

    Ok(descriptions
        .into_iter()
        .map(|description| (description.file_path.clone(), description))
        .collect())
}

/// The `metadata.json` entries needed to reproduce `assets` on import.
///
/// Assets whose attributes are exactly what a scan would derive (none, or
/// only the extension's `Content-Type`) get no entry, and attributes outside
/// the allow-list are dropped.
pub fn asset_descriptions(assets: &[AssetMetadata]) -> Vec<AssetDescription> {
    assets
        .iter()
        .filter(|asset| !asset.is_dir() && !asset.attrs.is_empty())
        .filter(|asset| !attributes_equal(&asset.attrs, &default_attributes(&asset.file_path)))
        .map(|asset| AssetDescription {
            file_path: asset.file_path.clone(),
            attrs: asset
                .attrs
                .iter()
                .filter(|attr| attr.has_valid_name())
                .cloned()
                .collect(),
        })
        .collect()
}

pub fn write_asset_descriptions(
    path: &Path,
    descriptions: &[AssetDescription],
) -> Result<(), HostingError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| io_err(parent, err))?;
    }

    let raw = serde_json::to_vec_pretty(descriptions).map_err(|source| HostingError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, raw).map_err(|err| io_err(path, err))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetCacheEntry {
    #[serde(rename = "path")]
    pub file_path: String,
    #[serde(default)]
    pub last_modified: i64,
    #[serde(rename = "size", default)]
    pub file_size: u64,
    #[serde(rename = "hash", default)]
    pub file_hash: String,
}

/// File hashes from earlier scans, keyed by app id then asset path.
#[derive(Debug, Default)]
pub struct AssetCache {
    entries: HashMap<String, HashMap<String, AssetCacheEntry>>,
    dirty: bool,
}

impl AssetCache {
    /// Load the cache at `path`; a missing file yields an empty cache.
    pub fn load(path: &Path) -> Result<Self, HostingError> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(io_err(path, err)),
        };

        let entries = serde_json::from_slice(&raw).map_err(|source| HostingError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            entries,
            dirty: false,
        })
    }

    pub fn get(&self, app_id: &str, file_path: &str) -> Option<&AssetCacheEntry> {
        self.entries.get(app_id)?.get(file_path)
    }

    pub fn set(&mut self, app_id: &str, entry: AssetCacheEntry) {
        self.entries
            .entry(app_id.to_string())
            .or_default()
            .insert(entry.file_path.clone(), entry);
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn save(&mut self, path: &Path) -> Result<(), HostingError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| io_err(parent, err))?;
        }

        let raw = serde_json::to_vec(&self.entries).map_err(|source| HostingError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, raw).map_err(|err| io_err(path, err))?;

        self.dirty = false;
        Ok(())
    }
}

/// Build metadata for every file under `files_dir`, in file-name order.
///
/// Attributes come from `descriptions` when the asset has an entry there,
/// otherwise a `Content-Type` is derived from the extension. Hashes are taken
/// from `cache` when size and modification time still match and recomputed
/// (and written back to `cache`) otherwise.
pub fn list_local_assets(
    app_id: &str,
    files_dir: &Path,
    descriptions: &HashMap<String, AssetDescription>,
    cache: &mut AssetCache,
) -> Result<Vec<AssetMetadata>, HostingError> {
    let mut assets = Vec::new();

    for entry in WalkDir::new(files_dir).sort_by_file_name() {
        let entry = entry.map_err(|source| HostingError::Walk {
            path: files_dir.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_dir() {
            continue;
        }

        let file_path = asset_path(files_dir, entry.path());
        let metadata = entry.metadata().map_err(|source| HostingError::Walk {
            path: entry.path().to_path_buf(),
            source,
        })?;
        let file_size = metadata.len();
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or_default();

        let attrs = match descriptions.get(&file_path) {
            Some(description) => description.attrs.clone(),
            None => default_attributes(&file_path),
        };

        let cached_hash = cache
            .get(app_id, &file_path)
            .filter(|cached| cached.file_size == file_size && cached.last_modified == last_modified)
            .map(|cached| cached.file_hash.clone());

        let file_hash = match cached_hash {
            Some(file_hash) => file_hash,
            None => {
                debug!(path = %file_path, "hashing asset");
                let file_hash = hash_file(entry.path())?;
                cache.set(
                    app_id,
                    AssetCacheEntry {
                        file_path: file_path.clone(),
                        last_modified,
                        file_size,
                        file_hash: file_hash.clone(),
                    },
                );
                file_hash
            }
        };

        let mut asset = AssetMetadata::new(app_id, &file_path, &file_hash, file_size, attrs);
        asset.last_modified = last_modified;
        assets.push(asset);
    }

    for described in descriptions.keys() {
        if !assets.iter().any(|asset| &asset.file_path == described) {
            return Err(HostingError::MissingFile(described.clone()));
        }
    }

    Ok(assets)
}

/// `files_dir/a/b.txt` becomes `/a/b.txt` regardless of platform separator.
fn asset_path(files_dir: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(files_dir).unwrap_or(path);
    let segments: Vec<_> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(segment) => Some(segment.to_string_lossy()),
            _ => None,
        })
        .collect();

    format!("/{}", segments.join("/"))
}

fn default_attributes(file_path: &str) -> Vec<AssetAttribute> {
    Path::new(file_path)
        .extension()
        .and_then(|ext| content_type_by_extension(&ext.to_string_lossy()))
        .map(|content_type| vec![AssetAttribute::new(ATTRIBUTE_CONTENT_TYPE, content_type)])
        .unwrap_or_default()
}

pub fn content_type_by_extension(ext: &str) -> Option<&'static str> {
    let content_type = match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" | "map" => "application/json",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "wasm" => "application/wasm",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => return None,
    };
    Some(content_type)
}

/// Hex MD5 of a file's contents.
pub fn hash_file(path: &Path) -> Result<String, HostingError> {
    let mut file = File::open(path).map_err(|err| io_err(path, err))?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let read = file.read(&mut buf).map_err(|err| io_err(path, err))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

pub fn files_dir(app_dir: &Path) -> PathBuf {
    app_dir.join(HOSTING_DIR).join(FILES_DIR)
}

pub fn metadata_path(app_dir: &Path) -> PathBuf {
    app_dir.join(HOSTING_DIR).join(METADATA_FILE)
}

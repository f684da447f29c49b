use std::collections::HashMap;

use crate::models::asset::{
    AssetMetadata, AssetMetadataDiffs, ModifiedAssetMetadata, attributes_equal,
};

const ROOT_PATH: &str = "/";

/// Compare one local asset with its remote counterpart.
pub fn modified_asset_metadata(
    local: &AssetMetadata,
    remote: &AssetMetadata,
) -> ModifiedAssetMetadata {
    ModifiedAssetMetadata {
        asset: local.clone(),
        body_modified: local.file_hash != remote.file_hash,
        attr_modified: !attributes_equal(&local.attrs, &remote.attrs),
    }
}

/// Work out what has to happen remotely for the remote asset set to match
/// `local`.
///
/// Added and modified assets keep the order of `local`. Deleted assets come
/// out in no particular order. With `merge` set nothing is reported as
/// deleted. When `remote` lists a path twice, the later entry is used.
pub fn diff_asset_metadata(
    local: &[AssetMetadata],
    remote: &[AssetMetadata],
    merge: bool,
) -> AssetMetadataDiffs {
    let mut remaining: HashMap<&str, &AssetMetadata> = remote
        .iter()
        .filter(|asset| asset.file_path != ROOT_PATH)
        .map(|asset| (asset.file_path.as_str(), asset))
        .collect();

    let mut diffs = AssetMetadataDiffs::default();

    for asset in local {
        match remaining.remove(asset.file_path.as_str()) {
            None => diffs.added_locally.push(asset.clone()),
            Some(existing) => {
                let modified = modified_asset_metadata(asset, existing);
                if modified.is_modified() {
                    diffs.modified_locally.push(modified);
                }
            }
        }
    }

    if !merge {
        diffs.deleted_locally = remaining.into_values().cloned().collect();
    }

    diffs
}

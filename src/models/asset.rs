use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize};

pub const ATTRIBUTE_CONTENT_TYPE: &str = "Content-Type";
pub const ATTRIBUTE_CONTENT_DISPOSITION: &str = "Content-Disposition";
pub const ATTRIBUTE_CONTENT_LANGUAGE: &str = "Content-Language";
pub const ATTRIBUTE_CONTENT_ENCODING: &str = "Content-Encoding";
pub const ATTRIBUTE_CACHE_CONTROL: &str = "Cache-Control";
pub const ATTRIBUTE_WEBSITE_REDIRECT_LOCATION: &str = "Website-Redirect-Location";

/// Attribute names accepted by static hosting.
pub const VALID_ATTRIBUTE_NAMES: [&str; 6] = [
    ATTRIBUTE_CONTENT_TYPE,
    ATTRIBUTE_CONTENT_DISPOSITION,
    ATTRIBUTE_CONTENT_LANGUAGE,
    ATTRIBUTE_CONTENT_ENCODING,
    ATTRIBUTE_CACHE_CONTROL,
    ATTRIBUTE_WEBSITE_REDIRECT_LOCATION,
];

/// A single header-like attribute served with a hosted asset.
///
/// Field order matters: the derived `Ord` sorts by name, then value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetAttribute {
    pub name: String,
    pub value: String,
}

impl AssetAttribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn has_valid_name(&self) -> bool {
        VALID_ATTRIBUTE_NAMES.contains(&self.name.as_str())
    }
}

/// Compare two attribute sets ignoring order.
///
/// Duplicates are significant: `[a, a]` only equals another set holding `a`
/// twice.
pub fn attributes_equal(a: &[AssetAttribute], b: &[AssetAttribute]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut sorted_a: Vec<&AssetAttribute> = a.iter().collect();
    let mut sorted_b: Vec<&AssetAttribute> = b.iter().collect();
    sorted_a.sort();
    sorted_b.sort();

    sorted_a == sorted_b
}

/// Metadata for one hosted file, or a directory marker when the path ends
/// with `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMetadata {
    #[serde(rename = "appId", default, skip_serializing_if = "String::is_empty")]
    pub app_id: String,
    #[serde(rename = "path")]
    pub file_path: String,
    #[serde(rename = "hash", default, skip_serializing_if = "String::is_empty")]
    pub file_hash: String,
    #[serde(rename = "size", default, skip_serializing_if = "is_zero")]
    pub file_size: u64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub attrs: Vec<AssetAttribute>,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub last_modified: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl AssetMetadata {
    /// Build a metadata record stamped with the current time.
    pub fn new(
        app_id: &str,
        file_path: &str,
        file_hash: &str,
        file_size: u64,
        attrs: Vec<AssetAttribute>,
    ) -> Self {
        Self {
            app_id: app_id.to_string(),
            file_path: file_path.to_string(),
            file_hash: file_hash.to_string(),
            file_size,
            attrs,
            last_modified: unix_now(),
            url: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.file_path.ends_with('/')
    }
}

/// A local asset that differs from its remote counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifiedAssetMetadata {
    pub asset: AssetMetadata,
    pub body_modified: bool,
    pub attr_modified: bool,
}

impl ModifiedAssetMetadata {
    pub fn is_modified(&self) -> bool {
        self.body_modified || self.attr_modified
    }

    /// Only the attributes changed, so the body does not need re-uploading.
    pub fn attributes_only(&self) -> bool {
        self.attr_modified && !self.body_modified
    }
}

/// The result of comparing a local asset snapshot with the remote one.
///
/// `deleted_locally` has no meaningful order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetMetadataDiffs {
    pub added_locally: Vec<AssetMetadata>,
    pub deleted_locally: Vec<AssetMetadata>,
    pub modified_locally: Vec<ModifiedAssetMetadata>,
}

impl AssetMetadataDiffs {
    pub fn len(&self) -> usize {
        self.added_locally.len() + self.deleted_locally.len() + self.modified_locally.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Human-readable summary, one line per changed path.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.len() + 3);

        if !self.added_locally.is_empty() {
            lines.push("New Files:".to_string());
            for added in &self.added_locally {
                lines.push(format!("\t+ {}", added.file_path));
            }
        }

        if !self.deleted_locally.is_empty() {
            lines.push("Removed Files:".to_string());
            for deleted in &self.deleted_locally {
                lines.push(format!("\t- {}", deleted.file_path));
            }
        }

        if !self.modified_locally.is_empty() {
            lines.push("Modified Files:".to_string());
            for modified in &self.modified_locally {
                lines.push(format!("\t* {}", modified.asset.file_path));
            }
        }

        lines
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

fn is_zero_i64(value: &i64) -> bool {
    *value == 0
}

// The admin API sends `"attrs": null` for assets without attributes.
pub(crate) fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<AssetAttribute>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<AssetAttribute>>::deserialize(deserializer)?.unwrap_or_default())
}

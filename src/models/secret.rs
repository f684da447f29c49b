use serde::{Deserialize, Serialize};

/// A named secret stored server-side for an app. Values are write-only.
#[derive(Debug, Clone, Deserialize)]
pub struct Secret {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct SecretRequest<'a> {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<&'a str>,
    pub name: &'a str,
    pub value: &'a str,
}

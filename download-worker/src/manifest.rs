//! Manifest types for archive download requests.
//!
//! A manifest is the ordered list of items a download page submits. Its order
//! decides both the metadata order and the archive entry order.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("form field `{0}` is missing")]
    MissingPayload(String),

    #[error("request body is not form data: {0}")]
    Form(String),

    #[error("payload is not a valid manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid item url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// One entry of a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadItem {
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Caller-defined fields carried unchanged into the metadata record
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DownloadItem {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: Some(name.into()),
            extra: Map::new(),
        }
    }

    /// Path of this item inside the archive.
    ///
    /// Falls back to the last path segment of the URL when no name was given.
    pub fn entry_name(&self) -> &str {
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            return name;
        }

        let path = self
            .url
            .split(['?', '#'])
            .next()
            .unwrap_or(&self.url);

        path.rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or(&self.url)
    }

    /// Resolve the item URL; origin-relative URLs are joined onto `base`.
    pub fn resolve(&self, base: &Url) -> Result<Url, ManifestError> {
        let invalid = |reason: String| ManifestError::InvalidUrl {
            url: self.url.clone(),
            reason,
        };

        let url = match Url::parse(&self.url) {
            Ok(url) => url,
            Err(_) => base.join(&self.url).map_err(|e| invalid(e.to_string()))?,
        };

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(invalid(format!("unsupported scheme `{}`", other))),
        }
    }
}

/// Ordered sequence of download items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(pub Vec<DownloadItem>);

impl Manifest {
    /// Decode a manifest from its JSON form (an array of items)
    pub fn from_json(payload: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(payload)?)
    }

    pub fn items(&self) -> &[DownloadItem] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<DownloadItem>> for Manifest {
    fn from(items: Vec<DownloadItem>) -> Self {
        Self(items)
    }
}

impl IntoIterator for Manifest {
    type Item = DownloadItem;
    type IntoIter = std::vec::IntoIter<DownloadItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

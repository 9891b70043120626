//! Headers-only prepass collecting per-item metadata.

use crate::fetch::{FetchItemSource, FetchMode, FetchResult};
use reqwest::header::{HeaderName, CONTENT_LENGTH, CONTENT_TYPE, LAST_MODIFIED};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// What the response headers tell about one item, merged with the item's own
/// fields.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRecord {
    pub name: String,
    pub url: String,
    pub size: Option<u64>,
    pub content_type: Option<String>,
    pub last_modified: Option<String>,
    pub extra: Map<String, Value>,
}

impl MetadataRecord {
    /// Project a result onto its headers. The body is never read.
    ///
    /// The size comes from the `Content-Length` header itself: a HEAD
    /// response has an empty body, so the body length says nothing.
    pub fn from_result(result: &FetchResult) -> Self {
        let headers = result.response.headers();
        let header = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        Self {
            name: result.item.entry_name().to_string(),
            url: result.item.url.clone(),
            size: header(CONTENT_LENGTH).and_then(|v| v.trim().parse().ok()),
            content_type: header(CONTENT_TYPE),
            last_modified: header(LAST_MODIFIED),
            extra: result.item.extra.clone(),
        }
    }

    /// Sum of all sizes, if every record reported one and the sum fits
    pub fn total_size(records: &[MetadataRecord]) -> Option<u64> {
        records
            .iter()
            .try_fold(0u64, |total, r| total.checked_add(r.size?))
    }
}

// Serialized as one flat object. Caller fields win over projected header
// fields of the same name.
impl Serialize for MetadataRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let projected = [
            ("size", self.size.map(Value::from)),
            ("contentType", self.content_type.clone().map(Value::from)),
            ("lastModified", self.last_modified.clone().map(Value::from)),
        ];

        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("url", &self.url)?;
        map.serialize_entry("name", &self.name)?;
        for (key, value) in projected {
            if let Some(value) = value {
                if !self.extra.contains_key(key) {
                    map.serialize_entry(key, &value)?;
                }
            }
        }
        for (key, value) in &self.extra {
            if key != "url" && key != "name" {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

/// Drain a headers-only source, collecting one record per item that answered.
pub async fn collect_metadata(mut source: FetchItemSource) -> Vec<MetadataRecord> {
    if source.mode() != FetchMode::HeadersOnly {
        warn!("Metadata prepass driven with {:?}; bodies will be discarded", source.mode());
    }

    let mut records = Vec::with_capacity(source.remaining());
    while let Some(result) = source.next().await {
        records.push(MetadataRecord::from_result(&result));
    }

    debug!(
        collected = records.len(),
        skipped = source.skipped(),
        "Metadata prepass finished"
    );
    records
}

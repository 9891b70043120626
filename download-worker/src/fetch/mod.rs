//! Sequential fetching of manifest items.
//!
//! [`FetchItemSource`] walks a manifest in order and issues one request per
//! item, never more than one at a time. Items whose request fails are logged
//! and skipped; the walk itself never fails.

use crate::manifest::{DownloadItem, Manifest};
use reqwest::{Client, Method, Response, Url};
use tracing::{debug, warn};

/// How much of each item to retrieve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// `HEAD`: response headers only
    HeadersOnly,
    /// `GET`: the full body
    FullContent,
}

impl FetchMode {
    fn method(self) -> Method {
        match self {
            FetchMode::HeadersOnly => Method::HEAD,
            FetchMode::FullContent => Method::GET,
        }
    }
}

/// A successful response paired with the item it was fetched for.
#[derive(Debug)]
pub struct FetchResult {
    pub item: DownloadItem,
    pub response: Response,
}

/// Build the HTTP client shared by every fetch of this worker.
///
/// No timeout is set: a hung upstream stalls only the request that needs it.
pub fn build_client(user_agent: &str) -> reqwest::Result<Client> {
    Client::builder().user_agent(user_agent).build()
}

/// Lazy, single-pass sequence of [`FetchResult`]s over a manifest.
pub struct FetchItemSource {
    client: Client,
    base: Url,
    mode: FetchMode,
    items: std::vec::IntoIter<DownloadItem>,
    skipped: usize,
}

impl FetchItemSource {
    /// `base` is the origin that relative item URLs resolve against.
    pub fn new(client: Client, base: Url, manifest: Manifest, mode: FetchMode) -> Self {
        Self {
            client,
            base,
            mode,
            items: manifest.into_iter(),
            skipped: 0,
        }
    }

    pub fn mode(&self) -> FetchMode {
        self.mode
    }

    /// Items not yet attempted
    pub fn remaining(&self) -> usize {
        self.items.len()
    }

    /// Items dropped so far because their request failed
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Fetch the next item that succeeds, or `None` once the manifest is
    /// exhausted.
    pub async fn next(&mut self) -> Option<FetchResult> {
        while let Some(item) = self.items.next() {
            match self.fetch(&item).await {
                Ok(response) => {
                    debug!(url = %item.url, mode = ?self.mode, status = %response.status(), "Fetched item");
                    return Some(FetchResult { item, response });
                }
                Err(reason) => {
                    warn!(url = %item.url, mode = ?self.mode, "Failed to download item: {}", reason);
                    self.skipped += 1;
                }
            }
        }

        None
    }

    async fn fetch(&self, item: &DownloadItem) -> Result<Response, String> {
        let url = item.resolve(&self.base).map_err(|e| e.to_string())?;

        let response = self
            .client
            .request(self.mode.method(), url)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("status {}", response.status()));
        }

        Ok(response)
    }
}

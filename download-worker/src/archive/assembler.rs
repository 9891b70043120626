//! Archive stream assembly.
//!
//! One task per archive pulls items from a full-content [`FetchItemSource`]
//! and writes each body as a ZIP entry into a bounded in-memory pipe. The
//! read side of the pipe is the response body. Writes park while the pipe is
//! full and the next item is only requested once the previous entry is
//! complete, so fetching advances exactly as fast as the consumer reads.

use super::{ArchiveError, ArchiveOptions, ArchiveStream, EntryCompression, MetadataRecord};
use crate::fetch::{FetchItemSource, FetchResult};
use async_zip::base::write::ZipFileWriter;
use async_zip::{ZipDateTime, ZipEntryBuilder};
use chrono::{DateTime, Datelike, Utc};
use futures_util::{AsyncWriteExt as _, StreamExt};
use reqwest::header::LAST_MODIFIED;
use reqwest::Response;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tracing::{debug, info, warn};

/// Largest ZIP archive comment.
const MAX_COMMENT_LEN: usize = u16::MAX as usize;

/// Outcome of a fully written archive
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub bytes: u64,
    pub skipped: usize,
}

/// Start assembling an archive from `source`.
///
/// `metadata` is stored as JSON in the archive comment. The returned stream
/// is the archive; dropping it cancels the assembly.
pub fn assemble(
    source: FetchItemSource,
    metadata: &[MetadataRecord],
    options: &ArchiveOptions,
) -> ArchiveStream {
    let comment = archive_comment(metadata);
    let compression = options.compression;
    let (writer, reader) = tokio::io::duplex(options.buffer_size);

    let task = tokio::spawn(async move {
        let result = write_archive(source, writer, comment, compression).await;
        match &result {
            Ok(summary) => info!(
                entries = summary.entries,
                bytes = summary.bytes,
                skipped = summary.skipped,
                "Archive complete"
            ),
            Err(e) if e.is_disconnect() => debug!("Archive consumer disconnected"),
            Err(e) => warn!("Archive aborted: {}", e),
        }
        result
    });

    ArchiveStream::new(reader, task)
}

/// Metadata as a ZIP comment, if there is any and it fits.
fn archive_comment(metadata: &[MetadataRecord]) -> Option<String> {
    if metadata.is_empty() {
        return None;
    }

    match serde_json::to_string(metadata) {
        Ok(json) if json.len() <= MAX_COMMENT_LEN => Some(json),
        Ok(json) => {
            warn!(
                len = json.len(),
                "Archive metadata exceeds the ZIP comment limit, omitting it"
            );
            None
        }
        Err(e) => {
            warn!("Failed to serialize archive metadata: {}", e);
            None
        }
    }
}

/// Entry timestamp from `Last-Modified`, else now. ZIP cannot express dates
/// before 1980.
fn modification_date(response: &Response) -> ZipDateTime {
    let modified = response
        .headers()
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(|d| d.with_timezone(&Utc))
        .filter(|d| d.year() >= 1980)
        .unwrap_or_else(Utc::now);

    ZipDateTime::from_chrono(&modified)
}

async fn write_archive(
    mut source: FetchItemSource,
    sink: DuplexStream,
    comment: Option<String>,
    compression: EntryCompression,
) -> Result<ArchiveSummary, ArchiveError> {
    let mut writer = ZipFileWriter::with_tokio(sink);
    if let Some(comment) = comment {
        writer.comment(comment);
    }

    let mut summary = ArchiveSummary::default();

    while let Some(FetchResult { item, response }) = source.next().await {
        let name = item.entry_name().to_string();
        let builder = ZipEntryBuilder::new(name.clone().into(), compression.into())
            .last_modification_date(modification_date(&response));

        let mut entry = writer.write_entry_stream(builder).await?;
        let mut body = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|source| ArchiveError::Body {
                name: name.clone(),
                source,
            })?;
            entry.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        entry.close().await?;

        debug!(name = %name, bytes = written, "Archive entry written");
        summary.entries += 1;
        summary.bytes += written;
    }

    summary.skipped = source.skipped();

    let mut sink = writer.close().await?.into_inner();
    sink.shutdown().await?;

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::collect_metadata;
    use crate::fetch::{build_client, FetchMode};
    use crate::manifest::{DownloadItem, Manifest};
    use crate::test_support::{fixture, Upstream};
    use reqwest::Method;
    use std::io::{Cursor, Read};
    use std::time::Duration;

    fn source(upstream: &Upstream, items: &[DownloadItem], mode: FetchMode) -> FetchItemSource {
        let client = build_client("download-worker-test").unwrap();
        FetchItemSource::new(client, upstream.base(), Manifest::from(items.to_vec()), mode)
    }

    async fn collect(mut stream: ArchiveStream) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    /// (name, contents) of every entry, in archive order
    fn entries(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut file = archive.by_index(i).unwrap();
                let mut contents = Vec::new();
                file.read_to_end(&mut contents).unwrap();
                (file.name().to_string(), contents)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_every_item_becomes_an_entry_in_order() {
        let upstream = Upstream::start().await;
        let items = vec![
            DownloadItem::new(upstream.url("/files/b.bin"), "drivers/b.bin"),
            DownloadItem::new(upstream.url("/files/a.bin"), "a.bin"),
            DownloadItem::new(upstream.url("/files/empty.bin"), "empty.bin"),
            DownloadItem::new(upstream.url("/files/c.bin"), "c.bin"),
        ];

        let stream = assemble(
            source(&upstream, &items, FetchMode::FullContent),
            &[],
            &ArchiveOptions::default(),
        );
        let entries = entries(collect(stream).await.unwrap());

        let expected: Vec<(String, Vec<u8>)> = [
            ("drivers/b.bin", "b.bin"),
            ("a.bin", "a.bin"),
            ("empty.bin", "empty.bin"),
            ("c.bin", "c.bin"),
        ]
        .iter()
        .map(|(name, file)| (name.to_string(), fixture(file).unwrap()))
        .collect();
        assert_eq!(entries, expected);
    }

    #[tokio::test]
    async fn test_failed_item_is_left_out() {
        let upstream = Upstream::start().await;
        let items = vec![
            DownloadItem::new(upstream.url("/files/a.bin"), "a.bin"),
            DownloadItem::new(upstream.url("/files/missing"), "b.bin"),
            DownloadItem::new(upstream.url("/files/c.bin"), "c.bin"),
        ];

        let stream = assemble(
            source(&upstream, &items, FetchMode::FullContent),
            &[],
            &ArchiveOptions::default(),
        );
        let names: Vec<String> = entries(collect(stream).await.unwrap())
            .into_iter()
            .map(|(name, _)| name)
            .collect();

        assert_eq!(names, vec!["a.bin", "c.bin"]);
    }

    #[tokio::test]
    async fn test_deflate_round_trips_large_entry() {
        let upstream = Upstream::start().await;
        let items = vec![DownloadItem::new(upstream.url("/files/big.bin"), "big.bin")];
        let options = ArchiveOptions {
            compression: EntryCompression::Deflate,
            buffer_size: 8 * 1024,
        };

        let stream = assemble(source(&upstream, &items, FetchMode::FullContent), &[], &options);
        let entries = entries(collect(stream).await.unwrap());

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1, fixture("big.bin").unwrap());
    }

    #[tokio::test]
    async fn test_metadata_is_stored_as_archive_comment() {
        let upstream = Upstream::start().await;
        let items = vec![
            DownloadItem::new(upstream.url("/files/a.bin"), "a.bin"),
            DownloadItem::new(upstream.url("/files/c.bin"), "c.bin"),
        ];

        let metadata = collect_metadata(source(&upstream, &items, FetchMode::HeadersOnly)).await;
        let stream = assemble(
            source(&upstream, &items, FetchMode::FullContent),
            &metadata,
            &ArchiveOptions::default(),
        );
        let bytes = collect(stream).await.unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);
        let comment: serde_json::Value = serde_json::from_slice(archive.comment()).unwrap();
        assert_eq!(comment.as_array().unwrap().len(), 2);
        assert_eq!(comment[0]["name"], "a.bin");
        assert_eq!(comment[1]["size"], fixture("c.bin").unwrap().len());
        assert!(archive.by_name("a.bin").is_ok());
    }

    #[tokio::test]
    async fn test_dropping_the_stream_stops_fetching() {
        let upstream = Upstream::start().await;
        let items = vec![
            DownloadItem::new(upstream.url("/files/big.bin"), "big.bin"),
            DownloadItem::new(upstream.url("/files/a.bin"), "a.bin"),
            DownloadItem::new(upstream.url("/files/c.bin"), "c.bin"),
        ];
        let options = ArchiveOptions {
            compression: EntryCompression::Stored,
            buffer_size: 4 * 1024,
        };

        let mut stream = assemble(source(&upstream, &items, FetchMode::FullContent), &[], &options);
        let first = stream.next().await.unwrap().unwrap();
        assert!(!first.is_empty());
        drop(stream);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(upstream.paths_for(Method::GET), vec!["/files/big.bin"]);
    }

    #[tokio::test]
    async fn test_dropping_abandons_hung_request() {
        let upstream = Upstream::start().await;
        let items = vec![
            DownloadItem::new(upstream.url("/files/a.bin"), "a.bin"),
            DownloadItem::new(upstream.url("/hang"), "hang.bin"),
            DownloadItem::new(upstream.url("/files/c.bin"), "c.bin"),
        ];

        let mut stream = assemble(
            source(&upstream, &items, FetchMode::FullContent),
            &[],
            &ArchiveOptions::default(),
        );

        // a.bin arrives, then the stream stalls on the hung item
        let drained = tokio::time::timeout(Duration::from_millis(300), async {
            while let Some(chunk) = stream.next().await {
                chunk.unwrap();
            }
        })
        .await;
        assert!(drained.is_err());
        drop(stream);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(upstream.paths_for(Method::GET), vec!["/files/a.bin", "/hang"]);
    }

    #[test]
    fn test_oversized_metadata_is_dropped() {
        let record = MetadataRecord {
            name: "a".repeat(MAX_COMMENT_LEN),
            url: "https://x/a".into(),
            size: None,
            content_type: None,
            last_modified: None,
            extra: serde_json::Map::new(),
        };
        assert!(archive_comment(&[record]).is_none());
        assert!(archive_comment(&[]).is_none());
    }
}

//! Interception of archive download requests.
//!
//! A download page POSTs a form to `<prefix><name>`; the `payload` field holds
//! the JSON manifest. The worker answers with a ZIP of every item it could
//! fetch, streamed while it is being built. `<prefix><keepalive token>` is a
//! bare liveness probe. Anything else, including any request addressed to
//! another origin, goes on to the static site untouched.

use super::error::ApiError;
use super::AppState;
use crate::archive::{assemble, collect_metadata, MetadataRecord};
use crate::config::InterceptConfig;
use crate::daemon::DownloadGuard;
use crate::fetch::{FetchItemSource, FetchMode};
use crate::manifest::{Manifest, ManifestError};
use axum::body::Body;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Form;
use reqwest::Url;
use std::collections::HashMap;
use tracing::{info, Instrument};

/// Number of items the prepass found, i.e. the entries the archive will hold
/// if every fetch succeeds again.
pub const ARCHIVE_ENTRIES_HEADER: &str = "x-archive-entries";

/// Sum of the entry body sizes reported by the prepass. This is not the
/// length of the archive: ZIP headers, the central directory and any
/// compression all change the byte count on the wire, so it is no progress
/// total. Omitted when any size is unknown or the sum overflows.
pub const ARCHIVE_SIZE_HINT_HEADER: &str = "x-archive-size-hint";

/// What to do with an incoming request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
    PassThrough,
    Keepalive,
    Download { name: String },
}

/// Decide whether a request is ours. Never looks at the body.
pub fn classify(
    uri: &Uri,
    headers: &HeaderMap,
    intercept: &InterceptConfig,
    public_origin: Option<&Url>,
) -> Interception {
    let Some(name) = strip_prefix_ignore_case(uri.path(), &intercept.prefix) else {
        return Interception::PassThrough;
    };
    if name.is_empty() || !is_same_origin(uri, headers, intercept, public_origin) {
        return Interception::PassThrough;
    }

    if name == intercept.keepalive_token {
        Interception::Keepalive
    } else {
        Interception::Download {
            name: name.to_string(),
        }
    }
}

fn strip_prefix_ignore_case<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let head = path.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &path[prefix.len()..])
}

/// Our origin: the configured public origin, else whatever host the request
/// was addressed to.
fn own_origin(headers: &HeaderMap, public_origin: Option<&Url>) -> Option<Url> {
    if let Some(origin) = public_origin {
        return Some(origin.clone());
    }
    let host = headers.get(header::HOST)?.to_str().ok()?;
    Url::parse(&format!("http://{}", host)).ok()
}

/// Whether the request is addressed to our origin. Only an absolute request
/// target names another one; with `check_origin_header` a foreign `Origin`
/// header also counts. Requests carrying neither are treated as our own.
fn is_same_origin(
    uri: &Uri,
    headers: &HeaderMap,
    intercept: &InterceptConfig,
    public_origin: Option<&Url>,
) -> bool {
    let claimed = if uri.scheme().is_some() && uri.authority().is_some() {
        Some(uri.to_string())
    } else if intercept.check_origin_header {
        headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    } else {
        None
    };

    let Some(claimed) = claimed else {
        return true;
    };
    // An opaque origin ("null") or garbage never matches
    let Ok(claimed) = Url::parse(&claimed) else {
        return false;
    };

    match own_origin(headers, public_origin) {
        Some(own) => claimed.origin() == own.origin(),
        None => false,
    }
}

/// Middleware answering intercepted requests; everything else continues to
/// `next`.
pub async fn intercept(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let interception = classify(
        request.uri(),
        request.headers(),
        &state.config.intercept,
        state.public_origin.as_ref(),
    );

    match interception {
        Interception::PassThrough => next.run(request).await,
        Interception::Keepalive => {
            state.context.touch();
            (StatusCode::OK, "OK").into_response()
        }
        Interception::Download { name } => {
            let guard = state.context.download_started();
            let span = tracing::info_span!(
                "download",
                request_id = %uuid::Uuid::new_v4(),
                name = %name
            );
            download(state, request, name, guard)
                .instrument(span)
                .await
                .unwrap_or_else(IntoResponse::into_response)
        }
    }
}

/// `guard` keeps the download counted as in flight through the prepass and
/// for as long as the archive streams.
async fn download(
    state: AppState,
    request: Request,
    name: String,
    guard: DownloadGuard,
) -> Result<Response, ApiError> {
    let base = own_origin(request.headers(), state.public_origin.as_ref())
        .or_else(|| Url::parse(&state.config.own_origin()).ok())
        .ok_or_else(|| anyhow::anyhow!("cannot determine the worker origin"))?;

    let payload = read_payload(request, &state.config.intercept.payload_field).await?;
    let manifest = Manifest::from_json(&payload)?;
    info!(items = manifest.len(), "Download request");

    let metadata = if state.config.archive.prepass {
        let probe = FetchItemSource::new(
            state.client.clone(),
            base.clone(),
            manifest.clone(),
            FetchMode::HeadersOnly,
        );
        collect_metadata(probe).await
    } else {
        Vec::new()
    };

    let source = FetchItemSource::new(state.client.clone(), base, manifest, FetchMode::FullContent);

    let archive = assemble(source, &metadata, &state.options).on_finish(move || drop(guard));

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CACHE_CONTROL, "no-store");

    if let Some(disposition) = content_disposition(&name) {
        builder = builder.header(header::CONTENT_DISPOSITION, disposition);
    }
    if state.config.archive.prepass {
        builder = builder.header(ARCHIVE_ENTRIES_HEADER, metadata.len());
        if let Some(total) = MetadataRecord::total_size(&metadata) {
            builder = builder.header(ARCHIVE_SIZE_HINT_HEADER, total);
        }
    }

    builder
        .body(Body::from_stream(archive))
        .map_err(|e| ApiError::Internal(e.into()))
}

/// `attachment; filename="<name>"`, or `None` if the name cannot be a header
fn content_disposition(name: &str) -> Option<HeaderValue> {
    let file_name = name.rsplit('/').find(|s| !s.is_empty())?;
    let escaped: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    HeaderValue::from_str(&format!("attachment; filename=\"{}\"", escaped)).ok()
}

/// The manifest form field, from a multipart or urlencoded body.
async fn read_payload(request: Request, field: &str) -> Result<String, ManifestError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| ManifestError::Form(e.body_text()))?;

        while let Some(part) = multipart
            .next_field()
            .await
            .map_err(|e| ManifestError::Form(e.body_text()))?
        {
            if part.name() == Some(field) {
                return part.text().await.map_err(|e| ManifestError::Form(e.body_text()));
            }
        }
        Err(ManifestError::MissingPayload(field.to_string()))
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(mut fields) = Form::<HashMap<String, String>>::from_request(request, &())
            .await
            .map_err(|e| ManifestError::Form(e.body_text()))?;

        fields
            .remove(field)
            .ok_or_else(|| ManifestError::MissingPayload(field.to_string()))
    } else {
        Err(ManifestError::Form(format!(
            "unsupported content type `{}`",
            content_type
        )))
    }
}

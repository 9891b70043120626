//! In-process upstream used by the tests: serves fixture files, a failing
//! path, a path that never answers and one that breaks off mid-body, and
//! records every request it sees.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

pub const LAST_MODIFIED: &str = "Wed, 21 Oct 2015 07:28:00 GMT";

// `/truncated` announces TRUNCATED_LENGTH bytes, sends TRUNCATED_SENT, then resets
const TRUNCATED_SENT: usize = 1000;
const TRUNCATED_LENGTH: usize = 10_000;

pub type RequestLog = Arc<Mutex<Vec<(Method, String)>>>;

pub struct Upstream {
    pub addr: SocketAddr,
    requests: RequestLog,
}

/// Body served for `/files/{name}`; unknown names are 404.
pub fn fixture(name: &str) -> Option<Vec<u8>> {
    match name {
        "a.bin" => Some(b"alpha payload".to_vec()),
        "b.bin" => Some(b"bravo payload, a bit longer".to_vec()),
        "c.bin" => Some(b"charlie".to_vec()),
        "empty.bin" => Some(Vec::new()),
        "big.bin" => Some((0..1024 * 1024).map(|i| (i % 251) as u8).collect()),
        _ => None,
    }
}

async fn serve_file(
    State(requests): State<RequestLog>,
    method: Method,
    Path(name): Path<String>,
) -> Response {
    requests
        .lock()
        .unwrap()
        .push((method, format!("/files/{}", name)));

    match fixture(&name) {
        Some(body) => {
            let len = body.len();
            let mut response = body.into_response();
            let headers = response.headers_mut();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
            headers.insert(header::LAST_MODIFIED, HeaderValue::from_static(LAST_MODIFIED));
            response
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn hang(State(requests): State<RequestLog>, method: Method) -> Response {
    requests.lock().unwrap().push((method, "/hang".to_string()));
    std::future::pending::<()>().await;
    StatusCode::OK.into_response()
}

/// Headers and the first chunk go out, then the connection is torn down
async fn truncated(State(requests): State<RequestLog>, method: Method) -> Response {
    requests.lock().unwrap().push((method, "/truncated".to_string()));

    let chunks = vec![
        Ok(Bytes::from(vec![7u8; TRUNCATED_SENT])),
        Err(std::io::Error::other("upstream reset")),
    ];
    let body = stream::iter(chunks).then(|chunk| async move {
        if chunk.is_err() {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        chunk
    });

    let mut response = Body::from_stream(body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(TRUNCATED_LENGTH));
    response
}

impl Upstream {
    pub async fn start() -> Self {
        let requests: RequestLog = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/files/{name}", get(serve_file))
            .route("/hang", get(hang))
            .route("/truncated", get(truncated))
            .with_state(requests.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn base(&self) -> reqwest::Url {
        reqwest::Url::parse(&self.url("/")).unwrap()
    }

    /// Requests seen so far, in arrival order
    pub fn requests(&self) -> Vec<(Method, String)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn paths_for(&self, method: Method) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|(m, _)| *m == method)
            .map(|(_, path)| path)
            .collect()
    }
}

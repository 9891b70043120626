//! HTTP surface of the worker.
//!
//! Every request first passes the interception middleware; whatever it does
//! not claim falls through to the static site.

pub mod error;
pub mod intercept;

use crate::archive::ArchiveOptions;
use crate::config::Config;
use crate::daemon::WorkerContext;
use crate::fetch::build_client;
use crate::utils::{Result, WorkerError};
use axum::extract::DefaultBodyLimit;
use axum::{middleware, Router};
use reqwest::{Client, Url};
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub client: Client,
    pub context: Arc<WorkerContext>,
    pub options: ArchiveOptions,
    /// Configured public origin, if any
    pub public_origin: Option<Url>,
}

/// Create shared application state, validating the config on the way
pub fn create_app_state(config: Config, context: Arc<WorkerContext>) -> Result<AppState> {
    let options = ArchiveOptions::try_from(&config.archive)?;
    let client = build_client(&config.archive.user_agent)?;

    let public_origin = match &config.server.public_origin {
        Some(origin) => Some(
            Url::parse(origin)
                .map_err(|e| WorkerError::Config(format!("public_origin `{}`: {}", origin, e)))?,
        ),
        None => None,
    };

    if !config.intercept.prefix.starts_with('/') {
        return Err(WorkerError::Config(format!(
            "intercept prefix `{}` must start with '/'",
            config.intercept.prefix
        )));
    }

    Ok(AppState {
        config: Arc::new(config),
        client,
        context,
        options,
        public_origin,
    })
}

/// Create the router: interception in front of the static site
pub fn create_router(state: AppState) -> Router {
    let site = ServeDir::new(&state.config.site.root);
    // Outside the middleware so the form extractors it runs see the limit
    let body_limit = DefaultBodyLimit::max(state.config.intercept.max_body_bytes);

    Router::new()
        .fallback_service(site)
        .layer(middleware::from_fn_with_state(state, intercept::intercept))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
}

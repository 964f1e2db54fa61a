/// HTTP surface: `GET /content`, `POST /update`, `GET /health`.
mod routes;

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::crawler::scheduler::CrawlState;
use crate::crawler::Pipeline;
use crate::query::QueryEngine;
use crate::updates::UpdateJob;

/// Protocol version advertised on every response.
pub const PROTOCOL_HEADER: &str = "x-sitefeed-protocol";
pub const PROTOCOL_VERSION: &str = "1";

#[derive(Clone)]
pub struct AppContext {
    pub engine: Arc<QueryEngine>,
    pub pipeline: Pipeline,
    pub cache: Arc<ResponseCache>,
    pub config: Arc<Config>,
    pub crawl_state: Arc<CrawlState>,
    pub update_tx: mpsc::Sender<UpdateJob>,
}

pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/content", get(routes::get_content))
        .route("/update", post(routes::post_update))
        .route("/health", get(routes::get_health))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static(PROTOCOL_HEADER),
            HeaderValue::from_static(PROTOCOL_VERSION),
        ))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

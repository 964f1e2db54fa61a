use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::error;

use crate::query::{ContentParams, QueryError, SCHEMA_TAG};
use crate::updates::{self, UpdateJob, UpdateRequest};

use super::AppContext;

/// Error codes exposed in the response envelope.
#[derive(Debug, Clone, Copy)]
enum ErrorCode {
    InvalidParameter,
    NotFound,
    Unauthorized,
    QueueFull,
    Internal,
}

impl ErrorCode {
    fn as_str(self) -> &'static str {
        match self {
            Self::InvalidParameter => "invalid_parameter",
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::QueueFull => "queue_full",
            Self::Internal => "internal",
        }
    }

    fn status(self) -> StatusCode {
        match self {
            Self::InvalidParameter => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn error_response(code: ErrorCode, message: &str) -> Response {
    let body = json!({
        "schema": SCHEMA_TAG,
        "error": { "code": code.as_str(), "message": message },
    });
    (code.status(), Json(body)).into_response()
}

pub async fn get_content(
    State(ctx): State<AppContext>,
    params: Result<Query<ContentParams>, QueryRejection>,
    headers: HeaderMap,
) -> Response {
    // Undeserializable query strings get the same envelope as semantic
    // parameter errors, not the extractor's plain-text rejection.
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => {
            return error_response(ErrorCode::InvalidParameter, &rejection.body_text())
        }
    };

    let body = match ctx.engine.content(&params).await {
        Ok(body) => body,
        Err(QueryError::InvalidParameter(msg)) => {
            return error_response(ErrorCode::InvalidParameter, &msg)
        }
        Err(QueryError::NotFound(msg)) => return error_response(ErrorCode::NotFound, &msg),
        Err(QueryError::Internal(e)) => {
            error!("Content query failed: {e:#}");
            return error_response(ErrorCode::Internal, "internal error");
        }
    };

    // meta carries per-response cache bookkeeping (cached, cache_age_seconds),
    // so the fingerprint must exclude it or revalidation can never match.
    let fingerprint = {
        let mut payload = body.clone();
        if let Some(obj) = payload.as_object_mut() {
            obj.remove("meta");
        }
        payload.to_string()
    };
    let etag = format!("\"{}\"", hex_sha256(fingerprint.as_bytes()));

    let revalidated = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|tag| tag.trim() == etag));

    let cache_control = format!("public, max-age={}", ctx.cache.ttl_secs());
    let headers = [
        (header::ETAG, etag),
        (header::CACHE_CONTROL, cache_control),
    ];

    if revalidated {
        (StatusCode::NOT_MODIFIED, headers).into_response()
    } else {
        (StatusCode::OK, headers, Json(body)).into_response()
    }
}

pub async fn post_update(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(request): Json<UpdateRequest>,
) -> Response {
    if let Some(expected) = ctx.config.update_token.as_deref() {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(expected) {
            return error_response(ErrorCode::Unauthorized, "invalid or missing bearer token");
        }
    }

    if request.urls.len() > ctx.config.serve.inline_update_max {
        let job = UpdateJob {
            action: request.action,
            urls: request.urls,
        };
        return match ctx.update_tx.try_send(job) {
            Ok(()) => Json(json!({
                "schema": SCHEMA_TAG,
                "status": "queued",
                "processed": 0,
                "errors": [],
            }))
            .into_response(),
            Err(_) => error_response(ErrorCode::QueueFull, "update queue is full"),
        };
    }

    let report = updates::apply_batch(&ctx.pipeline, &ctx.cache, request.action, &request.urls).await;
    Json(json!({
        "schema": SCHEMA_TAG,
        "status": "ok",
        "processed": report.processed,
        "errors": report.errors,
    }))
    .into_response()
}

pub async fn get_health(State(ctx): State<AppContext>) -> Json<Value> {
    let (running, last_crawl) = ctx.crawl_state.snapshot();
    Json(json!({
        "status": "ok",
        "last_crawl": last_crawl,
        "crawl_running": running,
    }))
}

fn hex_sha256(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

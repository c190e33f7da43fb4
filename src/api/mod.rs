use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::analysis::timeline::{SimulatedTimeline, DEFAULT_EVENTS};
use crate::cache::CacheStats;
use crate::classifier::{ClassifiedError, ErrorContext, ErrorKind};
use crate::models::{AnalysisRequest, NetworkIdentity};
use crate::pipeline::{AnalysisResponse, AppContext};
use crate::stats::StatsSnapshot;

#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<AppContext>,
    pub default_network_id: u64,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct NetworksResponse {
    networks: &'static [NetworkIdentity],
}

#[derive(Deserialize)]
struct InvalidateRequest {
    pattern: String,
}

#[derive(Serialize)]
struct InvalidateResponse {
    removed: usize,
}

#[derive(Deserialize)]
struct TimelineParams {
    network: Option<u64>,
    limit: Option<usize>,
}

type ApiReply = (StatusCode, Json<AnalysisResponse>);

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationError | ErrorKind::ChainError => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::DatabaseError => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_reply(err: ClassifiedError) -> ApiReply {
    (status_for(err.kind), Json(AnalysisResponse::failure(err)))
}

fn bad_request(message: String, operation: &str) -> ApiReply {
    error_reply(ClassifiedError::new(
        ErrorKind::ValidationError,
        message,
        ErrorContext {
            operation: Some(operation.to_string()),
            ..Default::default()
        },
    ))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn networks(State(state): State<AppState>) -> Json<NetworksResponse> {
    Json(NetworksResponse {
        networks: state.ctx.chains.all(),
    })
}

async fn analyze(
    State(state): State<AppState>,
    body: Result<Json<AnalysisRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return bad_request(rejection.body_text(), "parse request").into_response(),
    };
    let response = state.ctx.analyze(request).await;
    let status = response
        .failure
        .as_ref()
        .map(|f| status_for(f.kind))
        .unwrap_or(StatusCode::OK);
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = retry_after_secs(state.ctx.limiter.wait_time());
        return (
            status,
            [(header::RETRY_AFTER, retry_after.to_string())],
            Json(response),
        )
            .into_response();
    }
    (status, Json(response)).into_response()
}

/// Whole seconds for a `Retry-After` header, never less than one.
fn retry_after_secs(wait: Duration) -> u64 {
    (wait.as_secs_f64().ceil() as u64).max(1)
}

async fn pipeline_stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.ctx.stats())
}

async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.ctx.cache_stats())
}

async fn invalidate_cache(
    State(state): State<AppState>,
    body: Result<Json<InvalidateRequest>, JsonRejection>,
) -> Result<Json<InvalidateResponse>, ApiReply> {
    let Json(request) = body.map_err(|r| bad_request(r.body_text(), "invalidate cache"))?;
    let pattern = Regex::new(&request.pattern)
        .map_err(|err| bad_request(format!("malformed pattern: {}", err), "invalidate cache"))?;
    Ok(Json(InvalidateResponse {
        removed: state.ctx.cache.invalidate_pattern(&pattern),
    }))
}

async fn address_timeline(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(params): Query<TimelineParams>,
) -> Result<Json<SimulatedTimeline>, ApiReply> {
    let network_id = params.network.unwrap_or(state.default_network_id);
    state
        .ctx
        .simulated_timeline(&address, network_id, params.limit.unwrap_or(DEFAULT_EVENTS))
        .map(Json)
        .map_err(error_reply)
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/networks", get(networks))
        .route("/analyze", post(analyze))
        .route("/stats", get(pipeline_stats))
        .route("/cache/stats", get(cache_stats))
        .route("/cache/invalidate", post(invalidate_cache))
        .route("/address/:address/timeline", get(address_timeline))
        .with_state(state)
}

pub async fn run_http_server(addr: &str, state: AppState) -> Result<()> {
    let app = app_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_rounds_up_to_whole_seconds() {
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(300)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1_200)), 2);
    }

    #[test]
    fn error_kinds_map_to_statuses() {
        assert_eq!(status_for(ErrorKind::ValidationError), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::RateLimit), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for(ErrorKind::Timeout), StatusCode::GATEWAY_TIMEOUT);
    }
}

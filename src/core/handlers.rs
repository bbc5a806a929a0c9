use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::{BytesRejection, JsonRejection};
use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router as AxumRouter};
use bytes::Bytes;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::config::{ConfigManager, GatewayConfig, SettingsUpdate};
use crate::core::gateway::GatewayState;
use crate::core::request::GatewayRequest;
use crate::core::router::Router;
use crate::error::GatewayError;
use crate::middleware::auth::{IssuedCredential, NewCredential};
use crate::models::{Credential, Route, Service, Stats, TrafficDataPoint};
use crate::stats::analytics::{AnalyticsSnapshot, ErrorTypeCount, Granularity, LatencyCount, PathCount};

type Shared = State<Arc<GatewayState>>;
type ApiResult<T> = Result<T, GatewayError>;

/// Management API under `/api`, liveness at `/healthz`, everything else proxied
pub fn router(state: Arc<GatewayState>) -> AxumRouter {
    let body_limit = state.body_limit;

    AxumRouter::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/api/routes", get(list_routes).post(create_route))
        .route(
            "/api/routes/:id",
            get(get_route).put(update_route).delete(delete_route),
        )
        .route("/api/routes/:id/credentials", get(route_credentials))
        .route("/api/stats", get(get_stats))
        .route("/api/services", get(list_services))
        .route("/api/health", get(check_health).post(check_health))
        .route("/api/config", get(get_config).put(update_config))
        .route("/api/credentials", get(list_credentials).post(create_credential))
        .route("/api/credentials/:id", delete(delete_credential))
        .route("/api/analytics/traffic", get(traffic))
        .route("/api/analytics/paths", get(path_distribution))
        .route("/api/analytics/errors", get(error_types))
        .route("/api/analytics/latency", get(latency_distribution))
        .route("/api/analytics/export", get(export_analytics))
        .route("/api/analytics/import", post(import_analytics))
        .fallback(proxy_request)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| GatewayError::Validation(rejection.body_text()))
}

async fn list_routes(State(state): Shared) -> Json<Vec<Route>> {
    Json(state.routes.list().await)
}

async fn create_route(
    State(state): Shared,
    body: Result<Json<Route>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Route>)> {
    let route = json_body(body)?;
    let id = state.routes.add(route).await?;
    let route = state
        .routes
        .get(id)
        .await
        .ok_or_else(|| GatewayError::InternalError(format!("route {} vanished", id)))?;

    state.route_changed(None, &route).await;
    state.persist_routes().await?;

    tracing::info!(id, path = %route.path, target = %route.target, "Route created");
    Ok((StatusCode::CREATED, Json(route)))
}

async fn get_route(State(state): Shared, Path(id): Path<u64>) -> ApiResult<Json<Route>> {
    state
        .routes
        .get(id)
        .await
        .map(Json)
        .ok_or_else(|| GatewayError::NotFound(format!("route {}", id)))
}

async fn update_route(
    State(state): Shared,
    Path(id): Path<u64>,
    body: Result<Json<Route>, JsonRejection>,
) -> ApiResult<Json<Route>> {
    let mut route = json_body(body)?;
    route.id = id;

    let previous = state.routes.get(id).await;
    if !state.routes.update(route.clone()).await? {
        return Err(GatewayError::NotFound(format!("route {}", id)));
    }

    state.route_changed(previous.as_ref(), &route).await;
    state.persist_routes().await?;

    tracing::info!(id, path = %route.path, "Route updated");
    Ok(Json(route))
}

async fn delete_route(State(state): Shared, Path(id): Path<u64>) -> ApiResult<StatusCode> {
    let Some(route) = state.routes.get(id).await else {
        return Err(GatewayError::NotFound(format!("route {}", id)));
    };
    if !state.routes.delete(id).await {
        return Err(GatewayError::NotFound(format!("route {}", id)));
    }

    state.limiter.forget(&route.path).await;
    state.persist_routes().await?;
    if state.credentials.remove_route(id).await > 0 {
        state.persist_credentials().await?;
    }

    tracing::info!(id, path = %route.path, "Route deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn route_credentials(
    State(state): Shared,
    Path(id): Path<u64>,
) -> ApiResult<Json<Vec<Credential>>> {
    if state.routes.get(id).await.is_none() {
        return Err(GatewayError::NotFound(format!("route {}", id)));
    }
    Ok(Json(state.credentials.list_for_route(id).await))
}

async fn get_stats(State(state): Shared) -> Json<Stats> {
    Json(state.stats.snapshot().await)
}

async fn list_services(State(state): Shared) -> Json<Vec<Service>> {
    Json(state.monitor.services().await)
}

async fn check_health(State(state): Shared) -> Json<Vec<Service>> {
    Json(state.monitor.check_all().await)
}

async fn get_config(State(state): Shared) -> Json<GatewayConfig> {
    Json(state.config.get_config().await.settings())
}

async fn update_config(
    State(state): Shared,
    body: Result<Json<SettingsUpdate>, JsonRejection>,
) -> ApiResult<Json<GatewayConfig>> {
    let update = json_body(body)?;
    Ok(Json(state.apply_settings(update).await?))
}

async fn list_credentials(State(state): Shared) -> Json<Vec<Credential>> {
    Json(state.credentials.list().await)
}

async fn create_credential(
    State(state): Shared,
    body: Result<Json<NewCredential>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<IssuedCredential>)> {
    let new = json_body(body)?;
    if state.routes.get(new.route_id).await.is_none() {
        return Err(GatewayError::NotFound(format!("route {}", new.route_id)));
    }

    let issued = state.credentials.add(new).await?;
    state.persist_credentials().await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

async fn delete_credential(State(state): Shared, Path(id): Path<u64>) -> ApiResult<StatusCode> {
    if !state.credentials.delete(id).await {
        return Err(GatewayError::NotFound(format!("credential {}", id)));
    }
    state.persist_credentials().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct TrafficQuery {
    range: Option<String>,
}

async fn traffic(
    State(state): Shared,
    Query(query): Query<TrafficQuery>,
) -> ApiResult<Json<Vec<TrafficDataPoint>>> {
    let granularity = match query.range.as_deref() {
        Some(range) => range.parse::<Granularity>()?,
        None => Granularity::Minute,
    };
    Ok(Json(state.stats.traffic_series(granularity).await))
}

async fn path_distribution(State(state): Shared) -> Json<Vec<PathCount>> {
    Json(state.stats.path_distribution().await)
}

async fn error_types(State(state): Shared) -> Json<Vec<ErrorTypeCount>> {
    Json(state.stats.error_types().await)
}

async fn latency_distribution(State(state): Shared) -> Json<Vec<LatencyCount>> {
    Json(state.stats.latency_distribution().await)
}

async fn export_analytics(State(state): Shared) -> Json<AnalyticsSnapshot> {
    Json(state.stats.export().await)
}

async fn import_analytics(
    State(state): Shared,
    body: Result<Json<AnalyticsSnapshot>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let snapshot = json_body(body)?;
    state.stats.import(snapshot).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Catch-all: convert to a gateway request and run it through the pipeline
async fn proxy_request(
    State(state): Shared,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(bytes) => bytes,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            tracing::warn!(path = %uri.path(), limit = state.body_limit, "Request body too large");
            return GatewayError::PayloadTooLarge(state.body_limit).into_response();
        }
        Err(rejection) => {
            tracing::error!("Failed to read request body: {}", rejection.body_text());
            return GatewayError::InvalidRequest(rejection.body_text()).into_response();
        }
    };

    let client_ip = connect_info.map(|ConnectInfo(addr)| addr.ip());
    let request = GatewayRequest::new(method, uri, headers, body, client_ip);

    match state.dispatch(request).await {
        Ok(response) => response.into_response(),
        Err(error) => error.into_response(),
    }
}

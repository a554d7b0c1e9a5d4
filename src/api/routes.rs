//! API routes.
//!
//! Scan endpoints stream the newline-delimited protocol; everything else
//! is plain request/response JSON.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::analyzer::{StationAnalyzer, StationScanParams};
use crate::api::stream::{ndjson_response, ScanPersist};
use crate::context::AppContext;
use crate::dashboard::{DashboardAggregator, DashboardParams};
use crate::esi::{AuthError, StaticToken};
use crate::execution::{ExecutionPlanner, ExecutionPlanParams};
use crate::models::TypeId;
use crate::scanners::{
    ContractScanParams, ContractScanner, FlipScanParams, FlipScanner, RouteFinder,
    RouteScanParams,
};
use crate::storage::{ScanRecord, WatchlistEntry};

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/scan/flip", post(scan_flip))
        .route("/api/scan/contracts", post(scan_contracts))
        .route("/api/scan/station", post(scan_station))
        .route("/api/scan/routes", post(scan_routes))
        .route("/api/scan/history", get(scan_history))
        .route("/api/plan/execution", post(plan_execution))
        .route("/api/dashboard", post(dashboard))
        .route("/api/watchlist", get(get_watchlist).post(add_watchlist))
        .route(
            "/api/watchlist/:type_id",
            axum::routing::delete(remove_watchlist),
        )
        .route("/api/config/:key", get(get_config).put(put_config))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(ctx)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

// --- streaming scans ----------------------------------------------------

async fn scan_flip(
    State(ctx): State<Arc<AppContext>>,
    Json(params): Json<FlipScanParams>,
) -> Response {
    let params_json = json!({
        "origin_system": params.origin_system,
        "buy_radius": params.buy_radius,
        "sell_radius": params.sell_radius,
        "cargo_m3": params.cargo_m3,
    })
    .to_string();
    let persist = ScanPersist {
        storage: ctx.storage.clone(),
        kind: "flip",
        params_json,
    };
    ndjson_response(
        move |progress, cancel| async move {
            FlipScanner::new(ctx).scan(&params, &progress, &cancel).await
        },
        Some(persist),
    )
}

async fn scan_contracts(
    State(ctx): State<Arc<AppContext>>,
    Json(params): Json<ContractScanParams>,
) -> Response {
    let params_json = json!({
        "origin_system": params.origin_system,
        "radius": params.radius,
    })
    .to_string();
    let persist = ScanPersist {
        storage: ctx.storage.clone(),
        kind: "contracts",
        params_json,
    };
    ndjson_response(
        move |progress, cancel| async move {
            ContractScanner::new(ctx)
                .scan(&params, &progress, &cancel)
                .await
        },
        Some(persist),
    )
}

async fn scan_station(
    State(ctx): State<Arc<AppContext>>,
    Json(params): Json<StationScanParams>,
) -> Response {
    ndjson_response(
        move |progress, cancel| async move {
            let analyzer =
                StationAnalyzer::new(ctx.esi.clone(), ctx.history.clone(), ctx.catalog.clone());
            let report = analyzer.analyze(&params, &progress, &cancel).await?;
            Ok(report.opportunities)
        },
        None,
    )
}

async fn scan_routes(
    State(ctx): State<Arc<AppContext>>,
    Json(params): Json<RouteScanParams>,
) -> Response {
    ndjson_response(
        move |progress, cancel| async move {
            RouteFinder::new(ctx).scan(&params, &progress, &cancel).await
        },
        None,
    )
}

// --- plain JSON endpoints -----------------------------------------------

async fn plan_execution(
    State(ctx): State<Arc<AppContext>>,
    Json(params): Json<ExecutionPlanParams>,
) -> Response {
    let planner = ExecutionPlanner::new(ctx.esi.clone(), ctx.history.clone());
    match planner.plan(&params).await {
        Ok(plan) => Json(plan).into_response(),
        Err(e) => {
            error!(error = %e, "execution plan failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": format!("{:#}", e)})),
            )
                .into_response()
        }
    }
}

async fn dashboard(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(params): Json<DashboardParams>,
) -> Response {
    // SSO lives outside this process; the boundary just relays whatever
    // currently-valid bearer token the caller presents.
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    let Some(token) = token else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "missing bearer token"})),
        )
            .into_response();
    };

    let aggregator = DashboardAggregator::new(ctx);
    match aggregator.aggregate(&params, &StaticToken(token)).await {
        Ok(dashboard) => Json(dashboard).into_response(),
        Err(e) if e.downcast_ref::<AuthError>().is_some() => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": format!("{:#}", e)})),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "dashboard aggregation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": format!("{:#}", e)})),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn scan_history(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ScanRecord>>, StatusCode> {
    ctx.storage
        .recent_scans(query.limit.unwrap_or(50))
        .map(Json)
        .map_err(|e| {
            error!(error = %e, "scan history read failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

// --- watchlist ----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WatchRequest {
    type_id: TypeId,
    note: Option<String>,
}

async fn get_watchlist(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<Vec<WatchlistEntry>>, StatusCode> {
    ctx.storage
        .watchlist()
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn add_watchlist(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<WatchRequest>,
) -> Result<StatusCode, StatusCode> {
    ctx.storage
        .add_watch(request.type_id, request.note.as_deref())
        .map(|_| StatusCode::CREATED)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn remove_watchlist(
    State(ctx): State<Arc<AppContext>>,
    Path(type_id): Path<TypeId>,
) -> Result<StatusCode, StatusCode> {
    match ctx.storage.remove_watch(type_id) {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

// --- config key-value ---------------------------------------------------

#[derive(Debug, Serialize)]
struct ConfigResponse {
    key: String,
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConfigUpdate {
    value: String,
}

async fn get_config(
    State(ctx): State<Arc<AppContext>>,
    Path(key): Path<String>,
) -> Result<Json<ConfigResponse>, StatusCode> {
    ctx.storage
        .get_config(&key)
        .map(|value| Json(ConfigResponse { key, value }))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn put_config(
    State(ctx): State<Arc<AppContext>>,
    Path(key): Path<String>,
    Json(update): Json<ConfigUpdate>,
) -> Result<StatusCode, StatusCode> {
    ctx.storage
        .set_config(&key, &update.value)
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

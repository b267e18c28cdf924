//! Admin HTTP endpoints
//!
//! Operator-facing routes for inspecting and auditing the ledger. Not part
//! of the end-user review API.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::chain::verify::{ChainVerifier, VerifyMode};
use crate::config::AppConfig;
use crate::error::LedgerError;
use crate::store::LedgerStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub default_mode: VerifyMode,
}

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    pub mode: Option<String>,
    pub from: Option<u64>,
}

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ledger/tail", get(ledger_tail))
        .route("/ledger/verify", get(verify_ledger))
        .route("/ledger/records/:id/verify", get(verify_record))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(state)
}

pub async fn serve(config: &AppConfig, store: Arc<dyn LedgerStore>) -> anyhow::Result<()> {
    let state = AppState {
        store,
        default_mode: config.default_verify_mode,
    };
    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    info!("Admin server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn error_response(err: LedgerError) -> (StatusCode, Json<Value>) {
    let status = match &err {
        LedgerError::RecordNotFound(_) | LedgerError::BlockNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::ConfigError(_) | LedgerError::InvalidRecord(_) => StatusCode::BAD_REQUEST,
        _ => {
            error!("Ledger request failed: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(serde_json::json!({ "error": err.to_string() })))
}

async fn health_check() -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "review-ledger",
        "timestamp": chrono::Utc::now()
    }))
}

async fn ledger_tail(State(state): State<AppState>) -> ApiResult {
    let tail = state.store.get_tail().await.map_err(error_response)?;
    Ok(Json(serde_json::json!({
        "empty": tail.is_none(),
        "tail": tail,
    })))
}

async fn verify_ledger(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> ApiResult {
    let mode = match params.mode.as_deref() {
        Some(raw) => raw.parse().map_err(error_response)?,
        None => state.default_mode,
    };

    let verifier = ChainVerifier::new(state.store.clone());
    let report = verifier
        .verify_from(params.from.unwrap_or(0), mode)
        .await
        .map_err(error_response)?;

    Ok(Json(serde_json::to_value(report).map_err(|e| error_response(e.into()))?))
}

async fn verify_record(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let verifier = ChainVerifier::new(state.store.clone());
    let check = verifier.verify_record(id).await.map_err(error_response)?;
    Ok(Json(serde_json::to_value(check).map_err(|e| error_response(e.into()))?))
}

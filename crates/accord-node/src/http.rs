use std::sync::Arc;

use accord_consensus::{
    ApprovalMsg, CommitRequest, CommitResponse, ConsensusError, PocEngine, ProposalMsg,
    ProposalResponse,
};
use accord_core::Transaction;
use accord_state::FileStorage;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

pub type SharedEngine = Arc<PocEngine<FileStorage>>;

/// The node's HTTP surface: status, transaction submission, and the PoC
/// topic routes the peer protocol binds to.
pub fn router(engine: SharedEngine) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/tx", post(submit_tx))
        .route("/poc/proposal", post(proposal))
        .route("/poc/approval", post(approval))
        .route("/poc/commit", post(commit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

/// Protocol errors map to 4xx and are otherwise dropped; engine faults are
/// 5xx. Either way the failure is logged, never swallowed.
fn error_response(err: ConsensusError) -> (StatusCode, Json<serde_json::Value>) {
    debug!("Request rejected: {}", err);
    let status = match &err {
        ConsensusError::EngineStopped(_) => StatusCode::SERVICE_UNAVAILABLE,
        ConsensusError::State(_) | ConsensusError::Sync(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, Json(json!({ "error": err.to_string() })))
}

async fn status(State(engine): State<SharedEngine>) -> Json<accord_consensus::EngineStatus> {
    Json(engine.status().await)
}

async fn submit_tx(
    State(engine): State<SharedEngine>,
    Json(tx): Json<Transaction>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let id = engine.submit_transaction(tx).await.map_err(error_response)?;
    Ok(Json(json!({ "id": id.to_hex() })))
}

async fn proposal(
    State(engine): State<SharedEngine>,
    Json(msg): Json<ProposalMsg>,
) -> Result<Json<ProposalResponse>, (StatusCode, Json<serde_json::Value>)> {
    let approval = engine.handle_proposal(msg).await.map_err(error_response)?;
    Ok(Json(ProposalResponse { approval }))
}

async fn approval(
    State(engine): State<SharedEngine>,
    Json(msg): Json<ApprovalMsg>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let commit = engine.handle_approval(msg).await.map_err(error_response)?;
    Ok(Json(json!({ "committed": commit.is_some() })))
}

async fn commit(
    State(engine): State<SharedEngine>,
    Json(req): Json<CommitRequest>,
) -> Result<Json<CommitResponse>, (StatusCode, Json<serde_json::Value>)> {
    let hash = req.block.hash().map_err(|e| error_response(e.into()))?;
    let block_count = req.block.header.height;
    engine.handle_commit(req).await.map_err(error_response)?;
    Ok(Json(CommitResponse {
        status: "applied".to_string(),
        block_count,
        hash: hash.to_hex(),
    }))
}

/// Approval REST endpoints
///
/// Thin wrappers over [`WorkflowEngine`](crate::runtime::WorkflowEngine); acting users
/// are passed in the request body.

use crate::api::{ApiResult, AppState};
use crate::approval::{ApprovalInstance, ApprovalTask, Decision, DecisionOutcome, Transition};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub business_type: String,
    pub business_id: String,
    pub initiator_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub approver_id: String,
    pub decision: Decision,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub user_id: String,
}

/// Instance with its full task history
#[derive(Debug, Serialize)]
pub struct InstanceView {
    pub instance: ApprovalInstance,
    pub tasks: Vec<ApprovalTask>,
}

pub fn create_approval_routes() -> Router<AppState> {
    Router::new()
        .route("/api/approvals", post(submit))
        .route("/api/approvals/{id}", get(get_instance))
        .route("/api/approvals/{id}/chain", get(get_chain))
        .route("/api/approvals/{id}/withdraw", post(withdraw))
        .route("/api/approvals/{id}/resubmit", post(resubmit))
        .route("/api/tasks/{id}/decision", post(decide))
        .route("/api/users/{id}/tasks", get(pending_tasks))
}

/// POST /api/approvals
/// Body: { "business_type": "...", "business_id": "...", "initiator_id": "..." }
async fn submit(
    State(state): State<AppState>,
    Json(payload): Json<SubmitRequest>,
) -> ApiResult<(StatusCode, Json<Transition<ApprovalInstance>>)> {
    let transition = state
        .engine
        .submit(&payload.business_type, &payload.business_id, &payload.initiator_id)
        .await?;
    Ok((StatusCode::CREATED, Json(transition)))
}

async fn get_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<InstanceView>> {
    let instance = state.engine.get_instance(&id).await?;
    let tasks = state.engine.list_tasks(&id).await?;
    Ok(Json(InstanceView { instance, tasks }))
}

async fn get_chain(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ApprovalInstance>>> {
    Ok(Json(state.engine.instance_chain(&id).await?))
}

/// POST /api/approvals/{id}/withdraw
/// Body: { "user_id": "..." }
async fn withdraw(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ActorRequest>,
) -> ApiResult<Json<Transition<ApprovalInstance>>> {
    Ok(Json(state.engine.withdraw(&id, &payload.user_id).await?))
}

/// POST /api/approvals/{id}/resubmit
/// Body: { "user_id": "..." }
async fn resubmit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ActorRequest>,
) -> ApiResult<(StatusCode, Json<Transition<ApprovalInstance>>)> {
    let transition = state.engine.resubmit(&id, &payload.user_id).await?;
    Ok((StatusCode::CREATED, Json(transition)))
}

/// POST /api/tasks/{id}/decision
/// Body: { "approver_id": "...", "decision": "approve" | "reject", "comment": "..." }
async fn decide(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<DecisionRequest>,
) -> ApiResult<Json<Transition<DecisionOutcome>>> {
    let transition = state
        .engine
        .decide(&id, &payload.approver_id, payload.decision, payload.comment.as_deref())
        .await?;
    Ok(Json(transition))
}

async fn pending_tasks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ApprovalTask>>> {
    Ok(Json(state.engine.pending_tasks_for(&id).await?))
}

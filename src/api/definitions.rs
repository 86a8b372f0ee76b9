/// Workflow definition REST API endpoints
///
/// CRUD over definitions with hot reload: every change goes to storage first and then
/// swaps the in-memory registry. Running instances keep the definition they started with.

use crate::api::{ApiError, ApiResult, AppState};
use crate::error::EngineError;
use crate::workflow::types::WorkflowDefinition;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};

/// Response for definition create/update operations
#[derive(Debug, Serialize)]
pub struct DefinitionResponse {
    pub flow_code: String,
    pub message: String,
}

pub fn create_definition_routes() -> Router<AppState> {
    Router::new()
        .route("/api/definitions", get(list_definitions).post(create_definition))
        .route(
            "/api/definitions/{flow_code}",
            get(get_definition).put(update_definition).delete(delete_definition),
        )
}

/// Create a new definition
///
/// POST /api/definitions
/// Body: a full workflow definition
async fn create_definition(
    State(state): State<AppState>,
    Json(definition): Json<WorkflowDefinition>,
) -> ApiResult<(StatusCode, Json<DefinitionResponse>)> {
    if state.registry.storage().get_definition(&definition.flow_code).await?.is_some() {
        return Err(ApiError(EngineError::InvalidState(format!(
            "workflow definition {} already exists",
            definition.flow_code
        ))));
    }

    let flow_code = definition.flow_code.clone();
    state.registry.upsert(definition).await?;
    tracing::info!("🔥 Created workflow definition: {}", flow_code);

    Ok((
        StatusCode::CREATED,
        Json(DefinitionResponse {
            message: format!("Workflow definition '{}' created", flow_code),
            flow_code,
        }),
    ))
}

/// GET /api/definitions
async fn list_definitions(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let definitions = state.registry.storage().list_definitions().await?;
    Ok(Json(json!({ "definitions": definitions })))
}

async fn get_definition(
    State(state): State<AppState>,
    Path(flow_code): Path<String>,
) -> ApiResult<Json<WorkflowDefinition>> {
    state
        .registry
        .storage()
        .get_definition(&flow_code)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError(EngineError::NotFound(format!("workflow definition {}", flow_code))))
}

/// Replace an existing definition; the path's flow_code wins over the body's
///
/// PUT /api/definitions/{flow_code}
async fn update_definition(
    State(state): State<AppState>,
    Path(flow_code): Path<String>,
    Json(mut definition): Json<WorkflowDefinition>,
) -> ApiResult<Json<DefinitionResponse>> {
    definition.flow_code = flow_code.clone();

    if state.registry.storage().get_definition(&flow_code).await?.is_none() {
        return Err(ApiError(EngineError::NotFound(format!("workflow definition {}", flow_code))));
    }

    state.registry.upsert(definition).await?;
    tracing::info!("🔥 Hot-reloaded workflow definition: {}", flow_code);

    Ok(Json(DefinitionResponse {
        message: format!("Workflow definition '{}' updated", flow_code),
        flow_code,
    }))
}

async fn delete_definition(
    State(state): State<AppState>,
    Path(flow_code): Path<String>,
) -> ApiResult<Json<Value>> {
    if state.registry.remove(&flow_code).await? {
        tracing::info!("Deleted workflow definition: {} (open instances keep their snapshot)", flow_code);
        Ok(Json(json!({ "message": "Workflow definition deleted" })))
    } else {
        Err(ApiError(EngineError::NotFound(format!("workflow definition {}", flow_code))))
    }
}

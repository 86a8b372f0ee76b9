/// Demo entity endpoints for the built-in in-memory adapters

use crate::adapter::{memory::EntityRecord, InMemoryAdapter};
use crate::api::{ApiError, ApiResult, AppState};
use crate::approval::ApprovalInstance;
use crate::condition::EntityData;
use crate::error::EngineError;
use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use std::sync::Arc;

pub fn create_entity_routes() -> Router<AppState> {
    Router::new()
        .route("/api/entities/{business_type}/{id}", get(get_entity).put(upsert_entity))
        .route("/api/entities/{business_type}/{id}/approval", get(current_approval))
}

fn adapter(state: &AppState, business_type: &str) -> ApiResult<Arc<InMemoryAdapter>> {
    state.entities.get(business_type).cloned().ok_or_else(|| {
        ApiError(EngineError::NotFound(format!("no entity store for business type {}", business_type)))
    })
}

/// PUT /api/entities/{business_type}/{id}
/// Body: flat object of scalar fields, e.g. { "total_amount": 12000, "department": "ops" }
async fn upsert_entity(
    State(state): State<AppState>,
    Path((business_type, id)): Path<(String, String)>,
    Json(data): Json<EntityData>,
) -> ApiResult<Json<EntityRecord>> {
    let adapter = adapter(&state, &business_type)?;
    adapter.upsert(&id, data).await;

    adapter
        .record(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError(EngineError::NotFound(format!("{} {}", business_type, id))))
}

async fn get_entity(
    State(state): State<AppState>,
    Path((business_type, id)): Path<(String, String)>,
) -> ApiResult<Json<EntityRecord>> {
    adapter(&state, &business_type)?
        .record(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError(EngineError::NotFound(format!("{} {}", business_type, id))))
}

/// Open approval instance for the entity, `null` when none
async fn current_approval(
    State(state): State<AppState>,
    Path((business_type, id)): Path<(String, String)>,
) -> ApiResult<Json<Option<ApprovalInstance>>> {
    Ok(Json(state.engine.current_instance(&business_type, &id).await?))
}

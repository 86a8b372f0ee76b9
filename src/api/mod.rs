/// HTTP API layer
///
/// - `approvals`: submit, decide, withdraw, resubmit and the read queries
/// - `definitions`: workflow definition CRUD with hot reload
/// - `entities`: demo entity upsert for the in-memory adapters

pub mod approvals;
pub mod definitions;
pub mod entities;

pub use approvals::create_approval_routes;
pub use definitions::create_definition_routes;
pub use entities::create_entity_routes;

use crate::adapter::InMemoryAdapter;
use crate::error::EngineError;
use crate::runtime::WorkflowEngine;
use crate::workflow::DefinitionRegistry;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::{collections::HashMap, sync::Arc};

/// Application state shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub registry: Arc<DefinitionRegistry>,
    /// Demo adapters keyed by business type, for entity upserts
    pub entities: Arc<HashMap<String, Arc<InMemoryAdapter>>>,
}

/// Engine error rendered as `{ "error": kind, "message": ... }`
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::ValidationFailed(_) | EngineError::InvalidDefinition(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            EngineError::NotAuthorized(_) => StatusCode::FORBIDDEN,
            EngineError::AlreadyDecided(_) | EngineError::InvalidState(_) => StatusCode::CONFLICT,
            EngineError::Storage(_) | EngineError::Serialization(_) | EngineError::Scheduler(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        } else {
            tracing::debug!("Request rejected ({}): {}", status, self.0);
        }

        let body = Json(json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

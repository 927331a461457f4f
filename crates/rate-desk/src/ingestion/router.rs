use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::coordinator::{IngestError, IngestionCoordinator};
use super::sheet::{DeclaredType, SheetId};
use crate::catalog::domain::LenderId;
use crate::catalog::store::{CatalogStore, StoreError};

/// Shared state for the rate-sheet operator endpoints.
pub struct IngestionApi<S> {
    pub coordinator: Arc<IngestionCoordinator<S>>,
    pub store: Arc<S>,
}

impl<S> Clone for IngestionApi<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            store: self.store.clone(),
        }
    }
}

/// Operator upload: file body inline, declared type, owning lender.
#[derive(Debug, Deserialize)]
pub struct SheetSubmission {
    pub lender_id: String,
    pub declared_type: DeclaredType,
    pub content: String,
}

/// Router builder for rate-sheet submission and status.
pub fn ratesheet_router<S: CatalogStore + 'static>(api: IngestionApi<S>) -> Router {
    Router::new()
        .route("/api/v1/ratesheets", post(submit_handler::<S>))
        .route("/api/v1/ratesheets/:sheet_id", get(status_handler::<S>))
        .route(
            "/api/v1/ratesheets/:sheet_id/retry",
            post(retry_handler::<S>),
        )
        .with_state(api)
}

pub(crate) async fn submit_handler<S: CatalogStore + 'static>(
    State(api): State<IngestionApi<S>>,
    axum::Json(submission): axum::Json<SheetSubmission>,
) -> Response {
    let result = api.coordinator.submit_file(
        LenderId(submission.lender_id),
        submission.declared_type,
        submission.content.into_bytes(),
    );

    match result {
        Ok(sheet_id) => {
            let payload = json!({ "sheet_id": sheet_id, "state": "pending" });
            (StatusCode::ACCEPTED, axum::Json(payload)).into_response()
        }
        Err(IngestError::Store(StoreError::Validation(error))) => {
            let payload = json!({ "error": error.to_string() });
            (StatusCode::BAD_REQUEST, axum::Json(payload)).into_response()
        }
        Err(IngestError::Store(StoreError::Unavailable(reason))) => {
            let payload = json!({ "error": format!("store unavailable: {reason}") });
            (StatusCode::SERVICE_UNAVAILABLE, axum::Json(payload)).into_response()
        }
        Err(other) => {
            let payload = json!({ "error": other.to_string() });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn status_handler<S: CatalogStore + 'static>(
    State(api): State<IngestionApi<S>>,
    Path(sheet_id): Path<String>,
) -> Response {
    match api.store.sheet(&SheetId(sheet_id.clone())) {
        Ok(Some(sheet)) => (StatusCode::OK, axum::Json(sheet.view())).into_response(),
        Ok(None) => {
            let payload = json!({ "error": format!("no rate sheet '{sheet_id}'") });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        Err(err) => {
            let payload = json!({ "error": err.to_string() });
            (StatusCode::SERVICE_UNAVAILABLE, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn retry_handler<S: CatalogStore + 'static>(
    State(api): State<IngestionApi<S>>,
    Path(sheet_id): Path<String>,
) -> Response {
    match api.coordinator.resubmit(&SheetId(sheet_id.clone())) {
        Ok(()) => {
            let payload = json!({ "sheet_id": sheet_id, "state": "pending" });
            (StatusCode::ACCEPTED, axum::Json(payload)).into_response()
        }
        Err(IngestError::Store(StoreError::NotFound)) => {
            let payload = json!({ "error": format!("no rate sheet '{sheet_id}'") });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        Err(IngestError::Lifecycle(error)) => {
            let payload = json!({ "error": error.to_string() });
            (StatusCode::CONFLICT, axum::Json(payload)).into_response()
        }
        Err(other) => {
            let payload = json!({ "error": other.to_string() });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

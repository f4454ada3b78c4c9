use crate::api::response::{ApiResponse, ErrorResponse};
use crate::features::FeatureState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::queries::{content, tree, FileContentError, FileContentQuery, FileTreeError, FileTreeQuery};

pub fn files_routes() -> Router<FeatureState> {
    Router::new()
        .route("/sessions/:session_id/tree", get(file_tree))
        .route("/sessions/:session_id/file", get(file_content))
}

#[derive(Debug, Deserialize)]
struct FileContentParams {
    path: Option<String>,
}

#[tracing::instrument(skip(state), fields(session_id = %session_id))]
async fn file_tree(
    State(state): State<FeatureState>,
    Path(session_id): Path<Uuid>,
) -> Result<Response, FileApiError> {
    let index = state.coordinator.stores().index.clone();
    let records = tree::handle(index.as_ref(), FileTreeQuery { session_id }).await?;
    let meta = json!({ "count": records.len() });

    Ok((StatusCode::OK, Json(ApiResponse::success_with_meta(records, meta))).into_response())
}

#[tracing::instrument(skip(state), fields(session_id = %session_id))]
async fn file_content(
    State(state): State<FeatureState>,
    Path(session_id): Path<Uuid>,
    Query(params): Query<FileContentParams>,
) -> Result<Response, FileApiError> {
    let index = state.coordinator.stores().index.clone();
    let query = FileContentQuery {
        session_id,
        path: params.path,
    };

    let response = content::handle(index.as_ref(), state.coordinator.storage(), query).await?;

    Ok((StatusCode::OK, Json(ApiResponse::success(response))).into_response())
}

#[derive(Debug)]
enum FileApiError {
    Tree(FileTreeError),
    Content(FileContentError),
}

impl From<FileTreeError> for FileApiError {
    fn from(err: FileTreeError) -> Self {
        Self::Tree(err)
    }
}

impl From<FileContentError> for FileApiError {
    fn from(err: FileContentError) -> Self {
        Self::Content(err)
    }
}

impl std::fmt::Display for FileApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileApiError::Tree(e) => write!(f, "{}", e),
            FileApiError::Content(e) => write!(f, "{}", e),
        }
    }
}

impl IntoResponse for FileApiError {
    fn into_response(self) -> Response {
        match self {
            FileApiError::Content(FileContentError::PathRequired) => {
                let error = ErrorResponse::new("VALIDATION_ERROR", self.to_string());
                (StatusCode::BAD_REQUEST, Json(error)).into_response()
            },
            FileApiError::Content(FileContentError::NotFound) => {
                let error = ErrorResponse::new("NOT_FOUND", self.to_string());
                (StatusCode::NOT_FOUND, Json(error)).into_response()
            },
            FileApiError::Content(FileContentError::TooLarge) => {
                let error = ErrorResponse::new("FILE_TOO_LARGE", self.to_string());
                (StatusCode::PAYLOAD_TOO_LARGE, Json(error)).into_response()
            },
            FileApiError::Content(FileContentError::Unreadable) => {
                let error = ErrorResponse::new("UNREADABLE_CONTENT", self.to_string());
                (StatusCode::UNPROCESSABLE_ENTITY, Json(error)).into_response()
            },
            FileApiError::Tree(FileTreeError::Store(_))
            | FileApiError::Content(FileContentError::Store(_)) => {
                tracing::error!("Store error while reading file index: {}", self);
                let error = ErrorResponse::new("DATABASE_ERROR", "A database error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
            },
            FileApiError::Content(FileContentError::Storage(_)) => {
                tracing::error!("Storage error while reading file: {}", self);
                let error = ErrorResponse::new("STORAGE_ERROR", "A storage error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
            },
        }
    }
}

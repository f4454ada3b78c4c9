use crate::api::response::{ApiResponse, ErrorResponse};
use crate::features::FeatureState;
use crate::storage::SessionStorage;
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use super::{
    commands::{start_upload, StagedArchive, StartUploadCommand, UploadArchiveError},
    queries::{stream_events, StreamEventsQuery},
};

/// Room for multipart boundaries and headers on top of the archive itself
const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

pub fn uploads_routes(max_archive_bytes: u64) -> Router<FeatureState> {
    let body_limit = usize::try_from(max_archive_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES))
        .unwrap_or(usize::MAX);

    Router::new()
        .route(
            "/sessions/:session_id/uploads",
            post(upload_archive).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/sessions/:session_id/uploads/:upload_id/events", get(upload_events))
}

#[tracing::instrument(skip(state, multipart), fields(session_id = %session_id))]
async fn upload_archive(
    State(state): State<FeatureState>,
    Path(session_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Response, UploadArchiveError> {
    let storage = state.coordinator.storage().clone();
    let upload_id = Uuid::new_v4();
    let archive_path = storage.temp_archive_path(upload_id);
    let staged =
        receive_archive(&storage, &mut multipart, &archive_path, state.max_archive_bytes).await?;

    let command = StartUploadCommand {
        session_id,
        upload_id,
        archive_path,
        checksum: staged.checksum,
        size: staged.size,
    };

    let response = start_upload::handle(state.coordinator.clone(), command).await?;

    tracing::info!(
        upload_id = %response.upload_id,
        size = response.size,
        checksum = %response.checksum,
        "Archive upload accepted"
    );

    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(response))).into_response())
}

/// Stage the first `file` field, discarding it again if a later part is malformed
async fn receive_archive(
    storage: &SessionStorage,
    multipart: &mut Multipart,
    archive_path: &std::path::Path,
    max_archive_bytes: u64,
) -> Result<StagedArchive, UploadArchiveError> {
    let mut staged = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                if staged.is_some() {
                    if let Err(e) = storage.remove(archive_path).await {
                        tracing::warn!(error = %e, "Failed to remove staged archive");
                    }
                }
                return Err(multipart_error(err, max_archive_bytes));
            },
        };

        if field.name() == Some("file") && staged.is_none() {
            staged =
                Some(start_upload::stage_archive(field, archive_path, max_archive_bytes).await?);
        }
    }

    staged.ok_or(UploadArchiveError::FileRequired)
}

fn multipart_error(err: MultipartError, max_archive_bytes: u64) -> UploadArchiveError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadArchiveError::TooLarge {
            limit: max_archive_bytes,
        }
    } else {
        UploadArchiveError::Multipart(err.body_text())
    }
}

async fn upload_events(
    State(state): State<FeatureState>,
    Path((session_id, upload_id)): Path<(Uuid, Uuid)>,
) -> impl IntoResponse {
    stream_events::handle(
        state.coordinator.broadcaster(),
        StreamEventsQuery {
            session_id,
            upload_id,
        },
    )
}

impl IntoResponse for UploadArchiveError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            UploadArchiveError::FileRequired | UploadArchiveError::ContentRequired => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            },
            UploadArchiveError::Multipart(_) => (StatusCode::BAD_REQUEST, "INVALID_MULTIPART"),
            UploadArchiveError::NotAnArchive => (StatusCode::BAD_REQUEST, "INVALID_ARCHIVE"),
            UploadArchiveError::TooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "FILE_TOO_LARGE"),
            UploadArchiveError::SessionBusy { session_id } => {
                let error = ErrorResponse::with_details(
                    "SESSION_BUSY",
                    self.to_string(),
                    serde_json::json!({ "session_id": session_id }),
                );
                return (StatusCode::CONFLICT, Json(error)).into_response();
            },
            UploadArchiveError::Storage(_) => {
                tracing::error!("Storage error during archive upload: {}", self);
                let error = ErrorResponse::new("STORAGE_ERROR", "A storage error occurred");
                return (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response();
            },
        };

        (status, Json(ErrorResponse::new(code, self.to_string()))).into_response()
    }
}

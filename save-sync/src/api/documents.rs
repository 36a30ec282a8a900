//! Document endpoints
//!
//! Whole-document reads and conditional writes. A write whose
//! `expected_revision` no longer matches the stored revision is rejected
//! with 409 and the current revision, never applied.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use shared_types::{
    ApiErrorDetail, ApiErrorResponse, ConflictResponse, CreateDocumentRequest, DocumentId,
    SaveDocumentRequest, SaveDocumentResponse, ERROR_CODE_CONFLICT, ERROR_CODE_INVALID_ID,
    ERROR_CODE_NOT_FOUND, ERROR_CODE_READ_ERROR, ERROR_CODE_WRITE_ERROR,
};

use crate::api::ApiState;
use crate::backend::{BackendError, PersistOutcome, PersistRequest};

/// Machine-readable error codes
#[derive(Debug, Clone, Copy)]
pub enum DocumentErrorCode {
    InvalidId,
    NotFound,
    Conflict,
    ReadError,
    WriteError,
}

impl DocumentErrorCode {
    fn as_str(self) -> &'static str {
        match self {
            DocumentErrorCode::InvalidId => ERROR_CODE_INVALID_ID,
            DocumentErrorCode::NotFound => ERROR_CODE_NOT_FOUND,
            DocumentErrorCode::Conflict => ERROR_CODE_CONFLICT,
            DocumentErrorCode::ReadError => ERROR_CODE_READ_ERROR,
            DocumentErrorCode::WriteError => ERROR_CODE_WRITE_ERROR,
        }
    }

    fn status_code(self) -> StatusCode {
        match self {
            DocumentErrorCode::InvalidId => StatusCode::BAD_REQUEST,
            DocumentErrorCode::NotFound => StatusCode::NOT_FOUND,
            DocumentErrorCode::Conflict => StatusCode::CONFLICT,
            DocumentErrorCode::ReadError => StatusCode::INTERNAL_SERVER_ERROR,
            DocumentErrorCode::WriteError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn error_body(code: DocumentErrorCode, message: impl Into<String>) -> ApiErrorResponse {
    ApiErrorResponse {
        error: ApiErrorDetail {
            code: code.as_str().to_string(),
            message: message.into(),
        },
    }
}

fn document_error(code: DocumentErrorCode, message: impl Into<String>) -> Response {
    (code.status_code(), Json(error_body(code, message))).into_response()
}

/// Map a backend error; `fallback` covers storage failures.
fn backend_error(error: BackendError, fallback: DocumentErrorCode) -> Response {
    let code = match &error {
        BackendError::NotFound(_) => DocumentErrorCode::NotFound,
        BackendError::InvalidId(_) => DocumentErrorCode::InvalidId,
        _ => fallback,
    };
    if matches!(code, DocumentErrorCode::ReadError | DocumentErrorCode::WriteError) {
        tracing::error!(error = %error, code = code.as_str(), "Document store failure");
    }
    document_error(code, error.to_string())
}

/// Fetch a document with its current revision
pub async fn get_document(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.store.load(&DocumentId::from(id.as_str())).await {
        Ok(document) => (StatusCode::OK, Json(document)).into_response(),
        Err(e) => backend_error(e, DocumentErrorCode::ReadError),
    }
}

/// Create a document; the response carries its first revision
pub async fn create_document(
    State(state): State<ApiState>,
    Json(req): Json<CreateDocumentRequest>,
) -> Response {
    match state.store.create(req).await {
        Ok(document) => (StatusCode::CREATED, Json(document)).into_response(),
        Err(e) => backend_error(e, DocumentErrorCode::WriteError),
    }
}

/// Save document with optimistic concurrency control
pub async fn save_document(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<SaveDocumentRequest>,
) -> Response {
    let document_id = DocumentId::from(id.as_str());
    let request = PersistRequest::from_wire(document_id.clone(), req);

    match state.store.persist(request).await {
        PersistOutcome::Applied { revision } => (
            StatusCode::OK,
            Json(SaveDocumentResponse {
                id: document_id,
                revision,
                saved: true,
            }),
        )
            .into_response(),
        PersistOutcome::RevisionMismatch { current_revision } => {
            tracing::info!(
                document_id = %document_id,
                current_revision = %current_revision,
                "Rejected stale write"
            );
            let body = ConflictResponse {
                error: error_body(
                    DocumentErrorCode::Conflict,
                    "Document was modified by another session",
                ),
                id: document_id,
                current_revision,
            };
            (StatusCode::CONFLICT, Json(body)).into_response()
        }
        PersistOutcome::Failure(e) => backend_error(e, DocumentErrorCode::WriteError),
    }
}

//! HTTP client for the document store service.

use async_trait::async_trait;
use reqwest::StatusCode;
use shared_types::{
    ApiErrorResponse, ConflictResponse, CreateDocumentRequest, Document, DocumentId,
    SaveDocumentResponse,
};
use std::time::Duration;

use super::{BackendError, PersistOutcome, PersistRequest, PersistenceBackend};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| BackendError::Unavailable(format!("http client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn document_url(&self, id: &DocumentId) -> String {
        format!("{}/documents/{}", self.base_url, id.as_str())
    }

    async fn write(&self, request: &PersistRequest) -> Result<PersistOutcome, BackendError> {
        let response = self
            .client
            .put(self.document_url(&request.document_id))
            .json(&request.to_wire())
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::OK => {
                let body: SaveDocumentResponse = response.json().await.map_err(decode_error)?;
                Ok(PersistOutcome::Applied {
                    revision: body.revision,
                })
            }
            StatusCode::CONFLICT => {
                let body: ConflictResponse = response.json().await.map_err(decode_error)?;
                Ok(PersistOutcome::RevisionMismatch {
                    current_revision: body.current_revision,
                })
            }
            StatusCode::NOT_FOUND => Err(BackendError::NotFound(request.document_id.clone())),
            _ => Err(status_error(response).await),
        }
    }
}

fn transport_error(e: reqwest::Error) -> BackendError {
    BackendError::Unavailable(e.to_string())
}

fn decode_error(e: reqwest::Error) -> BackendError {
    BackendError::Serialization(e.to_string())
}

async fn status_error(response: reqwest::Response) -> BackendError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorResponse>(&text)
        .map(|body| body.error.message)
        .unwrap_or(text);
    BackendError::Http { status, message }
}

#[async_trait]
impl PersistenceBackend for HttpBackend {
    async fn load(&self, id: &DocumentId) -> Result<Document, BackendError> {
        let response = self
            .client
            .get(self.document_url(id))
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::OK => response.json().await.map_err(decode_error),
            StatusCode::NOT_FOUND => Err(BackendError::NotFound(id.clone())),
            _ => Err(status_error(response).await),
        }
    }

    async fn create(&self, request: CreateDocumentRequest) -> Result<Document, BackendError> {
        let response = self
            .client
            .post(format!("{}/documents", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status().is_success() {
            response.json().await.map_err(decode_error)
        } else {
            Err(status_error(response).await)
        }
    }

    async fn persist(&self, request: PersistRequest) -> PersistOutcome {
        self.write(&request)
            .await
            .unwrap_or_else(PersistOutcome::Failure)
    }
}

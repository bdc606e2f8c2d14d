//! Storage API client
//!
//! Thin reqwest wrapper around the upload endpoints of the cloud-drive API.
//!
//! # Endpoints
//!
//! | Operation | Method | Path | Span Name |
//! |-----------|--------|------|-----------|
//! | Single-shot upload | PUT | `/api/files` | `api.put_file` |
//! | Initiate multipart | POST | `/api/files/multipart/initiate` | `api.initiate_multipart` |
//! | Upload part | PUT | `/api/files/multipart/{sessionID}/part/{n}` | `api.upload_part` |
//! | Complete multipart | POST | `/api/files/multipart/{sessionID}/complete` | `api.complete_multipart` |
//! | Abort multipart | DELETE | `/api/files/multipart/{sessionID}/abort` | `api.abort_multipart` |
//! | Quota | GET | `/api/user/quotas` | `api.fetch_quota` |
//!
//! # Example
//!
//! ```no_run
//! use kumo_uploadr::api::{ApiClient, UploadTransport, InitiateRequest};
//! use kumo_uploadr::config::Config;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::for_base_url("https://drive.example.com");
//! let client = ApiClient::new(&config.api)?;
//!
//! let session = client
//!     .initiate_multipart(&InitiateRequest {
//!         filename: "movie.mkv".into(),
//!         content_type: "video/x-matroska".into(),
//!         total_size: 64 * 1024 * 1024,
//!         parent_id: None,
//!         last_modified: 0,
//!     })
//!     .await?;
//! println!("session {} uses {} byte parts", session.session_id, session.max_chunk_size);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response};
use thiserror::Error;

use crate::config::ApiConfig;

pub mod body;
pub mod types;

pub use body::{no_progress, ProgressCallback};
pub use types::{
    CompleteRequest, FileMetadata, InitiateRequest, InitiateResponse, QuotaDto,
    SessionCredentials, UploadPart,
};

use types::ErrorBody;

/// Characters escaped inside a single path segment
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// API client errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("HTTP {status}")]
    Status {
        status: u16,
        localization_key: Option<String>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Response error: {0}")]
    Decode(String),
}

impl ApiError {
    /// HTTP status of the failed call, if the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// The calls the upload engine makes against the storage API.
///
/// [`ApiClient`] is the production implementation; tests substitute
/// scripted transports to drive failure and timing scenarios.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Upload a whole file in one request
    async fn put_file(
        &self,
        metadata: &FileMetadata,
        body: Bytes,
        on_progress: ProgressCallback,
    ) -> Result<(), ApiError>;

    /// Open a multipart session
    async fn initiate_multipart(
        &self,
        request: &InitiateRequest,
    ) -> Result<InitiateResponse, ApiError>;

    /// Upload one part of an open session
    async fn upload_part(
        &self,
        session: &SessionCredentials,
        part_number: u32,
        body: Bytes,
        on_progress: ProgressCallback,
    ) -> Result<UploadPart, ApiError>;

    /// Assemble the uploaded parts; `parts` must be sorted by part number
    async fn complete_multipart(
        &self,
        session: &SessionCredentials,
        parts: &[UploadPart],
    ) -> Result<(), ApiError>;

    /// Discard an open session
    async fn abort_multipart(&self, session_id: &str) -> Result<(), ApiError>;
}

/// Storage API client
pub struct ApiClient {
    base_url: String,
    access_token: Option<String>,
    http_client: reqwest::Client,
    frame_size: usize,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ApiError::ConfigError(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            http_client,
            frame_size: 64 * 1024,
        })
    }

    /// Set the size of streamed body frames (progress granularity)
    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size.max(1);
        self
    }

    /// Get the API base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn session_url(&self, session_id: &str, suffix: &str) -> String {
        let encoded = utf8_percent_encode(session_id, PATH_SEGMENT);
        self.url(&format!("/api/files/multipart/{}/{}", encoded, suffix))
    }

    fn with_access_token(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        tracing::Span::current().record("http.status_code", response.status().as_u16());
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::status_error(response).await)
        }
    }

    /// Convert a non-2xx response into [`ApiError::Status`], picking up the
    /// server's `localizationKey` when the body carries one.
    async fn status_error(response: Response) -> ApiError {
        let status = response.status().as_u16();
        let localization_key = response
            .text()
            .await
            .ok()
            .and_then(|text| serde_json::from_str::<ErrorBody>(&text).ok())
            .and_then(|body| body.localization_key)
            .filter(|key| !key.is_empty());
        ApiError::Status {
            status,
            localization_key,
        }
    }

    /// Fetch the caller's storage quota
    #[tracing::instrument(
        name = "api.fetch_quota",
        skip(self),
        fields(http.method = "GET", http.status_code = tracing::field::Empty),
        err
    )]
    pub async fn fetch_quota(&self) -> Result<QuotaDto, ApiError> {
        let request = self.with_access_token(self.http_client.get(self.url("/api/user/quotas")));
        let response = self.send(request).await?;
        response
            .json::<QuotaDto>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl UploadTransport for ApiClient {
    #[tracing::instrument(
        name = "api.put_file",
        skip(self, body, on_progress),
        fields(
            http.method = "PUT",
            file.name = %metadata.filename,
            upload.bytes = body.len(),
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn put_file(
        &self,
        metadata: &FileMetadata,
        body: Bytes,
        on_progress: ProgressCallback,
    ) -> Result<(), ApiError> {
        let len = body.len();
        let request = self
            .http_client
            .put(self.url("/api/files"))
            .query(&metadata.query_pairs())
            .header(CONTENT_TYPE, metadata.content_type.as_str())
            .header(CONTENT_LENGTH, len)
            .body(body::progress_body(body, self.frame_size, on_progress));
        self.send(self.with_access_token(request)).await?;

        tracing::debug!(bytes = len, "File uploaded in a single request");
        Ok(())
    }

    #[tracing::instrument(
        name = "api.initiate_multipart",
        skip(self, request),
        fields(
            http.method = "POST",
            file.name = %request.filename,
            upload.total_size = request.total_size,
            upload.session_id = tracing::field::Empty,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn initiate_multipart(
        &self,
        request: &InitiateRequest,
    ) -> Result<InitiateResponse, ApiError> {
        let builder = self
            .http_client
            .post(self.url("/api/files/multipart/initiate"))
            .json(request);
        let response = self.send(self.with_access_token(builder)).await?;
        let session = response
            .json::<InitiateResponse>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        tracing::Span::current().record("upload.session_id", session.session_id.as_str());
        tracing::info!(
            session_id = %session.session_id,
            max_chunk_size = session.max_chunk_size,
            "Multipart session initiated"
        );

        Ok(session)
    }

    #[tracing::instrument(
        name = "api.upload_part",
        skip(self, session, body, on_progress),
        fields(
            http.method = "PUT",
            upload.session_id = %session.session_id,
            upload.part_number = part_number,
            upload.bytes = body.len(),
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn upload_part(
        &self,
        session: &SessionCredentials,
        part_number: u32,
        body: Bytes,
        on_progress: ProgressCallback,
    ) -> Result<UploadPart, ApiError> {
        let len = body.len();
        let request = self
            .http_client
            .put(self.session_url(&session.session_id, &format!("part/{}", part_number)))
            .header(AUTHORIZATION, format!("Bearer {}", session.token))
            .header(CONTENT_LENGTH, len)
            .body(body::progress_body(body, self.frame_size, on_progress));
        let response = self.send(request).await?;
        let part = response
            .json::<UploadPart>()
            .await
            .map_err(|e| ApiError::Decode(format!("Failed to parse part response: {}", e)))?;

        tracing::debug!(part_number, etag = %part.etag, bytes = part.size, "Part uploaded");
        Ok(part)
    }

    #[tracing::instrument(
        name = "api.complete_multipart",
        skip(self, session, parts),
        fields(
            http.method = "POST",
            upload.session_id = %session.session_id,
            parts_count = parts.len(),
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn complete_multipart(
        &self,
        session: &SessionCredentials,
        parts: &[UploadPart],
    ) -> Result<(), ApiError> {
        let request = self
            .http_client
            .post(self.session_url(&session.session_id, "complete"))
            .header(AUTHORIZATION, format!("Bearer {}", session.token))
            .json(&CompleteRequest {
                parts: parts.to_vec(),
            });
        self.send(request).await?;
        Ok(())
    }

    #[tracing::instrument(
        name = "api.abort_multipart",
        skip(self),
        fields(http.method = "DELETE", http.status_code = tracing::field::Empty),
        err
    )]
    async fn abort_multipart(&self, session_id: &str) -> Result<(), ApiError> {
        let request = self.with_access_token(
            self.http_client
                .delete(self.session_url(session_id, "abort")),
        );
        self.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(&Config::for_base_url(base).api).unwrap()
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = client("https://drive.example.com/");
        assert_eq!(client.base_url(), "https://drive.example.com");
    }

    #[test]
    fn test_session_url_encodes_segment() {
        let client = client("https://drive.example.com");
        assert_eq!(
            client.session_url("a b/c", "abort"),
            "https://drive.example.com/api/files/multipart/a%20b%2Fc/abort"
        );
        assert_eq!(
            client.session_url("s-1", "part/3"),
            "https://drive.example.com/api/files/multipart/s-1/part/3"
        );
    }

    #[test]
    fn test_status_error_exposes_status() {
        let err = ApiError::Status {
            status: 409,
            localization_key: None,
        };
        assert_eq!(err.status(), Some(409));
        assert_eq!(ApiError::Network("reset".into()).status(), None);
    }
}

//! Wire types for the storage API

use serde::{Deserialize, Serialize};

/// Metadata sent with a single-request upload as query parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub parent_id: Option<String>,
    pub filename: String,
    pub content_type: String,
    /// Milliseconds since the Unix epoch
    pub last_modified: i64,
}

impl FileMetadata {
    /// Query pairs in the order the server documents them; `parentID` is
    /// omitted for the root folder.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(4);
        if let Some(parent_id) = &self.parent_id {
            pairs.push(("parentID", parent_id.clone()));
        }
        pairs.push(("filename", self.filename.clone()));
        pairs.push(("contentType", self.content_type.clone()));
        pairs.push(("lastModified", self.last_modified.to_string()));
        pairs
    }
}

/// Body of `POST /api/files/multipart/initiate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    pub filename: String,
    pub content_type: String,
    pub total_size: u64,
    #[serde(rename = "parentID")]
    pub parent_id: Option<String>,
    pub last_modified: i64,
}

/// Response of `POST /api/files/multipart/initiate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiateResponse {
    #[serde(rename = "sessionID")]
    pub session_id: String,
    #[serde(rename = "fileID")]
    pub file_id: String,
    #[serde(rename = "uploadID")]
    pub upload_id: String,
    #[serde(rename = "maxChunkSize")]
    pub max_chunk_size: u64,
    pub token: String,
}

impl InitiateResponse {
    pub fn credentials(&self) -> SessionCredentials {
        SessionCredentials {
            session_id: self.session_id.clone(),
            token: self.token.clone(),
        }
    }
}

/// One successfully uploaded part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPart {
    pub part_number: u32,
    pub etag: String,
    pub size: u64,
}

/// Body of `POST /api/files/multipart/{sessionID}/complete`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub parts: Vec<UploadPart>,
}

/// Response of `GET /api/user/quotas`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaDto {
    pub used: u64,
    pub limit: u64,
    #[serde(default)]
    pub tier_name: String,
}

/// Optional JSON error body returned by the server
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub localization_key: Option<String>,
}

/// Session-scoped capability returned by initiate.
///
/// Attached to every part and complete call of its session and dropped with
/// the session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    pub session_id: String,
    pub token: String,
}

impl std::fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("session_id", &self.session_id)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initiate_request_field_names() {
        let request = InitiateRequest {
            filename: "movie.mkv".into(),
            content_type: "video/x-matroska".into(),
            total_size: 107,
            parent_id: None,
            last_modified: 1_700_000_000_000,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["filename"], "movie.mkv");
        assert_eq!(json["contentType"], "video/x-matroska");
        assert_eq!(json["totalSize"], 107);
        assert!(json["parentID"].is_null());
        assert_eq!(json["lastModified"], 1_700_000_000_000i64);
    }

    #[test]
    fn test_initiate_response_parses_server_names() {
        let body = r#"{"sessionID":"s-1","fileID":"f-1","uploadID":"u-1","maxChunkSize":50,"token":"jwt"}"#;
        let response: InitiateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.session_id, "s-1");
        assert_eq!(response.file_id, "f-1");
        assert_eq!(response.upload_id, "u-1");
        assert_eq!(response.max_chunk_size, 50);
        assert_eq!(response.credentials().token, "jwt");
    }

    #[test]
    fn test_query_pairs_skip_root_parent() {
        let metadata = FileMetadata {
            parent_id: None,
            filename: "a.txt".into(),
            content_type: "text/plain".into(),
            last_modified: 42,
        };
        let keys: Vec<_> = metadata.query_pairs().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["filename", "contentType", "lastModified"]);
    }

    #[test]
    fn test_session_credentials_debug_redacts_token() {
        let creds = SessionCredentials {
            session_id: "s-1".into(),
            token: "super-secret".into(),
        };
        let debug = format!("{:?}", creds);
        assert!(debug.contains("s-1"));
        assert!(!debug.contains("super-secret"));
    }
}

//! Crate-wide error taxonomy.
//!
//! Every fallible operation in the ingestion core returns `Result<T, Error>`.
//! `anyhow` is reserved for the binary entry point in `main.rs`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown source '{name}', valid sources: {valid:?}")]
    BadSource { name: String, valid: Vec<String> },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("failed to parse {source_path} as {format}: {message}")]
    ParseError {
        source_path: String,
        format: String,
        message: String,
    },

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("chunker config error: overlap_tokens ({overlap}) must be < min_tokens ({min})")]
    ChunkerConfigError { overlap: usize, min: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("object store error: {0}")]
    ObjectStoreError(String),

    #[error("job store error: {0}")]
    JobStoreError(String),

    #[error("queue error: {0}")]
    QueueError(String),

    #[error("merge error on batch {batch_id}: {message}")]
    MergeError { batch_id: String, message: String },

    #[error("internal error: {0}")]
    FatalInternal(String),
}

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Error::BadSource { .. } | Error::BadRequest(..) | Error::ChunkerConfigError { .. } => {
                StatusCode::BAD_REQUEST
            }
            Error::FileNotFound(..) => StatusCode::NOT_FOUND,
            Error::InvalidInput(..) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Error::BadSource { name, valid } => json!({
                "status": "error",
                "message": format!("Unknown source '{}'. Valid sources: {:?}", name, valid),
            }),
            _ => json!({ "status": "error", "message": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<object_store::Error> for Error {
    fn from(e: object_store::Error) -> Self {
        Error::ObjectStoreError(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::JobStoreError(e.to_string())
    }
}

impl From<lancedb::Error> for Error {
    fn from(e: lancedb::Error) -> Self {
        Error::ObjectStoreError(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::QueueError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_source_maps_to_400() {
        let e = Error::BadSource {
            name: "nope".into(),
            valid: vec!["handbook".into()],
        };
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn fatal_internal_maps_to_500() {
        let e = Error::FatalInternal("boom".into());
        assert_eq!(e.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn file_not_found_maps_to_404() {
        let e = Error::FileNotFound("a.md".into());
        assert_eq!(e.status(), StatusCode::NOT_FOUND);
    }
}

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::repo::RepoError;

/// Endpoint-boundary error taxonomy. Every variant maps to one status code and
/// a `{success: false, message, ...}` envelope; validation carries the
/// per-field error map under `errors`.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("invalid or missing CSRF token")]
    CsrfInvalid,
    #[error("validation failed")]
    Validation(BTreeMap<String, String>),
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("too many requests")]
    RateLimited,
    #[error("feature not implemented")]
    Unimplemented,
    #[error("internal error")]
    Internal,
}

impl ApiError {
    /// Single-field validation failure.
    pub fn field(name: &str, message: &str) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(name.to_string(), message.to_string());
        ApiError::Validation(errors)
    }
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            // Call sites with a better field name intercept Conflict first.
            RepoError::Conflict => ApiError::field("request", "conflicts with an existing resource"),
            RepoError::InvalidState(msg) => ApiError::field("status", msg),
            RepoError::Database(detail) => {
                // Full detail stays server-side; the client gets the generic message.
                log::error!("database failure: {detail}");
                ApiError::Internal
            }
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::CsrfInvalid | ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut body = json!({ "success": false, "message": self.to_string() });
        if let ApiError::Validation(errors) = self {
            body["errors"] = json!(errors);
        }
        HttpResponse::build(self.status_code()).json(body)
    }
}

/// Seed for a success envelope; handlers append their extra fields.
pub fn success_body(message: &str) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("success".into(), Value::Bool(true));
    body.insert("message".into(), Value::String(message.to_string()));
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_envelope_carries_field_map() {
        let err = ApiError::field("post_id", "is required");
        let resp = err.error_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn repo_not_found_maps_to_404() {
        let err: ApiError = RepoError::NotFound.into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn database_detail_is_replaced_with_generic_message() {
        let err: ApiError = RepoError::Database("relation \"posts\" does not exist".into()).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "internal error");
    }
}

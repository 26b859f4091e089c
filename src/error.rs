use actix_web::{HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::repo::RepoError;
use crate::storage::BlobStoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{message}")]
    Validation { message: String, errors: Vec<FieldError> },
    #[error("authentication required")] Unauthorized,
    #[error("invalid credentials")] InvalidCredentials,
    #[error("admin role required")] Forbidden,
    #[error("not found")] NotFound,
    #[error("too many requests")] RateLimited,
    #[error("store unavailable")] StoreUnavailable,
    #[error("internal error")] Internal,
}

impl ApiError {
    pub fn validation(message: impl Into<String>, errors: Vec<FieldError>) -> Self {
        ApiError::Validation { message: message.into(), errors }
    }

    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        ApiError::Validation {
            message: format!("Invalid {field}"),
            errors: vec![FieldError::new(field, message)],
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "validation_failed",
            ApiError::Unauthorized | ApiError::InvalidCredentials => "unauthorized",
            ApiError::Forbidden => "forbidden",
            ApiError::NotFound => "not_found",
            ApiError::RateLimited => "rate_limited",
            ApiError::StoreUnavailable => "store_unavailable",
            ApiError::Internal => "internal",
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            // Callers that expect a specific conflict translate it themselves.
            RepoError::Conflict(what) => ApiError::field(&what, "already exists"),
            RepoError::Unavailable(detail) => {
                tracing::error!(%detail, "store unavailable");
                ApiError::StoreUnavailable
            }
            RepoError::Internal(detail) => {
                tracing::error!(%detail, "store error");
                ApiError::Internal
            }
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errs: validator::ValidationErrors) -> Self {
        let mut errors: Vec<FieldError> = errs
            .field_errors()
            .into_iter()
            .flat_map(|(field, list)| {
                list.iter().map(move |e| {
                    let message = e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string());
                    FieldError::new(camel_case(field.as_ref()), message)
                })
            })
            .collect();
        errors.sort_by(|a, b| a.field.cmp(&b.field));
        ApiError::validation("Invalid request data", errors)
    }
}

impl From<BlobStoreError> for ApiError {
    fn from(e: BlobStoreError) -> Self {
        match e {
            BlobStoreError::NotFound => ApiError::NotFound,
            BlobStoreError::Other(detail) => {
                tracing::error!(%detail, "blob store error");
                ApiError::Internal
            }
        }
    }
}

/// Field names in error bodies follow the JSON casing of the request bodies.
fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

impl ResponseError for ApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized | ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::StoreUnavailable | ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let errors = match self {
            ApiError::Validation { errors, .. } => errors.clone(),
            _ => Vec::new(),
        };
        HttpResponse::build(self.status_code()).json(ApiErrorBody {
            error: self.code().to_string(),
            message: self.to_string(),
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct Probe {
        #[validate(length(min = 1, message = "required"))]
        reporter_name: String,
    }

    #[test]
    fn validation_errors_use_camel_case_fields() {
        let err: ApiError = Probe { reporter_name: String::new() }.validate().unwrap_err().into();
        match err {
            ApiError::Validation { errors, .. } => {
                assert_eq!(errors, vec![FieldError::new("reporterName", "required")]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn status_codes_follow_taxonomy() {
        use actix_web::http::StatusCode;
        assert_eq!(ApiError::field("status", "bad").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::StoreUnavailable.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let e: ApiError = RepoError::Unavailable("pool timed out".into()).into();
        assert!(matches!(e, ApiError::StoreUnavailable));
    }
}

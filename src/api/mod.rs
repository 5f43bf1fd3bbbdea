use crate::error::ServiceError;
use async_trait::async_trait;
use axum::Json;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use log::error;
use serde_json::json;
use std::str::FromStr;
use uuid::Uuid;

pub mod admin;
pub mod auth;
pub mod billing;
pub mod conversations;
pub mod projects;

const X_SESSION_TOKEN: &str = "X-Session-Token";

/// Pulls the raw session token out of the request headers. Handlers resolve
/// it to a user through the account service.
#[derive(Debug)]
pub struct ExtractToken(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for ExtractToken
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, (StatusCode, &'static str)> {
        if let Some(token) = parts.headers.get(X_SESSION_TOKEN) {
            let token = token
                .to_str()
                .map_err(|_| (StatusCode::UNAUTHORIZED, "invalid session token"))?;
            let token = Uuid::from_str(token)
                .map_err(|_| (StatusCode::UNAUTHORIZED, "invalid session token"))?;
            Ok(ExtractToken(token))
        } else {
            Err((StatusCode::UNAUTHORIZED, "`X-Session-Token` header is missing"))
        }
    }
}

/// Maps service errors onto HTTP statuses with a `{"error": ...}` body.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            ServiceError::InvalidInput(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServiceError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            ServiceError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "authentication required".to_owned())
            }
            ServiceError::Forbidden => {
                (StatusCode::FORBIDDEN, "insufficient permissions".to_owned())
            }
            ServiceError::NotFound => (StatusCode::NOT_FOUND, "not found".to_owned()),
            ServiceError::LimitExceeded(m) => (StatusCode::TOO_MANY_REQUESTS, m.clone()),
            ServiceError::Upstream(_) | ServiceError::UpstreamOverloaded => {
                error!("upstream failure: {}", self.0);
                (StatusCode::BAD_GATEWAY, "upstream model unavailable".to_owned())
            }
            ServiceError::Database(_) => {
                error!("unexpected error: {}", self.0);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_owned())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_error_kind() {
        let cases = [
            (ServiceError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (ServiceError::Conflict("x".into()), StatusCode::CONFLICT),
            (ServiceError::Unauthorized, StatusCode::UNAUTHORIZED),
            (ServiceError::Forbidden, StatusCode::FORBIDDEN),
            (ServiceError::NotFound, StatusCode::NOT_FOUND),
            (ServiceError::LimitExceeded("x".into()), StatusCode::TOO_MANY_REQUESTS),
            (ServiceError::UpstreamOverloaded, StatusCode::BAD_GATEWAY),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }
}

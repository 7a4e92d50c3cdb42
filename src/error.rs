use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

use crate::{split::SplitError, store::StoreError};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Split(#[from] SplitError),
    #[error("`{0}` is not a member of this group")]
    UnknownMember(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("missing or invalid authorization")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Split(_) | ApiError::UnknownMember(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(StoreError::Duplicate(_)) => StatusCode::CONFLICT,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error = match self {
            ApiError::Store(StoreError::Duplicate(_)) => self.to_string(),
            ApiError::Store(err) => {
                tracing::error!("store error: {err}");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(ErrorBody { error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_errors_map_to_422() {
        let res = ApiError::from(SplitError::NoParticipants).error_response();
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn unknown_member_maps_to_422() {
        let res = ApiError::UnknownMember("ghost".to_string()).error_response();
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn not_found_maps_to_404() {
        let res = ApiError::NotFound("group `x`".to_string()).error_response();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn auth_errors_map_to_401_and_403() {
        assert_eq!(
            ApiError::Unauthorized.error_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Forbidden("admins only".to_string())
                .error_response()
                .status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn conflict_maps_to_409() {
        let res = ApiError::Conflict("already a member".to_string()).error_response();
        assert_eq!(res.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn duplicate_group_maps_to_409() {
        let err = ApiError::from(StoreError::Duplicate("group `trip`".to_string()));
        assert_eq!(err.to_string(), "group `trip` already exists");
        assert_eq!(err.error_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn split_error_message_is_passed_through() {
        let err = ApiError::from(SplitError::PercentageSumInvalid(90.0));
        assert_eq!(err.to_string(), "percentages add up to 90, expected 100");
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::Error;

/// API 错误类型
pub struct AppError(pub anyhow::Error);

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<Error>() {
            Some(Error::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(
                Error::InvalidImage(_)
                | Error::DimensionMismatch { .. }
                | Error::PayloadTooLarge { .. },
            ) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

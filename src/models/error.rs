use axum::http::StatusCode;
use problemdetails::Problem;
use tokio::time::error::Elapsed;

// region:    Error
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Timeout(#[from] Elapsed),

    #[error(transparent)]
    DbError(#[from] sqlx::Error),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    HttpError(#[from] axum::http::Error),

    #[error(transparent)]
    HyperError(#[from] hyper::Error),

    #[error(transparent)]
    HyperClientError(#[from] hyper_util::client::legacy::Error),

    #[error("Invalid Url")]
    InvalidUrl,

    #[error("Invalid Params - {0}")]
    InvalidParams(&'static str),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Retryable Status - {0}")]
    RetryableStatus(u16),

    #[error("Rejected Status - {0}")]
    RejectedStatus(u16),
}

impl Error {
    /// Classification used by the delivery worker: retryable errors get a
    /// backoff reschedule, everything else is a terminal failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::HyperError(_)
                | Error::HyperClientError(_)
                | Error::IoError(_)
                | Error::RetryableStatus(_)
        )
    }
}

impl From<Error> for Problem {
    fn from(item: Error) -> Problem {
        match item {
            Error::InvalidUrl | Error::InvalidParams(_) => {
                problemdetails::new(StatusCode::BAD_REQUEST)
                    .with_title(StatusCode::BAD_REQUEST.to_string())
                    .with_detail(item.to_string())
            }
            Error::Unauthorized => problemdetails::new(StatusCode::UNAUTHORIZED)
                .with_title(StatusCode::UNAUTHORIZED.to_string())
                .with_detail(item.to_string()),
            Error::DbError(sqlx::Error::RowNotFound) => problemdetails::new(StatusCode::NOT_FOUND)
                .with_title(StatusCode::NOT_FOUND.to_string())
                .with_detail(item.to_string()),
            _ => problemdetails::new(StatusCode::INTERNAL_SERVER_ERROR)
                .with_title(StatusCode::INTERNAL_SERVER_ERROR.to_string())
                .with_detail(item.to_string())
                .with_instance(format!("{:?}", item)),
        }
    }
}
// endregion: Error

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;
use warp::{Rejection, Reply, hyper::StatusCode, reject::Reject};

#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("No auth header provided")]
    MissingAuthHeaderError,
    #[error("The auth header is not formatted correctly (expected JWT 'Bearer ' header)")]
    InvalidAuthHeaderError,
    #[error("The JWT is not or no longer valid")]
    InvalidJwtError,
    #[error("Failed to decode request header as valid utf8")]
    UtfEncodingError,
    #[error("The current user does not own video '{0}'")]
    AccessDeniedError(Uuid),
    #[error("No video found for id '{0}'")]
    VideoNotFoundError(Uuid),
    #[error("Could not parse media type: '{0}'")]
    InvalidMediaTypeError(String),
    #[error("Unsupported media type '{0}'")]
    UnsupportedMediaTypeError(String),
    #[error("The upload is not formatted correctly: '{0}'")]
    InvalidUploadError(String),
    #[error("The request body exceeds the maximum allowed size")]
    PayloadTooLargeError,
    #[error("Failed to probe media file: '{0}'")]
    ProbeProcessError(String),
    #[error("Failed to remux media file: '{0}'")]
    RemuxProcessError(String),
    #[error("The system random source failed to provide entropy")]
    RandomSourceError,
    #[error("There has been an error communicating with the object store: '{0}'")]
    S3Error(String),
    #[error("Object store responded with status {0}")]
    S3ResponseError(u16),
    #[error("Could not establish database connection")]
    DatabaseConnectionError,
    #[error("There has been an error executing a query: '{0}'")]
    QueryError(String),
    #[error("Failed to update video metadata: '{0}'")]
    MetadataUpdateError(String),
    #[error("Failed to construct URL: '{0}'")]
    InvalidUrlError(String),
    #[error("IO error occurred: '{0}'")]
    IoError(String),
    #[error("Task has been cancelled")]
    CancellationError,
}

impl Reject for Error {}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    message: String,
    status: String,
}

/// Creates a Rejection response for the given error and logs internal server errors.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Rejection> {
    if let Some(e) = err.find::<Error>() {
        let (code, message) = match e {
            Error::MissingAuthHeaderError
            | Error::InvalidAuthHeaderError
            | Error::InvalidJwtError
            | Error::UtfEncodingError => (StatusCode::UNAUTHORIZED, e.to_string()),
            Error::AccessDeniedError(_) => (StatusCode::FORBIDDEN, e.to_string()),
            Error::VideoNotFoundError(_) => (StatusCode::NOT_FOUND, e.to_string()),
            Error::InvalidMediaTypeError(_)
            | Error::UnsupportedMediaTypeError(_)
            | Error::InvalidUploadError(_) => (StatusCode::BAD_REQUEST, e.to_string()),
            Error::PayloadTooLargeError => (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()),
            Error::ProbeProcessError(_)
            | Error::RemuxProcessError(_)
            | Error::RandomSourceError
            | Error::S3Error(_)
            | Error::S3ResponseError(_)
            | Error::DatabaseConnectionError
            | Error::QueryError(_)
            | Error::MetadataUpdateError(_)
            | Error::InvalidUrlError(_)
            | Error::IoError(_)
            | Error::CancellationError => {
                log::error!("Encountered internal server error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };

        let err_response = ErrorResponse {
            message,
            status: code.to_string(),
        };

        let json = warp::reply::json(&err_response);

        Ok(warp::reply::with_status(json, code))
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        let code = StatusCode::PAYLOAD_TOO_LARGE;
        let err_response = ErrorResponse {
            message: Error::PayloadTooLargeError.to_string(),
            status: code.to_string(),
        };

        Ok(warp::reply::with_status(
            warp::reply::json(&err_response),
            code,
        ))
    } else {
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;
    use warp::{Reply, hyper::StatusCode};

    use super::{Error, handle_rejection};

    async fn status_for(e: Error) -> StatusCode {
        let reply = handle_rejection(warp::reject::custom(e))
            .await
            .expect("custom errors must be recovered");
        reply.into_response().status()
    }

    #[tokio::test]
    async fn test_auth_errors_map_to_401() {
        assert_eq!(
            status_for(Error::MissingAuthHeaderError).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(Error::InvalidJwtError).await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_ownership_and_lookup_errors() {
        let id = Uuid::new_v4();
        assert_eq!(
            status_for(Error::AccessDeniedError(id)).await,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(Error::VideoNotFoundError(id)).await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_validation_errors_map_to_400() {
        assert_eq!(
            status_for(Error::UnsupportedMediaTypeError(String::from("image/gif"))).await,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(Error::InvalidUploadError(String::from("no field"))).await,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_tooling_and_store_errors_map_to_500() {
        assert_eq!(
            status_for(Error::ProbeProcessError(String::from("exit 1"))).await,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(Error::MetadataUpdateError(String::from("rejected"))).await,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(Error::PayloadTooLargeError).await,
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }
}

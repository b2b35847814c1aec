use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Response, StatusCode};
use http_body_util::Full;
use hostel_allocation_config::ConfigError;
use hostel_allocation_core::HostelError;
use hostel_allocation_database::error::DatabaseError;
use serde::Serialize;
use tracing::{error, warn};

pub type HttpResponse = Response<Full<Bytes>>;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Hostel(#[from] HostelError),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Unauthorized. Warden required.")]
    WardenRequired,
    #[error("Not found")]
    NotFound,
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("Invalid request: {0}")]
    Json(#[from] serde_json::Error),
    #[error("webserver error: {0}")]
    Hyper(#[from] hyper::Error),
    #[error("IO error: {0}")]
    File(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl AppError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Hostel(error) => match error {
                HostelError::NotSubmitter => StatusCode::FORBIDDEN,
                HostelError::RoomFull
                | HostelError::AlreadyInAnotherRoom
                | HostelError::AllocationInProgress => StatusCode::CONFLICT,
                HostelError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
                HostelError::StudentNotFound(_)
                | HostelError::RoomNotFound(_)
                | HostelError::NotInProvisionalGroup
                | HostelError::NoRoom
                | HostelError::GroupNotFull { .. }
                | HostelError::EmptyPreferences
                | HostelError::DuplicateRoomCode(_)
                | HostelError::InvalidRoomCodes(_)
                | HostelError::DemographicMismatch(_)
                | HostelError::InvalidInvite
                | HostelError::AlreadyInRoom
                | HostelError::RoomPolicyUnconfigured
                | HostelError::InvalidSeedPlan(_) => StatusCode::BAD_REQUEST,
            },
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::WardenRequired => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::InvalidRequest(_) | Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::Hyper(_) | Self::File(_) | Self::Config(_) | Self::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Renders the error as `{"error": "..."}`. Internal failures are logged
    /// and hidden behind a generic message.
    #[must_use]
    pub fn into_response(self) -> HttpResponse {
        let status = self.status();
        let message = if status.is_server_error() {
            error!("request failed: {self}");
            "Internal server error".to_owned()
        } else {
            warn!(status = status.as_u16(), "request rejected: {self}");
            self.to_string()
        };
        let body = serde_json::to_vec(&ErrorBody { error: &message }).unwrap_or_default();
        with_json_body(status, body)
    }
}

fn with_json_body(status: StatusCode, body: Vec<u8>) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

pub fn json<T: Serialize>(value: &T) -> Result<HttpResponse, AppError> {
    Ok(with_json_body(StatusCode::OK, serde_json::to_vec(value)?))
}

#[cfg(test)]
mod tests {
    use hostel_allocation_core::DemographicAttribute;

    use super::*;

    #[test]
    fn domain_failures_map_to_client_statuses() {
        let cases = [
            (HostelError::RoomFull, StatusCode::CONFLICT),
            (HostelError::AlreadyInAnotherRoom, StatusCode::CONFLICT),
            (HostelError::AllocationInProgress, StatusCode::CONFLICT),
            (HostelError::NotSubmitter, StatusCode::FORBIDDEN),
            (
                HostelError::DemographicMismatch(DemographicAttribute::Gender),
                StatusCode::BAD_REQUEST,
            ),
            (
                HostelError::InvalidRoomCodes(vec!["Z-999".to_owned()]),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(AppError::from(error).status(), status);
        }
    }

    #[test]
    fn server_errors_hide_details() {
        let store = HostelError::Store(hostel_allocation_core::StoreError::new("connection reset"));
        let response = AppError::from(store).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

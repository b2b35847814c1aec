pub mod admission;
pub mod invites;
pub mod room;

use bytes::Bytes;
use hostel_allocation_core::model::StudentId;
use hostel_allocation_core::HostelError;
use serde::de::DeserializeOwned;

use crate::error::AppError;

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    if body.is_empty() {
        return Err(AppError::InvalidRequest("missing JSON body"));
    }
    Ok(serde_json::from_slice(body)?)
}

/// A session naming a student the roster does not know is no session at all.
fn as_caller(caller: StudentId) -> impl FnOnce(HostelError) -> AppError {
    move |error| match error {
        HostelError::StudentNotFound(student) if student == caller => AppError::Unauthorized,
        other => AppError::Hostel(other),
    }
}

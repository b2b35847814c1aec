use hostel_allocation_core::group_formation::{
    leave_room, request_provisional_room, room_card, RoomCard,
};
use hostel_allocation_core::RosterStore;
use serde::Serialize;

use super::as_caller;
use crate::error::{json, AppError, HttpResponse};
use crate::session::Session;
use crate::AppState;

#[derive(Serialize)]
struct CardResponse {
    room: Option<RoomCard>,
}

pub async fn request<S: RosterStore>(
    state: &AppState<S>,
    session: &Session,
) -> Result<HttpResponse, AppError> {
    let student = session.student()?;
    let claim = request_provisional_room(&state.store, student)
        .await
        .map_err(as_caller(student))?;
    json(&claim)
}

pub async fn leave<S: RosterStore>(
    state: &AppState<S>,
    session: &Session,
) -> Result<HttpResponse, AppError> {
    let student = session.student()?;
    let outcome = leave_room(&state.store, student)
        .await
        .map_err(as_caller(student))?;
    json(&outcome)
}

pub async fn card<S: RosterStore>(
    state: &AppState<S>,
    session: &Session,
) -> Result<HttpResponse, AppError> {
    let student = session.student()?;
    let room = room_card(&state.store, student)
        .await
        .map_err(as_caller(student))?;
    json(&CardResponse { room })
}

use bytes::Bytes;
use hostel_allocation_core::group_formation::{invite, received_invites, respond_to_invite};
use hostel_allocation_core::model::{InviteAction, InviteId, StudentId};
use hostel_allocation_core::RosterStore;
use serde::Deserialize;

use super::{as_caller, parse_body};
use crate::error::{json, AppError, HttpResponse};
use crate::session::Session;
use crate::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvitePayload {
    to_student_id: StudentId,
}

#[derive(Deserialize)]
struct RespondPayload {
    action: InviteAction,
}

pub async fn list<S: RosterStore>(
    state: &AppState<S>,
    session: &Session,
) -> Result<HttpResponse, AppError> {
    let student = session.student()?;
    let invites = received_invites(&state.store, student)
        .await
        .map_err(as_caller(student))?;
    json(&invites)
}

pub async fn create<S: RosterStore>(
    state: &AppState<S>,
    session: &Session,
    body: &Bytes,
) -> Result<HttpResponse, AppError> {
    let from = session.student()?;
    let payload: InvitePayload = parse_body(body)?;
    let receipt = invite(&state.store, from, payload.to_student_id)
        .await
        .map_err(as_caller(from))?;
    json(&receipt)
}

pub async fn respond<S: RosterStore>(
    state: &AppState<S>,
    session: &Session,
    invite: &str,
    body: &Bytes,
) -> Result<HttpResponse, AppError> {
    let student = session.student()?;
    let invite = invite
        .parse()
        .map(InviteId)
        .map_err(|_| AppError::InvalidRequest("invite id must be a number"))?;
    let payload: RespondPayload = parse_body(body)?;
    let response = respond_to_invite(&state.store, student, invite, payload.action)
        .await
        .map_err(as_caller(student))?;
    json(&response)
}

use bytes::Bytes;
use hostel_allocation_core::preferences::{preference_state, submit_preferences, target_rooms};
use hostel_allocation_core::seeder::seed_rooms;
use hostel_allocation_core::RosterStore;
use serde::Deserialize;

use super::{as_caller, parse_body};
use crate::error::{json, AppError, HttpResponse};
use crate::session::Session;
use crate::AppState;

#[derive(Deserialize)]
struct PreferencesPayload {
    preferences: Vec<String>,
}

pub async fn preferences<S: RosterStore>(
    state: &AppState<S>,
    session: &Session,
) -> Result<HttpResponse, AppError> {
    let student = session.student()?;
    let current = preference_state(&state.store, student)
        .await
        .map_err(as_caller(student))?;
    json(&current)
}

pub async fn submit<S: RosterStore>(
    state: &AppState<S>,
    session: &Session,
    body: &Bytes,
) -> Result<HttpResponse, AppError> {
    let student = session.student()?;
    let payload: PreferencesPayload = parse_body(body)?;
    let submitted = submit_preferences(&state.store, student, payload.preferences)
        .await
        .map_err(as_caller(student))?;
    json(&submitted)
}

/// Students see the rooms open to their year, the warden sees every room.
pub async fn rooms<S: RosterStore>(
    state: &AppState<S>,
    session: &Session,
) -> Result<HttpResponse, AppError> {
    let rooms = match session.student_if_any() {
        Some(student) => target_rooms(&state.store, Some(student))
            .await
            .map_err(as_caller(student))?,
        None => {
            session.warden(&state.warden_token)?;
            target_rooms(&state.store, None).await?
        }
    };
    json(&rooms)
}

pub async fn run_allocation<S: RosterStore>(
    state: &AppState<S>,
    session: &Session,
) -> Result<HttpResponse, AppError> {
    session.warden(&state.warden_token)?;
    let report = state.engine.run(&state.store).await?;
    json(&report)
}

pub async fn seed<S: RosterStore>(
    state: &AppState<S>,
    session: &Session,
) -> Result<HttpResponse, AppError> {
    session.warden(&state.warden_token)?;
    let report = seed_rooms(&state.store, &state.seed).await?;
    json(&report)
}

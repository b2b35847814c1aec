use bytes::Bytes;
use hostel_allocation_core::RosterStore;
use http::{Method, Request};
use tracing::debug;

use crate::error::{AppError, HttpResponse};
use crate::routes::{admission, invites, room};
use crate::session::Session;
use crate::AppState;

/// Dispatches one request with a fully read body.
pub async fn handle<S: RosterStore>(state: &AppState<S>, request: Request<Bytes>) -> HttpResponse {
    let session = Session::new(&request);
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    debug!(%method, %path, "handling request");
    let body = request.into_body();
    dispatch(state, &session, method, &path, &body)
        .await
        .unwrap_or_else(AppError::into_response)
}

async fn dispatch<S: RosterStore>(
    state: &AppState<S>,
    session: &Session,
    method: Method,
    path: &str,
    body: &Bytes,
) -> Result<HttpResponse, AppError> {
    let segments: Vec<&str> = path.split('/').filter(|segment| !segment.is_empty()).collect();
    match (segments.as_slice(), method) {
        (["room", "request"], Method::POST) => room::request(state, session).await,
        (["room", "leave"], Method::POST) => room::leave(state, session).await,
        (["room", "card"], Method::GET) => room::card(state, session).await,
        (["invites"], Method::GET) => invites::list(state, session).await,
        (["invites"], Method::POST) => invites::create(state, session, body).await,
        (["invites", invite], Method::PUT) => invites::respond(state, session, invite, body).await,
        (["admission", "preferences"], Method::GET) => admission::preferences(state, session).await,
        (["admission", "preferences"], Method::POST) => {
            admission::submit(state, session, body).await
        }
        (["admission", "rooms"], Method::GET) => admission::rooms(state, session).await,
        (["admission", "run-allocation"], Method::POST) => {
            admission::run_allocation(state, session).await
        }
        (["admission", "seed-rooms"], Method::POST) => admission::seed(state, session).await,
        (
            ["room", "request" | "leave" | "card"]
            | ["invites"]
            | ["invites", _]
            | ["admission", "preferences" | "rooms" | "run-allocation" | "seed-rooms"],
            _,
        ) => Err(AppError::MethodNotAllowed),
        _ => Err(AppError::NotFound),
    }
}

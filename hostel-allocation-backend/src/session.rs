use cookie::Cookie;
use http::header::{AUTHORIZATION, COOKIE};
use http::Request;
use hostel_allocation_core::model::StudentId;
use tracing::debug;

use crate::error::AppError;

/// Set by the portal's login flow, which lives outside this service.
pub const COOKIE_NAME_STUDENT: &str = "student_id";

/// Who is calling, as far as the request tells.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct Session {
    student: Option<StudentId>,
    bearer: Option<String>,
}

impl Session {
    pub fn new<T>(request: &Request<T>) -> Self {
        let mut student = None;
        request
            .headers()
            .get_all(COOKIE)
            .into_iter()
            .filter_map(|value| value.to_str().ok())
            .map(std::borrow::ToOwned::to_owned)
            .flat_map(Cookie::split_parse)
            .filter_map(std::result::Result::ok)
            .filter(|cookie| cookie.name() == COOKIE_NAME_STUDENT)
            .for_each(|cookie| match cookie.value().parse() {
                Ok(id) => student = Some(StudentId(id)),
                Err(_) => debug!("ignoring malformed {} cookie", COOKIE_NAME_STUDENT),
            });
        let bearer = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_owned());
        Self { student, bearer }
    }

    pub fn student(&self) -> Result<StudentId, AppError> {
        self.student.ok_or(AppError::Unauthorized)
    }

    #[must_use]
    pub const fn student_if_any(&self) -> Option<StudentId> {
        self.student
    }

    /// An empty configured token locks the warden out entirely.
    pub fn warden(&self, warden_token: &str) -> Result<(), AppError> {
        match &self.bearer {
            Some(bearer) if !warden_token.is_empty() && bearer == warden_token => Ok(()),
            None if self.student.is_none() => Err(AppError::Unauthorized),
            _ => Err(AppError::WardenRequired),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(headers: &[(&str, &str)]) -> Request<()> {
        let mut builder = Request::builder();
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn student_comes_from_the_cookie() {
        let session = Session::new(&request(&[("cookie", "theme=dark; student_id=42")]));
        assert_eq!(session.student().unwrap(), StudentId(42));

        let session = Session::new(&request(&[("cookie", "student_id=abc")]));
        assert!(matches!(session.student(), Err(AppError::Unauthorized)));
    }

    #[test]
    fn warden_needs_the_configured_token() {
        let warden = Session::new(&request(&[("authorization", "Bearer s3cret")]));
        assert!(warden.warden("s3cret").is_ok());
        assert!(matches!(warden.warden(""), Err(AppError::WardenRequired)));

        let student = Session::new(&request(&[("cookie", "student_id=7")]));
        assert!(matches!(
            student.warden("s3cret"),
            Err(AppError::WardenRequired)
        ));
        assert!(matches!(
            Session::default().warden("s3cret"),
            Err(AppError::Unauthorized)
        ));
    }
}
